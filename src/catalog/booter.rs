//! Catalog boot anchor.
//!
//! A tiny side file (`P.bt`) holding one 8-byte value: the UID of the first
//! table record (0 while the catalog is empty). Updates are atomic: the new
//! content is written and synced to `P.bt_tmp`, which is then renamed over
//! the canonical name. A leftover temp file from an interrupted update is
//! deleted on open, so the anchor is always either the old or the new
//! value, never a torn write.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

use crate::error::EngineError;

pub const BOOT_SUFFIX: &str = ".bt";
pub const BOOT_TMP_SUFFIX: &str = ".bt_tmp";

#[derive(Debug)]
pub struct Booter {
    prefix: PathBuf,
}

impl Booter {
    pub fn create(prefix: &Path) -> Result<Self> {
        remove_stale_tmp(prefix);
        let path = boot_path(prefix, BOOT_SUFFIX);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create boot file at {:?}", path))?;
        Ok(Self {
            prefix: prefix.to_path_buf(),
        })
    }

    pub fn open(prefix: &Path) -> Result<Self> {
        remove_stale_tmp(prefix);
        let path = boot_path(prefix, BOOT_SUFFIX);
        ensure!(path.exists(), EngineError::FileNotExists);
        Ok(Self {
            prefix: prefix.to_path_buf(),
        })
    }

    pub fn load(&self) -> Result<Vec<u8>> {
        let path = boot_path(&self.prefix, BOOT_SUFFIX);
        fs::read(&path).wrap_err_with(|| format!("failed to read boot file at {:?}", path))
    }

    /// Atomically replaces the boot content.
    pub fn update(&self, data: &[u8]) -> Result<()> {
        let tmp = boot_path(&self.prefix, BOOT_TMP_SUFFIX);
        let target = boot_path(&self.prefix, BOOT_SUFFIX);

        let mut file = File::create(&tmp)
            .wrap_err_with(|| format!("failed to create boot temp file at {:?}", tmp))?;
        file.write_all(data).wrap_err("failed to write boot temp")?;
        file.sync_all().wrap_err("failed to sync boot temp")?;
        drop(file);

        fs::rename(&tmp, &target)
            .wrap_err_with(|| format!("failed to move boot temp over {:?}", target))?;
        Ok(())
    }
}

fn boot_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut os = prefix.as_os_str().to_owned();
    os.push(suffix);
    os.into()
}

fn remove_stale_tmp(prefix: &Path) {
    let _ = fs::remove_file(boot_path(prefix, BOOT_TMP_SUFFIX));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("t");
        let booter = Booter::create(&prefix).unwrap();
        booter.update(&42u64.to_be_bytes()).unwrap();
        assert_eq!(booter.load().unwrap(), 42u64.to_be_bytes());

        booter.update(&7u64.to_be_bytes()).unwrap();
        assert_eq!(booter.load().unwrap(), 7u64.to_be_bytes());
    }

    #[test]
    fn open_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Booter::open(&dir.path().join("absent")).unwrap_err();
        assert_eq!(EngineError::of(&err), Some(EngineError::FileNotExists));
    }

    #[test]
    fn stale_tmp_is_cleaned_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("t");
        {
            let booter = Booter::create(&prefix).unwrap();
            booter.update(&1u64.to_be_bytes()).unwrap();
        }
        // Simulate an update interrupted between temp write and rename.
        std::fs::write(boot_path(&prefix, BOOT_TMP_SUFFIX), b"torn").unwrap();

        let booter = Booter::open(&prefix).unwrap();
        assert_eq!(booter.load().unwrap(), 1u64.to_be_bytes());
        assert!(!boot_path(&prefix, BOOT_TMP_SUFFIX).exists());
    }
}
