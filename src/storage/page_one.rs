//! Validity marker on the reserved first page.
//!
//! At open, 8 random bytes are written at offset 100 (the open marker). At
//! clean close they are copied into offset 108 (the close marker). The two
//! windows are equal iff the previous shutdown was clean; a mismatch on open
//! triggers WAL recovery.

use rand::RngCore;

use crate::config::{VC_LEN, VC_OFFSET};
use crate::storage::page::{blank_page, Page};

/// Image of a freshly created page one, open marker already set.
pub fn init_raw() -> Box<[u8]> {
    let mut raw = blank_page();
    stamp_open(&mut raw);
    raw
}

/// Writes a fresh random open marker.
pub fn set_open(page: &Page) {
    page.mark_dirty();
    stamp_open(&mut page.data_mut());
}

/// Mirrors the open marker into the close slot; only a clean shutdown runs
/// this.
pub fn set_close(page: &Page) {
    page.mark_dirty();
    let mut data = page.data_mut();
    data.copy_within(VC_OFFSET..VC_OFFSET + VC_LEN, VC_OFFSET + VC_LEN);
}

/// True iff the open and close markers match.
pub fn check(page: &Page) -> bool {
    let data = page.data();
    data[VC_OFFSET..VC_OFFSET + VC_LEN] == data[VC_OFFSET + VC_LEN..VC_OFFSET + 2 * VC_LEN]
}

fn stamp_open(raw: &mut [u8]) {
    rand::thread_rng().fill_bytes(&mut raw[VC_OFFSET..VC_OFFSET + VC_LEN]);
}
