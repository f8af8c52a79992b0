//! Fixed-width byte codecs.
//!
//! All multi-byte integers in shaledb's on-disk formats are big-endian.
//! Endianness lives in this one module: page formats, log records, catalog
//! records and the B+ tree all decode through these helpers (or through
//! `zerocopy` big-endian wire types for fixed headers).
//!
//! Strings are length-prefixed: `[len:4][utf8 bytes]`.

use eyre::{ensure, eyre, Result};

use crate::config::CHECKSUM_SEED;
use crate::Uid;

pub fn read_u16(buf: &[u8]) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[..2]);
    u16::from_be_bytes(b)
}

pub fn read_u32(buf: &[u8]) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[..4]);
    u32::from_be_bytes(b)
}

pub fn read_u64(buf: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[..8]);
    u64::from_be_bytes(b)
}

pub fn read_i32(buf: &[u8]) -> i32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[..4]);
    i32::from_be_bytes(b)
}

pub fn read_i64(buf: &[u8]) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[..8]);
    i64::from_be_bytes(b)
}

pub fn write_u16(buf: &mut [u8], v: u16) {
    buf[..2].copy_from_slice(&v.to_be_bytes());
}

pub fn write_u32(buf: &mut [u8], v: u32) {
    buf[..4].copy_from_slice(&v.to_be_bytes());
}

pub fn write_u64(buf: &mut [u8], v: u64) {
    buf[..8].copy_from_slice(&v.to_be_bytes());
}

/// Encodes a string as `[len:4][bytes]`.
pub fn encode_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

/// Decodes a `[len:4][bytes]` string, returning it together with the number
/// of bytes consumed.
pub fn parse_string(buf: &[u8]) -> Result<(String, usize)> {
    ensure!(buf.len() >= 4, "string header truncated");
    let len = read_u32(buf) as usize;
    ensure!(buf.len() >= 4 + len, "string body truncated: want {len} bytes");
    let s = std::str::from_utf8(&buf[4..4 + len])
        .map_err(|e| eyre!("string is not valid UTF-8: {e}"))?
        .to_owned();
    Ok((s, 4 + len))
}

/// Deterministic 64-bit fold of a string, used as its index key. Collisions
/// are possible; callers must treat the result as an over-approximating key,
/// never as identity.
pub fn str_to_key(s: &str) -> i64 {
    s.as_bytes().iter().fold(0i64, |acc, &b| {
        acc.wrapping_mul(CHECKSUM_SEED as i64)
            .wrapping_add(b as i8 as i64)
    })
}

/// Packs a page number and in-page offset into a data item UID.
pub fn uid_from_parts(pgno: u32, offset: u16) -> Uid {
    ((pgno as u64) << 32) | offset as u64
}

/// Splits a UID back into `(page_number, offset)`.
pub fn uid_to_parts(uid: Uid) -> (u32, u16) {
    ((uid >> 32) as u32, (uid & 0xFFFF) as u16)
}
