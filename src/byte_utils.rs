// Copyright (C) 2022 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of syplog.
//
// syplog is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! Small helpers for shuffling bytes in & out of fixed-width fields.

use bytes::buf::BufMut;

/// Produce a [`Vec`] of bytes from an [`OsString`].
///
/// [`OsString`]: std::ffi::OsString
#[cfg(unix)]
pub fn bytes_from_os_str(s: std::ffi::OsString) -> Vec<u8> {
    use std::os::unix::ffi::OsStringExt;
    s.into_vec()
}

#[cfg(not(unix))]
pub fn bytes_from_os_str(s: std::ffi::OsString) -> Vec<u8> {
    s.to_string_lossy().as_bytes().to_vec()
}

/// Write `s` into a field of exactly `width` bytes, NUL-padded. `s` must be shorter than
/// `width` so that at least one terminator is always written.
pub fn put_fixed<B: BufMut>(buf: &mut B, s: &str, width: usize) {
    let n = s.len().min(width.saturating_sub(1));
    buf.put_slice(&s.as_bytes()[..n]);
    buf.put_bytes(0, width - n);
}

/// Read a NUL-terminated string out of a fixed-width field; invalid UTF-8 is replaced.
pub fn get_fixed(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

pub fn ne_u32(buf: &[u8], at: usize) -> u32 {
    let mut x = [0u8; 4];
    x.copy_from_slice(&buf[at..at + 4]);
    u32::from_ne_bytes(x)
}

pub fn ne_u64(buf: &[u8], at: usize) -> u64 {
    let mut x = [0u8; 8];
    x.copy_from_slice(&buf[at..at + 8]);
    u64::from_ne_bytes(x)
}

pub fn ne_i64(buf: &[u8], at: usize) -> i64 {
    ne_u64(buf, at) as i64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_fields() {
        let mut buf: Vec<u8> = Vec::new();
        put_fixed(&mut buf, "abc", 8);
        assert_eq!(buf, b"abc\0\0\0\0\0");
        assert_eq!(get_fixed(&buf), "abc");

        // always leave room for the terminator
        let mut buf: Vec<u8> = Vec::new();
        put_fixed(&mut buf, "abcdef", 4);
        assert_eq!(buf, b"abc\0");

        let mut buf: Vec<u8> = Vec::new();
        buf.put_slice(&0x0102_0304_u32.to_ne_bytes());
        buf.put_slice(&(-5_i64).to_ne_bytes());
        assert_eq!(ne_u32(&buf, 0), 0x0102_0304);
        assert_eq!(ne_i64(&buf, 4), -5);
    }
}
