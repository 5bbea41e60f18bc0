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

//! Record encoders.
//!
//! An [`Encoder`] turns a [`Record`] into bytes & back again. There are exactly two of them,
//! selected by name at configuration time: "binary" (the fixed-layout record image) & "text" (one
//! tab-separated line per record). Each offers symmetric reads & writes against three kinds of
//! target: an in-memory buffer, a seekable stream & a socket. Socket I/O is reserved; both
//! encoders answer [`Error::NotImplemented`].

pub mod binary;
pub mod text;

use crate::{
    error::{Error, Result},
    record::Record,
};

use backtrace::Backtrace;

use std::io::{Read, Seek, Write};

type StdResult<T, E> = std::result::Result<T, E>;

/// The available record encodings
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Encoder {
    Binary,
    Text,
}

const ENCODERS: [(Encoder, &str); 2] = [(Encoder::Binary, "binary"), (Encoder::Text, "text")];

impl Encoder {
    /// Look an encoder up by name
    pub fn for_name(name: &str) -> Option<Encoder> {
        ENCODERS
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(enc, _)| *enc)
    }
    pub fn name(&self) -> &'static str {
        match self {
            Encoder::Binary => "binary",
            Encoder::Text => "text",
        }
    }
    /// The largest number of bytes one record can occupy in this encoding
    pub fn max_size(&self) -> usize {
        match self {
            Encoder::Binary => binary::RECORD_SIZE,
            Encoder::Text => text::MAX_SIZE,
        }
    }
    /// Serialize `rec` into a freshly-allocated buffer.
    pub fn encode(&self, rec: &Record) -> Vec<u8> {
        match self {
            Encoder::Binary => {
                let mut buf = Vec::with_capacity(binary::RECORD_SIZE);
                binary::encode(rec, &mut buf);
                buf
            }
            Encoder::Text => text::encode(rec).into_bytes(),
        }
    }
    /// Write `rec` to the front of `buf`, which must be able to hold the encoded record.
    pub fn write_to_buffer(&self, rec: &Record, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.encode(rec);
        if bytes.len() > buf.len() {
            return Err(Error::bad_params(format!(
                "a {}-byte buffer can't hold a {}-byte {} record",
                buf.len(),
                bytes.len(),
                self
            )));
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
    /// Write `rec` to `stream` in a single call, so that concurrent writers sharing the stream
    /// under a lock never shred one another's records.
    pub fn write_to_stream<W: Write + ?Sized>(&self, rec: &Record, stream: &mut W) -> Result<usize> {
        let bytes = self.encode(rec);
        stream.write_all(&bytes)?;
        Ok(bytes.len())
    }
    pub fn write_to_socket(&self, _rec: &Record, _fd: std::os::unix::io::RawFd) -> Result<usize> {
        Err(Error::NotImplemented {
            what: "writing records to a socket",
        })
    }
    /// Read one record from the front of `buf`, returning the number of bytes consumed.
    pub fn read_from_buffer(&self, rec: &mut Record, buf: &[u8]) -> Result<usize> {
        let (parsed, n) = match self {
            Encoder::Binary => (binary::decode(buf)?, binary::RECORD_SIZE),
            Encoder::Text => text::decode(buf)?,
        };
        *rec = parsed;
        Ok(n)
    }
    /// Read one record from `stream`, leaving the stream just past it. On failure, the stream is
    /// left unchanged.
    pub fn read_from_stream<R: Read + Seek + ?Sized>(
        &self,
        rec: &mut Record,
        stream: &mut R,
    ) -> Result<usize> {
        let (parsed, n) = match self {
            Encoder::Binary => binary::read_stream(stream)?,
            Encoder::Text => text::read_stream(stream)?,
        };
        *rec = parsed;
        Ok(n)
    }
    pub fn read_from_socket(&self, _rec: &mut Record, _fd: std::os::unix::io::RawFd) -> Result<usize> {
        Err(Error::NotImplemented {
            what: "reading records from a socket",
        })
    }
}

impl std::default::Default for Encoder {
    fn default() -> Self {
        Encoder::Binary
    }
}

impl std::fmt::Display for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Encoder {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Encoder::for_name(s).ok_or_else(|| Error::BadParams {
            what: format!("unknown encoder '{}'", s),
            back: Backtrace::new(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        error::ErrorCode,
        facility::{Severity, Topics},
    };

    use std::io::Cursor;

    #[test]
    fn registry() {
        assert_eq!(Encoder::for_name("binary"), Some(Encoder::Binary));
        assert_eq!(Encoder::for_name("text"), Some(Encoder::Text));
        assert_eq!(Encoder::for_name("json"), None);
        assert_eq!("text".parse::<Encoder>().unwrap(), Encoder::Text);
        assert_eq!(
            "xml".parse::<Encoder>().unwrap_err().code(),
            ErrorCode::BadParams
        );
        assert_eq!(Encoder::Binary.max_size(), 1424);
        assert!(Encoder::Text.max_size() > 1024);
    }

    #[test]
    fn buffers_and_streams() {
        let mut rec = Record::new(Severity::Crit, Topics::DATA, "on fire");
        rec.stamp();
        rec.host.set("bree");
        for enc in [Encoder::Binary, Encoder::Text] {
            let mut buf = vec![0u8; enc.max_size()];
            let n = enc.write_to_buffer(&rec, &mut buf).unwrap();
            assert!(n <= enc.max_size());
            let mut back = Record::default();
            assert_eq!(enc.read_from_buffer(&mut back, &buf).unwrap(), n);
            assert_eq!(back, rec);

            let mut stream = Cursor::new(Vec::new());
            let n = enc.write_to_stream(&rec, &mut stream).unwrap();
            stream.set_position(0);
            let mut back = Record::default();
            assert_eq!(enc.read_from_stream(&mut back, &mut stream).unwrap(), n);
            assert_eq!(back, rec);

            let mut tiny = [0u8; 16];
            assert_eq!(
                enc.write_to_buffer(&rec, &mut tiny).unwrap_err().code(),
                ErrorCode::BadParams
            );
            assert_eq!(
                enc.write_to_socket(&rec, 1).unwrap_err().code(),
                ErrorCode::NotImplemented
            );
            assert_eq!(
                enc.read_from_socket(&mut back, 0).unwrap_err().code(),
                ErrorCode::NotImplemented
            );
        }
    }

    #[test]
    fn embedded_nul() {
        let mut rec = Record::new(Severity::Info, Topics::LOG, "before\0after");
        rec.stamp();
        rec.thread_name.set("worker\0x");
        rec.node.set("\0node");
        assert_eq!(rec.message, "before");
        assert_eq!(rec.thread_name, "worker");
        assert_eq!(rec.node, "");
        for enc in [Encoder::Binary, Encoder::Text] {
            let mut buf = vec![0u8; enc.max_size()];
            let n = enc.write_to_buffer(&rec, &mut buf).unwrap();
            let mut back = Record::default();
            assert_eq!(enc.read_from_buffer(&mut back, &buf).unwrap(), n);
            assert_eq!(back, rec);
        }
    }
}
