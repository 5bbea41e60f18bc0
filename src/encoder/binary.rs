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

//! The fixed-layout binary encoding.
//!
//! A record is written as the byte image a C compiler would produce for the record struct on this
//! host: fields in declaration order, natural alignment, native endianness, strings NUL-padded to
//! their full width. The image is not portable across hosts, & doesn't try to be; what matters is
//! that [`encode`] & [`decode`] are exact inverses on the same machine.

use crate::{
    byte_utils::{get_fixed, ne_i64, ne_u32, ne_u64, put_fixed},
    error::{Error, Result},
    facility::{Severity, Topics},
    record::{
        BoundedString, Record, Timestamp, HOST_NAME_SIZE, MESSAGE_SIZE, NODE_NAME_SIZE,
        THREAD_NAME_SIZE,
    },
};

use backtrace::Backtrace;
use bytes::buf::BufMut;

use std::io::{Read, Seek, SeekFrom};

const SEVERITY_AT: usize = 0;
const TOPICS_AT: usize = 8;
const MESSAGE_AT: usize = TOPICS_AT + 8;
const THREAD_ID_AT: usize = MESSAGE_AT + MESSAGE_SIZE;
const THREAD_NAME_AT: usize = THREAD_ID_AT + 8;
const SECS_AT: usize = THREAD_NAME_AT + THREAD_NAME_SIZE;
const USECS_AT: usize = SECS_AT + 8;
const NODE_AT: usize = USECS_AT + 8;
const HOST_AT: usize = NODE_AT + NODE_NAME_SIZE;
// host names are 255 bytes, so we need a byte of padding to re-align on eight
const TIMEZONE_AT: usize = (HOST_AT + HOST_NAME_SIZE + 7) & !7;

/// Size of one binary record image
pub const RECORD_SIZE: usize = TIMEZONE_AT + 8;

/// Append the binary image of `rec` to `buf`; always exactly [`RECORD_SIZE`] bytes.
pub fn encode<B: BufMut>(rec: &Record, buf: &mut B) {
    buf.put_slice(&(rec.severity as u32).to_ne_bytes());
    buf.put_bytes(0, TOPICS_AT - SEVERITY_AT - 4);
    buf.put_slice(&rec.topics.bits().to_ne_bytes());
    put_fixed(buf, &rec.message, MESSAGE_SIZE);
    buf.put_slice(&rec.thread_id.to_ne_bytes());
    put_fixed(buf, &rec.thread_name, THREAD_NAME_SIZE);
    buf.put_slice(&rec.timestamp.secs.to_ne_bytes());
    buf.put_slice(&rec.timestamp.usecs.to_ne_bytes());
    put_fixed(buf, &rec.node, NODE_NAME_SIZE);
    put_fixed(buf, &rec.host, HOST_NAME_SIZE);
    buf.put_bytes(0, TIMEZONE_AT - HOST_AT - HOST_NAME_SIZE);
    buf.put_slice(&rec.timezone.to_ne_bytes());
}

/// Decode one record from the front of `buf`.
pub fn decode(buf: &[u8]) -> Result<Record> {
    if buf.len() < RECORD_SIZE {
        return Err(Error::Truncated {
            requested: RECORD_SIZE as u64,
            granted: buf.len() as u64,
            back: Backtrace::new(),
        });
    }
    let ordinal = ne_u32(buf, SEVERITY_AT);
    let severity = Severity::from_ordinal(ordinal)
        .ok_or_else(|| Error::bad_message(format!("severity {} out of range", ordinal)))?;
    Ok(Record {
        severity,
        topics: Topics::from_bits(ne_u64(buf, TOPICS_AT)),
        message: BoundedString::new(&get_fixed(&buf[MESSAGE_AT..THREAD_ID_AT])),
        thread_id: ne_u64(buf, THREAD_ID_AT),
        thread_name: BoundedString::new(&get_fixed(&buf[THREAD_NAME_AT..SECS_AT])),
        timestamp: Timestamp {
            secs: ne_i64(buf, SECS_AT),
            usecs: ne_i64(buf, USECS_AT),
        },
        node: BoundedString::new(&get_fixed(&buf[NODE_AT..HOST_AT])),
        host: BoundedString::new(&get_fixed(&buf[HOST_AT..HOST_AT + HOST_NAME_SIZE])),
        timezone: ne_i64(buf, TIMEZONE_AT),
    })
}

/// Read one record image from `stream`.
///
/// A clean end of stream is [`Error::EndOfLog`]. A torn trailing image, or one that fails to
/// decode, leaves the stream where it was.
pub fn read_stream<R: Read + Seek + ?Sized>(stream: &mut R) -> Result<(Record, usize)> {
    let start = stream.stream_position()?;
    let mut buf = [0u8; RECORD_SIZE];
    let mut got = 0;
    while got < RECORD_SIZE {
        match stream.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                stream.seek(SeekFrom::Start(start))?;
                return Err(err.into());
            }
        }
    }
    if got == 0 {
        return Err(Error::EndOfLog);
    }
    match decode(&buf[..got]) {
        Ok(rec) => Ok((rec, RECORD_SIZE)),
        Err(err) => {
            stream.seek(SeekFrom::Start(start))?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Cursor;

    fn sample() -> Record {
        Record {
            severity: Severity::Notice,
            topics: Topics::NET | Topics::ZFSD,
            message: BoundedString::new("Hello, 世界!"),
            thread_id: 0xdead_beef,
            thread_name: BoundedString::new("worker-3"),
            timestamp: Timestamp {
                secs: 1_656_000_000,
                usecs: 123_456,
            },
            node: BoundedString::new("node-a"),
            host: BoundedString::new("bree.local"),
            timezone: -7 * 3600,
        }
    }

    #[test]
    fn layout() {
        assert_eq!(TOPICS_AT, 8);
        assert_eq!(THREAD_ID_AT, 1040);
        assert_eq!(HOST_AT, 1160);
        assert_eq!(TIMEZONE_AT, 1416);
        assert_eq!(RECORD_SIZE, 1424);

        let mut buf: Vec<u8> = Vec::new();
        encode(&sample(), &mut buf);
        assert_eq!(buf.len(), RECORD_SIZE);
        assert_eq!(&buf[MESSAGE_AT..MESSAGE_AT + 5], b"Hello");
        assert_eq!(ne_u64(&buf, TOPICS_AT), 0x10004);
    }

    #[test]
    fn inverse() {
        let mut buf: Vec<u8> = Vec::new();
        encode(&sample(), &mut buf);
        assert_eq!(decode(&buf).unwrap(), sample());

        // an image with a bogus severity is rejected
        buf[0] = 42;
        assert_eq!(
            decode(&buf).unwrap_err().code(),
            crate::error::ErrorCode::BadMessage
        );
        assert_eq!(
            decode(&buf[..100]).unwrap_err().code(),
            crate::error::ErrorCode::Truncated
        );
    }

    #[test]
    fn streams() {
        let mut buf: Vec<u8> = Vec::new();
        encode(&sample(), &mut buf);
        let mut rec = sample();
        rec.message.set("second");
        encode(&rec, &mut buf);
        // torn trailing record
        buf.extend_from_slice(&[1, 2, 3]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_stream(&mut cursor).unwrap().0, sample());
        assert_eq!(read_stream(&mut cursor).unwrap().0.message, "second");
        assert!(read_stream(&mut cursor).is_err());
        assert_eq!(cursor.position(), 2 * RECORD_SIZE as u64);

        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_stream(&mut cursor).unwrap_err().is_end_of_log());
    }
}
