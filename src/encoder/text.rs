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

//! The human-readable text encoding.
//!
//! One record per line, tab-separated:
//!
//! ```text
//! host \t node \t thread-id/thread-name \t topics \t severity \t secs:usecs \t tz-secs \t message \n
//! ```
//!
//! Topic & severity are spelled using the name tables in [`crate::facility`]. Backslash, tab &
//! newline inside string fields are escaped (`\\`, `\t`, `\n`) so that any record survives the trip
//! through a line-oriented format.

use crate::{
    error::{Error, Result},
    facility::{Severity, Topics},
    record::{
        BoundedString, Record, Timestamp, HOST_NAME_SIZE, MESSAGE_SIZE, NODE_NAME_SIZE,
        THREAD_NAME_SIZE,
    },
};

use std::fmt::Write as FmtWrite;
use std::io::{Read, Seek, SeekFrom};

/// Longest possible rendering of a topic bitmap (every name, plus a 64-bit residue)
const TOPIC_NAME_MAX: usize = 72;
const SEVERITY_NAME_MAX: usize = 7;
const U64_MAX_DIGITS: usize = 20;
const I64_MAX_DIGITS: usize = 20;

/// Upper bound on the size of one encoded line: every string field fully escaped, every number
/// at its widest, seven tabs, the `/` & the newline.
pub const MAX_SIZE: usize = 2 * (HOST_NAME_SIZE - 1)
    + 2 * (NODE_NAME_SIZE - 1)
    + U64_MAX_DIGITS
    + 2 * (THREAD_NAME_SIZE - 1)
    + TOPIC_NAME_MAX
    + SEVERITY_NAME_MAX
    + I64_MAX_DIGITS
    + 7
    + I64_MAX_DIGITS
    + 2 * (MESSAGE_SIZE - 1)
    + 9;

fn escape(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

fn unescape<const N: usize>(s: &str) -> Result<BoundedString<N>> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            other => {
                return Err(Error::bad_message(format!(
                    "bad escape sequence '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(BoundedString::new(&out))
}

/// Render `rec` as one line, newline included.
pub fn encode(rec: &Record) -> String {
    let mut out = String::with_capacity(256 + rec.message.len());
    escape(&rec.host, &mut out);
    out.push('\t');
    escape(&rec.node, &mut out);
    // Writing to a `String` can't fail
    let _ = write!(out, "\t{}/", rec.thread_id);
    escape(&rec.thread_name, &mut out);
    let _ = write!(
        out,
        "\t{}\t{}\t{}\t{}\t",
        rec.topics, rec.severity, rec.timestamp, rec.timezone
    );
    escape(&rec.message, &mut out);
    out.push('\n');
    out
}

fn field<'a, I: Iterator<Item = &'a str>>(fields: &mut I, name: &str) -> Result<&'a str> {
    fields
        .next()
        .ok_or_else(|| Error::bad_message(format!("missing {} field", name)))
}

fn number<T: std::str::FromStr>(s: &str, name: &str) -> Result<T> {
    s.parse::<T>()
        .map_err(|_| Error::bad_message(format!("bad {} '{}'", name, s)))
}

/// Parse one line (without its terminating newline).
pub fn decode_line(line: &str) -> Result<Record> {
    let mut fields = line.splitn(8, '\t');
    let host = unescape(field(&mut fields, "host")?)?;
    let node = unescape(field(&mut fields, "node")?)?;
    let (tid, tname) = field(&mut fields, "thread")?
        .split_once('/')
        .ok_or_else(|| Error::bad_message("thread field has no '/'"))?;
    let topics = field(&mut fields, "topic")?
        .parse::<Topics>()
        .map_err(|err| Error::bad_message(format!("{}", err)))?;
    let severity = field(&mut fields, "severity")?
        .parse::<Severity>()
        .map_err(|err| Error::bad_message(format!("{}", err)))?;
    let (secs, usecs) = field(&mut fields, "time")?
        .split_once(':')
        .ok_or_else(|| Error::bad_message("time field has no ':'"))?;
    let timezone = number(field(&mut fields, "timezone")?, "timezone")?;
    let message = unescape(field(&mut fields, "message")?)?;
    Ok(Record {
        severity,
        topics,
        message,
        thread_id: number(tid, "thread id")?,
        thread_name: unescape(tname)?,
        timestamp: Timestamp {
            secs: number(secs, "seconds")?,
            usecs: number(usecs, "microseconds")?,
        },
        node,
        host,
        timezone,
    })
}

/// Parse one record from the front of `buf`, returning it along with the number of bytes
/// consumed (newline included).
pub fn decode(buf: &[u8]) -> Result<(Record, usize)> {
    let end = buf
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| Error::bad_message("unterminated text record"))?;
    let line = std::str::from_utf8(&buf[..end])
        .map_err(|err| Error::bad_message(format!("{}", err)))?;
    Ok((decode_line(line)?, end + 1))
}

/// Read one line from `stream`.
///
/// On success the stream is left just past the consumed line, however much was actually read
/// from it. On failure it's left where it was. A clean end of stream is [`Error::EndOfLog`].
pub fn read_stream<R: Read + Seek + ?Sized>(stream: &mut R) -> Result<(Record, usize)> {
    let start = stream.stream_position()?;
    let mut buf = vec![0u8; MAX_SIZE];
    let mut got = 0;
    while got < MAX_SIZE && !buf[..got].contains(&b'\n') {
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
        Ok((rec, consumed)) => {
            stream.seek(SeekFrom::Start(start + consumed as u64))?;
            Ok((rec, consumed))
        }
        Err(err) => {
            stream.seek(SeekFrom::Start(start))?;
            Err(err)
        }
    }
}
