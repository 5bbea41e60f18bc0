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

//! The log record.
//!
//! A [`Record`] is one unit of application-emitted log information. Records are built on the
//! stack for each emission, stamped with the emitter's cached identity plus the current time &
//! thread, handed to exactly one medium & then dropped.
//!
//! Every string field is a [`BoundedString`]: its capacity counts the terminating NUL the
//! fixed-width binary image reserves, so a `BoundedString<N>` holds at most `N - 1` bytes of
//! UTF-8. Anything longer is truncated on a character boundary.

use crate::{
    byte_utils::bytes_from_os_str,
    facility::{Severity, Topics},
};

use chrono::prelude::*;

type StdResult<T, E> = std::result::Result<T, E>;

/// Size of the message field, terminator included
pub const MESSAGE_SIZE: usize = 1024;
/// Size of the thread name field, terminator included
pub const THREAD_NAME_SIZE: usize = 32;
/// Size of the node name field, terminator included
pub const NODE_NAME_SIZE: usize = 64;
/// Size of the host name field, terminator included
pub const HOST_NAME_SIZE: usize = 255;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         BoundedString                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A [`String`] that will never grow past `N - 1` bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BoundedString<const N: usize>(String);

impl<const N: usize> BoundedString<N> {
    /// The most bytes this string will ever hold
    pub const CAPACITY: usize = N - 1;

    pub fn new(s: &str) -> BoundedString<N> {
        let mut x = BoundedString(String::new());
        x.push_str(s);
        x
    }
    /// Append as much of `s` as will fit; returns false if anything was cut off.
    ///
    /// The fixed-width fields these strings are stored in are NUL-terminated, so `s` ends at its
    /// first NUL, if any.
    pub fn push_str(&mut self, s: &str) -> bool {
        let (s, whole) = match s.find('\0') {
            Some(nul) => (&s[..nul], false),
            None => (s, true),
        };
        let room = Self::CAPACITY - self.0.len();
        if s.len() <= room {
            self.0.push_str(s);
            return whole;
        }
        let mut end = room;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.0.push_str(&s[..end]);
        false
    }
    pub fn set(&mut self, s: &str) {
        self.0.clear();
        self.push_str(s);
    }
    pub fn clear(&mut self) {
        self.0.clear();
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> std::ops::Deref for BoundedString<N> {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> std::fmt::Write for BoundedString<N> {
    // Truncation is silent; a long message is still a message.
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl<const N: usize> std::fmt::Display for BoundedString<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        f.write_str(&self.0)
    }
}

impl<const N: usize> std::fmt::Debug for BoundedString<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{:?}", self.0)
    }
}

impl<const N: usize> From<&str> for BoundedString<N> {
    fn from(s: &str) -> Self {
        BoundedString::new(s)
    }
}

impl<const N: usize> PartialEq<&str> for BoundedString<N> {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Record                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Seconds & microseconds since the Unix epoch
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub secs: i64,
    pub usecs: i64,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        let now = Utc::now();
        Timestamp {
            secs: now.timestamp(),
            usecs: now.timestamp_subsec_micros() as i64,
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}:{:06}", self.secs, self.usecs)
    }
}

/// One log record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub severity: Severity,
    pub topics: Topics,
    pub message: BoundedString<MESSAGE_SIZE>,
    pub thread_id: u64,
    pub thread_name: BoundedString<THREAD_NAME_SIZE>,
    pub timestamp: Timestamp,
    pub node: BoundedString<NODE_NAME_SIZE>,
    pub host: BoundedString<HOST_NAME_SIZE>,
    /// offset from UTC, in seconds east
    pub timezone: i64,
}

impl Record {
    pub fn new(severity: Severity, topics: Topics, message: &str) -> Record {
        Record {
            severity,
            topics,
            message: BoundedString::new(message),
            ..Default::default()
        }
    }
    /// Stamp this record with the current time & the calling thread's identity.
    pub fn stamp(&mut self) {
        self.timestamp = Timestamp::now();
        self.thread_id = current_thread_id();
        self.thread_name.clear();
        if let Some(name) = std::thread::current().name() {
            self.thread_name.push_str(name);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        identity discovery                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Platform identity of the calling thread
pub fn current_thread_id() -> u64 {
    // SAFETY: pthread_self has no preconditions & cannot fail
    unsafe { libc::pthread_self() as u64 }
}

/// Attempt to figure-out a name for this host.
///
/// We first try [gethostname()]; failing that we'll take the local IP address, and failing
/// *that* we settle for "-". This cannot fail.
///
/// [gethostname()]: https://man7.org/linux/man-pages/man2/gethostname.2.html
pub fn discover_hostname() -> String {
    hostname::get()
        .ok()
        .map(|hn| String::from_utf8_lossy(&bytes_from_os_str(hn)).into_owned())
        .filter(|hn| !hn.is_empty() && hn.len() < HOST_NAME_SIZE)
        .or_else(|| {
            local_ip_address::local_ip()
                .ok()
                .map(|ip| ip.to_string())
        })
        .unwrap_or_else(|| "-".to_string())
}

/// The local timezone, as seconds east of UTC
pub fn local_timezone() -> i64 {
    Local::now().offset().local_minus_utc() as i64
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fmt::Write;

    #[test]
    fn bounded_strings() {
        let mut s: BoundedString<8> = BoundedString::new("hello");
        assert_eq!(s, "hello");
        assert!(!s.push_str(", world"));
        assert_eq!(s.as_str(), "hello, ");
        assert_eq!(s.len(), BoundedString::<8>::CAPACITY);

        // multi-byte characters are never split
        let s: BoundedString<6> = BoundedString::new("ab世界");
        assert_eq!(s.as_str(), "ab世");

        let mut s: BoundedString<MESSAGE_SIZE> = BoundedString::default();
        for i in 0..1000 {
            write!(s, "{} ", i).unwrap();
        }
        assert_eq!(s.len(), MESSAGE_SIZE - 1);

        let mut s: BoundedString<16> = BoundedString::new("before\0after");
        assert_eq!(s.as_str(), "before");
        assert!(!s.push_str("\0"));
        assert_eq!(s.as_str(), "before");
    }

    #[test]
    fn stamping() {
        let mut rec = Record::new(Severity::Info, Topics::NET, "hi");
        let before = Timestamp::now();
        std::thread::Builder::new()
            .name("stamper".to_string())
            .spawn(move || {
                rec.stamp();
                rec
            })
            .unwrap()
            .join()
            .map(|rec| {
                assert_eq!(rec.thread_name, "stamper");
                assert!(rec.timestamp >= before);
                assert!(rec.timestamp.usecs < 1_000_000);
                assert_ne!(rec.thread_id, 0);
            })
            .unwrap();
    }

    #[test]
    fn identity() {
        let hn = discover_hostname();
        assert!(!hn.is_empty());
        let tz = local_timezone();
        assert!(tz.abs() <= 14 * 3600);
        assert_eq!(format!("{}", Timestamp { secs: 12, usecs: 34 }), "12:000034");
    }
}
