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
//! Severity & topic definitions.
//!
//! [`Severity`] is the ordered importance of a record (lower is more urgent); [`Topics`] is the
//! 64-bit bitmap of application concerns a record belongs to. The name tables in this module are
//! the single source of truth for both the text encoder & the parsers below; adding a severity or
//! a topic means updating the table, nothing else.

use crate::error::{Error, Result};

type StdResult<T, E> = std::result::Result<T, E>;

/// Twelve severity levels. The first eight mirror the levels in `<syslog.h>`; the last four are
/// increasingly chatty debug levels.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// system is unusable
    Emerg = 0,
    /// action must be take immediately
    Alert = 1,
    /// critical conditions
    Crit = 2,
    /// error conditions
    Error = 3,
    /// warning conditions
    Warning = 4,
    /// normal, but significant condition
    Notice = 5,
    /// informational message
    Info = 6,
    /// debug-level message
    Debug = 7,
    /// lock acquisition & release
    Lock = 8,
    /// function entry & exit
    Func = 9,
    /// data dumps
    Data = 10,
    /// loop iterations
    Loops = 11,
}

const SEVERITY_NAMES: [(Severity, &str); 12] = [
    (Severity::Emerg, "EMERG"),
    (Severity::Alert, "ALERT"),
    (Severity::Crit, "CRIT"),
    (Severity::Error, "ERROR"),
    (Severity::Warning, "WARNING"),
    (Severity::Notice, "NOTICE"),
    (Severity::Info, "INFO"),
    (Severity::Debug, "DEBUG"),
    (Severity::Lock, "LOCK"),
    (Severity::Func, "FUNC"),
    (Severity::Data, "DATA"),
    (Severity::Loops, "LOOPS"),
];

impl Severity {
    /// The threshold a freshly-opened emitter starts with
    #[cfg(debug_assertions)]
    pub const DEFAULT: Severity = Severity::Debug;
    /// The threshold a freshly-opened emitter starts with
    #[cfg(not(debug_assertions))]
    pub const DEFAULT: Severity = Severity::Error;

    /// Map an ordinal to a [`Severity`]; `None` if it's out of range.
    pub fn from_ordinal(x: u32) -> Option<Severity> {
        SEVERITY_NAMES.get(x as usize).map(|(sev, _)| *sev)
    }
    /// Map an ordinal to a [`Severity`], clamping anything past the least urgent level to
    /// [`Severity::Loops`].
    pub fn saturating_from(x: u32) -> Severity {
        Severity::from_ordinal(x).unwrap_or(Severity::Loops)
    }
    pub fn name(&self) -> &'static str {
        SEVERITY_NAMES[*self as usize].1
    }
    pub fn iter() -> impl Iterator<Item = Severity> {
        SEVERITY_NAMES.iter().map(|(sev, _)| *sev)
    }
}

impl std::default::Default for Severity {
    fn default() -> Self {
        Severity::DEFAULT
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Severity {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        SEVERITY_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(sev, _)| *sev)
            .ok_or_else(|| Error::bad_params(format!("unknown severity '{}'", s)))
    }
}

/// A set of topics, represented as a 64-bit bitmap.
///
/// A record may belong to several topics; it is kept by an emitter if its set intersects the
/// emitter's enabled set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Topics(u64);

impl Topics {
    pub const NONE: Topics = Topics(0);
    pub const UNKNOWN: Topics = Topics(0);
    pub const LOG: Topics = Topics(0x1);
    pub const THREADING: Topics = Topics(0x2);
    pub const NET: Topics = Topics(0x4);
    pub const CACHE: Topics = Topics(0x8);
    pub const DATA: Topics = Topics(0x10);
    pub const MEMORY: Topics = Topics(0x20);
    pub const CONFIG: Topics = Topics(0x40);
    pub const BUS: Topics = Topics(0x80);
    pub const ZFSD: Topics = Topics(0x10000);
    pub const ALL: Topics = Topics(u64::MAX);

    pub const fn from_bits(bits: u64) -> Topics {
        Topics(bits)
    }
    pub const fn bits(&self) -> u64 {
        self.0
    }
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
    /// True if every topic in `other` is also in `self`
    pub const fn contains(&self, other: Topics) -> bool {
        self.0 & other.0 == other.0
    }
    /// True if `self` & `other` share at least one topic
    pub const fn intersects(&self, other: Topics) -> bool {
        self.0 & other.0 != 0
    }
    pub fn add(&mut self, other: Topics) {
        self.0 |= other.0;
    }
    pub fn remove(&mut self, other: Topics) {
        self.0 &= !other.0;
    }
}

const TOPIC_NAMES: [(Topics, &str); 9] = [
    (Topics::LOG, "LOG"),
    (Topics::THREADING, "THREADING"),
    (Topics::NET, "NET"),
    (Topics::CACHE, "CACHE"),
    (Topics::DATA, "DATA"),
    (Topics::MEMORY, "MEMORY"),
    (Topics::CONFIG, "CONFIG"),
    (Topics::BUS, "BUS"),
    (Topics::ZFSD, "ZFSD"),
];

impl std::ops::BitOr for Topics {
    type Output = Topics;
    fn bitor(self, rhs: Topics) -> Topics {
        Topics(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Topics {
    fn bitor_assign(&mut self, rhs: Topics) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for Topics {
    type Output = Topics;
    fn bitand(self, rhs: Topics) -> Topics {
        Topics(self.0 & rhs.0)
    }
}

impl std::ops::Not for Topics {
    type Output = Topics;
    fn not(self) -> Topics {
        Topics(!self.0)
    }
}

impl std::fmt::Display for Topics {
    /// `ALL` for every bit, `UNKNOWN` for none, otherwise the known names joined with `|`,
    /// followed by a hex literal for any bits that have no name.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        if *self == Topics::ALL {
            return write!(f, "ALL");
        }
        if self.is_empty() {
            return write!(f, "UNKNOWN");
        }
        let mut rest = self.0;
        let mut sep = "";
        for (topic, name) in TOPIC_NAMES.iter() {
            if self.contains(*topic) {
                write!(f, "{}{}", sep, name)?;
                rest &= !topic.0;
                sep = "|";
            }
        }
        if rest != 0 {
            write!(f, "{}{:#x}", sep, rest)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Topics {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ALL" => return Ok(Topics::ALL),
            "UNKNOWN" | "NONE" => return Ok(Topics::NONE),
            _ => (),
        }
        s.split('|').try_fold(Topics::NONE, |acc, part| {
            let part = part.trim();
            if let Some(hex) = part.strip_prefix("0x") {
                return u64::from_str_radix(hex, 16)
                    .map(|bits| acc | Topics(bits))
                    .map_err(|_| Error::bad_params(format!("bad topic literal '{}'", part)));
            }
            TOPIC_NAMES
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(part))
                .map(|(topic, _)| acc | *topic)
                .ok_or_else(|| Error::bad_params(format!("unknown topic '{}'", part)))
        })
    }
}

#[cfg(test)]
mod severity_topic_tests {
    use super::*;

    #[test]
    fn severity_ordinals() {
        assert_eq!(0, Severity::Emerg as u32);
        assert_eq!(4, Severity::Warning as u32);
        assert_eq!(11, Severity::Loops as u32);
        assert!(Severity::Emerg < Severity::Loops);
        assert_eq!(Some(Severity::Debug), Severity::from_ordinal(7));
        assert_eq!(None, Severity::from_ordinal(12));
        assert_eq!(Severity::Loops, Severity::saturating_from(9999));
        assert_eq!(12, Severity::iter().count());
    }

    #[test]
    fn severity_names() {
        assert_eq!(format!("{}", Severity::Warning), "WARNING");
        assert_eq!("CRIT".parse::<Severity>().unwrap(), Severity::Crit);
        assert_eq!("loops".parse::<Severity>().unwrap(), Severity::Loops);
        assert!("VERBOSE".parse::<Severity>().is_err());
        for sev in Severity::iter() {
            assert_eq!(sev, sev.name().parse::<Severity>().unwrap());
        }
    }

    #[test]
    fn topic_names() {
        assert_eq!(format!("{}", Topics::ALL), "ALL");
        assert_eq!(format!("{}", Topics::NONE), "UNKNOWN");
        assert_eq!(format!("{}", Topics::NET), "NET");
        assert_eq!(format!("{}", Topics::NET | Topics::CACHE), "NET|CACHE");
        assert_eq!(
            format!("{}", Topics::LOG | Topics::from_bits(0x100_0000)),
            "LOG|0x1000000"
        );
        assert_eq!(format!("{}", Topics::from_bits(0x200)), "0x200");

        for bits in [0u64, 1, 0x4, 0x1c, 0x10000, 0x8000_0000_0000_0001, u64::MAX - 1] {
            let t = Topics::from_bits(bits);
            assert_eq!(t, format!("{}", t).parse::<Topics>().unwrap());
        }
        assert!("NETWORK".parse::<Topics>().is_err());
        assert!("0xzz".parse::<Topics>().is_err());
    }

    #[test]
    fn topic_ops() {
        let mut t = Topics::LOG;
        t.add(Topics::NET);
        assert!(t.contains(Topics::NET));
        assert!(t.intersects(Topics::NET | Topics::CACHE));
        assert!(!t.intersects(Topics::CACHE));
        t.remove(Topics::LOG);
        assert_eq!(t, Topics::NET);
        assert_eq!(!Topics::ALL, Topics::NONE);
        assert_eq!((Topics::ALL & Topics::DATA).bits(), 0x10);
    }
}
