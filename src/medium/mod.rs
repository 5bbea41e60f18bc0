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

//! Log media.
//!
//! A [`Medium`] is a configured sink for records (or, in the read direction, a source of them)
//! paired with an [`Encoder`]. Four kinds are supported:
//!
//! - `file`: a regular file, optionally bounded (circular)
//! - `shm`: a System V shared-memory segment, always circular
//! - `print`: stdout for writing, stdin for reading
//! - `null`: swallows writes, yields nothing on read
//!
//! Every medium has the same life cycle: [`Medium::open`] produces an open medium,
//! [`Medium::access`] moves one record in the configured direction & [`Medium::close`] releases
//! the underlying resource. Accessing a closed medium is [`Error::NotInitialized`]; closing one
//! twice is harmless.
//!
//! # Examples
//!
//! ```no_run
//! use syplog::{encoder::Encoder, facility::{Severity, Topics}, medium::{Medium, MediumConfig, MediumKind}};
//! use syplog::record::Record;
//!
//! let mut medium = Medium::open(
//!     &MediumConfig::builder()
//!         .kind(MediumKind::File)
//!         .encoder(Encoder::Text)
//!         .file_path("/tmp/example.log")
//!         .length("64K")
//!         .unwrap()
//!         .build(),
//! )
//! .unwrap();
//! let mut rec = Record::new(Severity::Info, Topics::LOG, "Hello, world!");
//! medium.access(&mut rec).unwrap();
//! medium.close().unwrap();
//! ```

pub mod file;
pub mod print;
pub mod shm;

use crate::{
    encoder::Encoder,
    error::{Error, Result},
    record::Record,
};

use file::FileMedium;
use print::PrintMedium;
use shm::ShmMedium;

use backtrace::Backtrace;

use std::path::PathBuf;

type StdResult<T, E> = std::result::Result<T, E>;

/// Default log file
pub const DEFAULT_FILE_PATH: &str = "/var/log/zfsd.log";
/// Default shared-memory key
pub const DEFAULT_SHM_KEY: i32 = 4224;
/// Default shared-memory segment size, in bytes
pub const DEFAULT_SHM_SIZE: u64 = 4096;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      configuration surface                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Which way records flow through a medium
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                Direction::Read => "read",
                Direction::Write => "write",
            }
        )
    }
}

impl std::str::FromStr for Direction {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Direction::Read),
            "write" => Ok(Direction::Write),
            _ => Err(Error::bad_params(format!("unknown direction '{}'", s))),
        }
    }
}

/// The kinds of medium
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MediumKind {
    File,
    Shm,
    Print,
    Null,
}

impl std::fmt::Display for MediumKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                MediumKind::File => "file",
                MediumKind::Shm => "shm",
                MediumKind::Print => "print",
                MediumKind::Null => "null",
            }
        )
    }
}

impl std::str::FromStr for MediumKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(MediumKind::File),
            "shm" => Ok(MediumKind::Shm),
            "print" => Ok(MediumKind::Print),
            "null" => Ok(MediumKind::Null),
            _ => Err(Error::bad_params(format!("unknown medium '{}'", s))),
        }
    }
}

/// Parse a length, with an optional K, M or G suffix (powers of 1024).
pub fn parse_length(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, scale) = match s.char_indices().last() {
        Some((i, 'k' | 'K')) => (&s[..i], 1u64 << 10),
        Some((i, 'm' | 'M')) => (&s[..i], 1u64 << 20),
        Some((i, 'g' | 'G')) => (&s[..i], 1u64 << 30),
        _ => (s, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(|| Error::bad_params(format!("bad length '{}'", s)))
}

/// Everything needed to open a [`Medium`]
#[derive(Clone, Debug)]
pub struct MediumConfig {
    kind: MediumKind,
    encoder: Encoder,
    direction: Direction,
    length: u64,
    file_path: PathBuf,
    shm_key: i32,
    shm_size: Option<u64>,
    strict_size: bool,
}

impl std::default::Default for MediumConfig {
    fn default() -> Self {
        MediumConfig {
            kind: MediumKind::File,
            encoder: Encoder::Binary,
            direction: Direction::Write,
            length: 0,
            file_path: PathBuf::from(DEFAULT_FILE_PATH),
            shm_key: DEFAULT_SHM_KEY,
            shm_size: None,
            strict_size: false,
        }
    }
}

impl MediumConfig {
    pub fn builder() -> MediumConfigBuilder {
        MediumConfigBuilder {
            imp: MediumConfig::default(),
        }
    }
    pub fn kind(&self) -> MediumKind {
        self.kind
    }
    pub fn encoder(&self) -> Encoder {
        self.encoder
    }
    pub fn direction(&self) -> Direction {
        self.direction
    }
    pub fn length(&self) -> u64 {
        self.length
    }
    pub fn file_path(&self) -> &std::path::Path {
        &self.file_path
    }
    pub fn shm_key(&self) -> i32 {
        self.shm_key
    }
    /// The segment size a shared-memory writer will ask for: the explicit segment size if one
    /// was given, else the bound length, else [`DEFAULT_SHM_SIZE`].
    pub fn shm_size(&self) -> u64 {
        self.shm_size.unwrap_or(if self.length > 0 {
            self.length
        } else {
            DEFAULT_SHM_SIZE
        })
    }
    /// The same configuration, reversed
    pub fn reversed(&self) -> MediumConfig {
        let mut cfg = self.clone();
        cfg.direction = match self.direction {
            Direction::Read => Direction::Write,
            Direction::Write => Direction::Read,
        };
        cfg
    }
}

pub struct MediumConfigBuilder {
    imp: MediumConfig,
}

impl MediumConfigBuilder {
    pub fn kind(mut self, kind: MediumKind) -> Self {
        self.imp.kind = kind;
        self
    }
    pub fn encoder(mut self, encoder: Encoder) -> Self {
        self.imp.encoder = encoder;
        self
    }
    pub fn direction(mut self, direction: Direction) -> Self {
        self.imp.direction = direction;
        self
    }
    /// Bound the medium to `length` bytes; zero means unbounded.
    pub fn length_bytes(mut self, length: u64) -> Self {
        self.imp.length = length;
        self
    }
    /// Bound the medium, parsing `length` as per [`parse_length`].
    pub fn length(mut self, length: &str) -> Result<Self> {
        self.imp.length = parse_length(length)?;
        Ok(self)
    }
    pub fn file_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.imp.file_path = path.into();
        self
    }
    pub fn shm_key(mut self, key: i32) -> Self {
        self.imp.shm_key = key;
        self
    }
    pub fn shm_size(mut self, size: u64) -> Self {
        self.imp.shm_size = Some(size);
        self
    }
    /// Fail the open, rather than silently shrinking, when a shared-memory request exceeds the
    /// platform maximum.
    pub fn strict_size(mut self, strict: bool) -> Self {
        self.imp.strict_size = strict;
        self
    }
    pub fn build(self) -> MediumConfig {
        self.imp
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          struct Medium                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

enum Backend {
    File(FileMedium),
    Shm(ShmMedium),
    Print(PrintMedium),
    Null,
}

/// An open (or closed) log medium
pub struct Medium {
    kind: MediumKind,
    encoder: Encoder,
    direction: Direction,
    /// zero for unbounded, else the size of the circular log
    length: u64,
    pos: u64,
    capped: bool,
    // `None` once closed
    backend: Option<Backend>,
}

impl Medium {
    /// Open a medium as described by `cfg`.
    pub fn open(cfg: &MediumConfig) -> Result<Medium> {
        let encoder = cfg.encoder;
        let max = encoder.max_size() as u64;
        let mut capped = false;
        let (backend, length, pos) = match cfg.kind {
            MediumKind::File => {
                if cfg.length > 0 && cfg.length < max {
                    return Err(Error::bad_params(format!(
                        "a {}-byte log can't hold one {}-byte record",
                        cfg.length, max
                    )));
                }
                let (file, pos) = FileMedium::open(&cfg.file_path, cfg.direction, cfg.length)?;
                (Backend::File(file), cfg.length, pos)
            }
            MediumKind::Shm => {
                let shm = match cfg.direction {
                    Direction::Write => {
                        let requested = cfg.shm_size();
                        if requested > shm::SHM_MAX && cfg.strict_size {
                            return Err(Error::Truncated {
                                requested,
                                granted: shm::SHM_MAX,
                                back: Backtrace::new(),
                            });
                        }
                        let (shm, was_capped) = ShmMedium::create(cfg.shm_key, requested)?;
                        if was_capped {
                            tracing::warn!(
                                "shared memory request of {} bytes shrunk to {}",
                                requested,
                                shm.size()
                            );
                        }
                        capped = was_capped;
                        shm
                    }
                    Direction::Read => ShmMedium::attach(cfg.shm_key)?,
                };
                if (shm.size() as u64) < max {
                    return Err(Error::bad_params(format!(
                        "a {}-byte segment can't hold one {}-byte record",
                        shm.size(),
                        max
                    )));
                }
                let length = shm.size() as u64;
                (Backend::Shm(shm), length, 0)
            }
            MediumKind::Print => (Backend::Print(PrintMedium::open(cfg.direction)), 0, 0),
            MediumKind::Null => (Backend::Null, 0, 0),
        };
        let mut medium = Medium {
            kind: cfg.kind,
            encoder,
            direction: cfg.direction,
            length,
            pos,
            capped,
            backend: Some(backend),
        };
        if medium.direction == Direction::Write {
            medium.wrap();
        }
        tracing::debug!(
            "opened {} medium ({}, {}) at position {}",
            medium.kind,
            medium.encoder,
            medium.direction,
            medium.pos
        );
        Ok(medium)
    }

    // Ensure the next record fits before the end of a bounded medium.
    fn wrap(&mut self) {
        if self.length > 0 && self.pos + self.encoder.max_size() as u64 > self.length {
            self.pos = 0;
        }
    }

    /// Move one record: on a write-direction medium serialize `rec`, on a read-direction medium
    /// parse the next record into `rec`. Returns the number of bytes transferred.
    pub fn access(&mut self, rec: &mut Record) -> Result<usize> {
        let encoder = self.encoder;
        match self.direction {
            Direction::Write => {
                self.wrap();
                let pos = self.pos;
                let n = match self.backend.as_mut().ok_or(Error::NotInitialized)? {
                    // a write that fails partway still moved the file's cursor
                    Backend::File(file) => match file.write(encoder, rec, pos) {
                        Ok(n) => n,
                        Err(err) => {
                            if let Some(at) = file.position() {
                                self.pos = at;
                            }
                            return Err(err);
                        }
                    },
                    Backend::Shm(shm) => shm.write(encoder, rec, pos)?,
                    Backend::Print(print) => print.write(encoder, rec)?,
                    Backend::Null => return Ok(0),
                };
                if n == 0 {
                    return Err(Error::Truncated {
                        requested: encoder.max_size() as u64,
                        granted: 0,
                        back: Backtrace::new(),
                    });
                }
                self.pos += match self.kind {
                    MediumKind::Shm => encoder.max_size() as u64,
                    _ => n as u64,
                };
                Ok(n)
            }
            Direction::Read => {
                let pos = self.pos;
                let n = match self.backend.as_mut().ok_or(Error::NotInitialized)? {
                    Backend::File(file) => file.read(encoder, rec)?,
                    Backend::Shm(shm) => shm.read(encoder, rec, pos)?,
                    Backend::Print(print) => print.read(encoder, rec)?,
                    Backend::Null => return Err(Error::EndOfLog),
                };
                self.pos += match self.kind {
                    MediumKind::Shm => encoder.max_size() as u64,
                    _ => n as u64,
                };
                Ok(n)
            }
        }
    }

    /// Write one record; the medium must be open for writing.
    pub fn write_record(&mut self, rec: &Record) -> Result<usize> {
        if self.direction != Direction::Write {
            return Err(Error::bad_params("medium is open for reading"));
        }
        let mut rec = rec.clone();
        self.access(&mut rec)
    }

    /// Read the next record; `Ok(None)` at the end of the log.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if self.direction != Direction::Read {
            return Err(Error::bad_params("medium is open for writing"));
        }
        let mut rec = Record::default();
        match self.access(&mut rec) {
            Ok(_) => Ok(Some(rec)),
            Err(err) if err.is_end_of_log() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Release the underlying resource. Shared-memory segments are detached, not destroyed.
    pub fn close(&mut self) -> Result<()> {
        match self.backend.take() {
            Some(Backend::File(file)) => file.close(),
            Some(Backend::Shm(shm)) => {
                drop(shm);
                Ok(())
            }
            Some(Backend::Print(mut print)) => print.close(),
            Some(Backend::Null) | None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }
    pub fn kind(&self) -> MediumKind {
        self.kind
    }
    pub fn encoder(&self) -> Encoder {
        self.encoder
    }
    pub fn direction(&self) -> Direction {
        self.direction
    }
    /// The bound on this medium; zero if unbounded
    pub fn length(&self) -> u64 {
        self.length
    }
    /// Current cursor, in bytes from the start of the medium
    pub fn position(&self) -> u64 {
        self.pos
    }
    /// True if a shared-memory request was shrunk to the platform maximum
    pub fn size_capped(&self) -> bool {
        self.capped
    }
}
