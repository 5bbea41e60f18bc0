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

//! File-backed media.

use crate::{
    encoder::Encoder,
    error::{Error, Result},
    medium::Direction,
    record::Record,
};

use backtrace::Backtrace;

use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom},
    path::{Path, PathBuf},
};

/// A log file, opened for reading or writing.
///
/// Unbounded writers append. Bounded (circular) writers seek to the cursor before each record.
pub struct FileMedium {
    file: File,
    path: PathBuf,
    append: bool,
}

impl FileMedium {
    /// Open `path`; returns the medium along with the offset at which the cursor should start.
    pub fn open(path: &Path, direction: Direction, length: u64) -> Result<(FileMedium, u64)> {
        let append = direction == Direction::Write && length == 0;
        let file = match direction {
            Direction::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .append(append)
                .open(path),
            Direction::Read => File::open(path),
        }
        .map_err(|err| Error::FileOpen {
            path: path.to_path_buf(),
            source: err,
            back: Backtrace::new(),
        })?;
        let pos = match direction {
            Direction::Write => file.metadata()?.len(),
            Direction::Read => 0,
        };
        Ok((
            FileMedium {
                file,
                path: path.to_path_buf(),
                append,
            },
            pos,
        ))
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn write(&mut self, encoder: Encoder, rec: &Record, pos: u64) -> Result<usize> {
        if !self.append {
            self.file.seek(SeekFrom::Start(pos))?;
        }
        encoder.write_to_stream(rec, &mut self.file)
    }
    /// Where the underlying file's cursor actually is, if that can be had
    pub fn position(&mut self) -> Option<u64> {
        self.file.stream_position().ok()
    }
    pub fn read(&mut self, encoder: Encoder, rec: &mut Record) -> Result<usize> {
        encoder.read_from_stream(rec, &mut self.file)
    }
    pub fn close(self) -> Result<()> {
        self.file.sync_data().or_else(|err| {
            // read-only handles (and some special files) can't be synced; that's fine
            if err.raw_os_error() == Some(libc::EINVAL) || err.raw_os_error() == Some(libc::EBADF)
            {
                Ok(())
            } else {
                Err(err.into())
            }
        })
    }
}
