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

//! Standard-stream media: records go out on stdout & come in on stdin.

use crate::{
    encoder::{binary, Encoder},
    error::{Error, Result},
    medium::Direction,
    record::Record,
};

use std::io::{BufRead, Write};

pub enum PrintMedium {
    Out(std::io::Stdout),
    In(std::io::Stdin),
}

impl PrintMedium {
    pub fn open(direction: Direction) -> PrintMedium {
        match direction {
            Direction::Write => PrintMedium::Out(std::io::stdout()),
            Direction::Read => PrintMedium::In(std::io::stdin()),
        }
    }
    pub fn write(&mut self, encoder: Encoder, rec: &Record) -> Result<usize> {
        match self {
            PrintMedium::Out(stdout) => {
                let mut out = stdout.lock();
                let n = encoder.write_to_stream(rec, &mut out)?;
                out.flush()?;
                Ok(n)
            }
            PrintMedium::In(_) => Err(Error::bad_params("can't write to stdin")),
        }
    }
    pub fn read(&mut self, encoder: Encoder, rec: &mut Record) -> Result<usize> {
        match self {
            PrintMedium::In(stdin) => read_frame(encoder, rec, &mut stdin.lock()),
            PrintMedium::Out(_) => Err(Error::bad_params("can't read from stdout")),
        }
    }
    pub fn close(&mut self) -> Result<()> {
        match self {
            PrintMedium::Out(stdout) => Ok(stdout.flush()?),
            PrintMedium::In(_) => Ok(()),
        }
    }
}

/// Read one record from a non-seekable stream: a line for text, one fixed-size image for binary.
pub(crate) fn read_frame<R: BufRead + ?Sized>(
    encoder: Encoder,
    rec: &mut Record,
    input: &mut R,
) -> Result<usize> {
    match encoder {
        Encoder::Text => {
            let mut line = Vec::new();
            if input.read_until(b'\n', &mut line)? == 0 {
                return Err(Error::EndOfLog);
            }
            encoder.read_from_buffer(rec, &line)
        }
        Encoder::Binary => {
            let mut buf = [0u8; binary::RECORD_SIZE];
            match input.read_exact(&mut buf) {
                Ok(()) => encoder.read_from_buffer(rec, &buf),
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::EndOfLog),
                Err(err) => Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::facility::{Severity, Topics};

    use std::io::Cursor;

    #[test]
    fn frames() {
        let first = Record::new(Severity::Info, Topics::LOG, "one");
        let second = Record::new(Severity::Debug, Topics::NET, "two");
        for enc in [Encoder::Text, Encoder::Binary] {
            let mut bytes = enc.encode(&first);
            bytes.extend(enc.encode(&second));
            let mut input = Cursor::new(bytes);
            let mut rec = Record::default();
            read_frame(enc, &mut rec, &mut input).unwrap();
            assert_eq!(rec, first);
            read_frame(enc, &mut rec, &mut input).unwrap();
            assert_eq!(rec, second);
            assert!(read_frame(enc, &mut rec, &mut input)
                .unwrap_err()
                .is_end_of_log());
        }
    }
}
