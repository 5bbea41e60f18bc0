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
//! [syplog](crate) errors
//!
//! Every fallible operation in this crate returns [`Result`]. Each [`Error`] variant corresponds
//! to exactly one stable numeric code ([`ErrorCode`]); those codes are what crosses process
//! boundaries (tools print them, operators grep for them), so they never change.

use backtrace::Backtrace;

/// Stable numeric error codes.
///
/// The numeric values are part of the external interface & must not be re-assigned.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError = 0,
    BadParams = 10001,
    FileOpen = 10002,
    EndOfLog = 10003,
    NotImplemented = 10004,
    System = 10005,
    NotInitialized = 10006,
    Truncated = 10007,
    BadMessage = 10008,
    Bus = 10009,
    NoMemory = 10010,
}

impl ErrorCode {
    /// Human-readable description of this code
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "no error",
            ErrorCode::BadParams => "bad parameters passed to function",
            ErrorCode::FileOpen => "can't open file",
            ErrorCode::EndOfLog => "end of log reached",
            ErrorCode::NotImplemented => "functionality not implemented",
            ErrorCode::System => "system error",
            ErrorCode::NotInitialized => "structure not initialized",
            ErrorCode::Truncated => "requested size was truncated",
            ErrorCode::BadMessage => "malformed control message",
            ErrorCode::Bus => "session bus error",
            ErrorCode::NoMemory => "out of memory",
        }
    }
    /// Translate a host OS error number into an [`ErrorCode`].
    pub fn from_errno(errno: i32) -> ErrorCode {
        match errno {
            0 => ErrorCode::NoError,
            libc::ENOMEM => ErrorCode::NoMemory,
            libc::EINVAL | libc::EBADF | libc::EFAULT => ErrorCode::BadParams,
            libc::EMSGSIZE => ErrorCode::Truncated,
            _ => ErrorCode::System,
        }
    }
    /// Look up the code for its numeric value
    pub fn from_u32(x: u32) -> Option<ErrorCode> {
        Some(match x {
            0 => ErrorCode::NoError,
            10001 => ErrorCode::BadParams,
            10002 => ErrorCode::FileOpen,
            10003 => ErrorCode::EndOfLog,
            10004 => ErrorCode::NotImplemented,
            10005 => ErrorCode::System,
            10006 => ErrorCode::NotInitialized,
            10007 => ErrorCode::Truncated,
            10008 => ErrorCode::BadMessage,
            10009 => ErrorCode::Bus,
            10010 => ErrorCode::NoMemory,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), *self as u32)
    }
}

/// [syplog](crate) error type
///
/// Like the rest of this crate, we eschew libraries like [thiserror], [anyhow] & [Snafu] in favor
/// of a straightforward enumeration with a few match arms chosen on the basis what the caller will
/// need to repond.
///
/// [thiserror]: https://docs.rs/thiserror
/// [anyhow]: https://docs.rs/anyhow
/// [Snafu]: https://docs.rs/snafu/latest/snafu
#[non_exhaustive]
pub enum Error {
    /// The caller violated an API contract (bad argument, wrong direction, unknown name)
    BadParams { what: String, back: Backtrace },
    /// A file-backed medium couldn't open its file
    FileOpen {
        path: std::path::PathBuf,
        source: std::io::Error,
        back: Backtrace,
    },
    /// A reader reached the end of its log; not really a failure
    EndOfLog,
    /// The requested operation isn't supported (socket targets, e.g.)
    NotImplemented { what: &'static str },
    /// General OS-level failure
    System {
        source: std::io::Error,
        back: Backtrace,
    },
    /// Operation on a medium that isn't open
    NotInitialized,
    /// A size request was shrunk, or a transfer was cut short
    Truncated {
        requested: u64,
        granted: u64,
        back: Backtrace,
    },
    /// A control message or serialized record couldn't be parsed
    BadMessage { what: String, back: Backtrace },
    /// Session bus failure
    Bus { what: String, back: Backtrace },
    /// The OS refused us memory
    NoMemory { back: Backtrace },
}

impl Error {
    /// The stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::BadParams { .. } => ErrorCode::BadParams,
            Error::FileOpen { .. } => ErrorCode::FileOpen,
            Error::EndOfLog => ErrorCode::EndOfLog,
            Error::NotImplemented { .. } => ErrorCode::NotImplemented,
            Error::System { .. } => ErrorCode::System,
            Error::NotInitialized => ErrorCode::NotInitialized,
            Error::Truncated { .. } => ErrorCode::Truncated,
            Error::BadMessage { .. } => ErrorCode::BadMessage,
            Error::Bus { .. } => ErrorCode::Bus,
            Error::NoMemory { .. } => ErrorCode::NoMemory,
        }
    }
    pub fn is_end_of_log(&self) -> bool {
        matches!(self, Error::EndOfLog)
    }
    pub(crate) fn bad_params<S: Into<String>>(what: S) -> Error {
        Error::BadParams {
            what: what.into(),
            back: Backtrace::new(),
        }
    }
    pub(crate) fn bad_message<S: Into<String>>(what: S) -> Error {
        Error::BadMessage {
            what: what.into(),
            back: Backtrace::new(),
        }
    }
    pub(crate) fn bus<S: Into<String>>(what: S) -> Error {
        Error::Bus {
            what: what.into(),
            back: Backtrace::new(),
        }
    }
    /// Capture the last OS error (`errno`) after a failed libc call.
    pub(crate) fn last_os_error() -> Error {
        Error::from(std::io::Error::last_os_error())
    }
}

/// Translate I/O failures through the host errno, when there is one.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error().map(ErrorCode::from_errno) {
            Some(ErrorCode::NoMemory) => Error::NoMemory {
                back: Backtrace::new(),
            },
            Some(ErrorCode::BadParams) => Error::BadParams {
                what: format!("{}", err),
                back: Backtrace::new(),
            },
            Some(ErrorCode::Truncated) => Error::Truncated {
                requested: 0,
                granted: 0,
                back: Backtrace::new(),
            },
            _ => Error::System {
                source: err,
                back: Backtrace::new(),
            },
        }
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadParams { what, .. } => write!(f, "Bad parameters: {}", what),
            Error::FileOpen { path, source, .. } => {
                write!(f, "Couldn't open {}: {}", path.display(), source)
            }
            Error::EndOfLog => write!(f, "End of log"),
            Error::NotImplemented { what } => write!(f, "{} is not implemented", what),
            Error::System { source, .. } => write!(f, "System error: {}", source),
            Error::NotInitialized => write!(f, "Not open, or already closed"),
            Error::Truncated {
                requested, granted, ..
            } => write!(
                f,
                "Requested {} bytes, but only {} were granted",
                requested, granted
            ),
            Error::BadMessage { what, .. } => write!(f, "Malformed message: {}", what),
            Error::Bus { what, .. } => write!(f, "Session bus error: {}", what),
            Error::NoMemory { .. } => write!(f, "Out of memory"),
            _ => write!(f, "Other syplog error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadParams { back, .. } => write!(f, "{}\n{:?}", self, back),
            Error::FileOpen { back, .. } => write!(f, "{}\n{:?}", self, back),
            Error::System { back, .. } => write!(f, "{}\n{:?}", self, back),
            Error::Truncated { back, .. } => write!(f, "{}\n{:?}", self, back),
            Error::BadMessage { back, .. } => write!(f, "{}\n{:?}", self, back),
            Error::Bus { back, .. } => write!(f, "{}\n{:?}", self, back),
            Error::NoMemory { back } => write!(f, "{}\n{:?}", self, back),
            err => write!(f, "syplog error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::FileOpen { source, .. } | Error::System { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
