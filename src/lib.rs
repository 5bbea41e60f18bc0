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
//! Multi-sink application logging with live remote reconfiguration
//!
//! # Introduction
//!
//! [syplog](crate) is a logging library for long-running services. An application opens an
//! [`Emitter`] on a _medium_ (a file, a System V shared memory segment, stdout, or nowhere at
//! all) & an _encoder_ (fixed-size binary images or tab-separated text), then emits records
//! tagged with a [`Severity`] and a set of [`Topics`]. Records that pass the emitter's severity
//! threshold and topic mask are stamped with the time, the calling thread & the host identity,
//! encoded, and written; everything else is dropped on the floor cheaply.
//!
//! [`Emitter`]: crate::emitter::Emitter
//! [`Severity`]: crate::facility::Severity
//! [`Topics`]: crate::facility::Topics
//!
//! The threshold & the mask can be changed while the process runs: an emitter can start a
//! control listener on a UDP port or a session bus, through which an operator (using, say,
//! [`Controller`] or the `syplog-ctl` tool) can turn verbosity up to chase a problem & back down
//! again, without a restart.
//!
//! [`Controller`]: crate::control::Controller
//!
//! Every medium can also be opened for reading, so logs can be drained, converted between
//! encodings, or inspected after the fact (c.f. `syplog-dump`).
//!
//! # Usage
//!
//! ```no_run
//! use syplog::{
//!     emitter::Emitter,
//!     encoder::Encoder,
//!     facility::{Severity, Topics},
//!     medium::{MediumConfig, MediumKind},
//!     syplog,
//! };
//!
//! let emitter = Emitter::builder("frontend")
//!     .medium(
//!         MediumConfig::builder()
//!             .kind(MediumKind::File)
//!             .encoder(Encoder::Text)
//!             .file_path("/tmp/frontend.log")
//!             .build(),
//!     )
//!     .severity(Severity::Info)
//!     .listen_udp("127.0.0.1:12345")
//!     .open()
//!     .unwrap();
//!
//! syplog!(emitter, Severity::Info, Topics::NET, "accepted {} connections", 3).unwrap();
//! ```
//!
//! Applications already instrumented with [`tracing`] can route their events through an emitter
//! with [`layer::Layer`].
//!
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html

pub mod bus;
pub mod byte_utils;
pub mod control;
pub mod emitter;
pub mod encoder;
pub mod error;
pub mod facility;
pub mod layer;
pub mod listener;
pub mod medium;
pub mod record;
pub mod transport;

pub use emitter::{Emitter, EmitterHandle};
pub use error::{Error, ErrorCode, Result};
pub use facility::{Severity, Topics};

/// Emit a formatted message through an [`Emitter`](crate::emitter::Emitter) (or an
/// [`EmitterHandle`](crate::emitter::EmitterHandle)).
///
/// ```no_run
/// # use syplog::{emitter::Emitter, facility::{Severity, Topics}, syplog};
/// # let emitter = Emitter::builder("n").open().unwrap();
/// syplog!(emitter, Severity::Warning, Topics::CACHE, "{} entries evicted", 12).unwrap();
/// ```
#[macro_export]
macro_rules! syplog {
    ($emitter:expr, $severity:expr, $topics:expr, $($arg:tt)+) => {
        $emitter.emit($severity, $topics, format_args!($($arg)+))
    };
}

/// Emit at [`Severity::Emerg`](crate::facility::Severity::Emerg)
#[macro_export]
macro_rules! emerg {
    ($emitter:expr, $topics:expr, $($arg:tt)+) => {
        $crate::syplog!($emitter, $crate::facility::Severity::Emerg, $topics, $($arg)+)
    };
}

#[macro_export]
macro_rules! alert {
    ($emitter:expr, $topics:expr, $($arg:tt)+) => {
        $crate::syplog!($emitter, $crate::facility::Severity::Alert, $topics, $($arg)+)
    };
}

#[macro_export]
macro_rules! crit {
    ($emitter:expr, $topics:expr, $($arg:tt)+) => {
        $crate::syplog!($emitter, $crate::facility::Severity::Crit, $topics, $($arg)+)
    };
}

#[macro_export]
macro_rules! error {
    ($emitter:expr, $topics:expr, $($arg:tt)+) => {
        $crate::syplog!($emitter, $crate::facility::Severity::Error, $topics, $($arg)+)
    };
}

#[macro_export]
macro_rules! warning {
    ($emitter:expr, $topics:expr, $($arg:tt)+) => {
        $crate::syplog!($emitter, $crate::facility::Severity::Warning, $topics, $($arg)+)
    };
}

#[macro_export]
macro_rules! notice {
    ($emitter:expr, $topics:expr, $($arg:tt)+) => {
        $crate::syplog!($emitter, $crate::facility::Severity::Notice, $topics, $($arg)+)
    };
}

#[macro_export]
macro_rules! info {
    ($emitter:expr, $topics:expr, $($arg:tt)+) => {
        $crate::syplog!($emitter, $crate::facility::Severity::Info, $topics, $($arg)+)
    };
}

#[macro_export]
macro_rules! debug {
    ($emitter:expr, $topics:expr, $($arg:tt)+) => {
        $crate::syplog!($emitter, $crate::facility::Severity::Debug, $topics, $($arg)+)
    };
}
