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

//! Bridge from [`tracing`] into an [`Emitter`].
//!
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html
//! [`Emitter`]: crate::emitter::Emitter
//!
//! [`Layer`] implements the [`tracing-subscriber`] [`Layer`] trait so that an application already
//! instrumented with [`tracing`] can send its events through a syplog emitter, picking up the
//! emitter's severity & topic filtering (& its remote control) on the way:
//!
//! [`tracing-subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
//! [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
//!
//! ```no_run
//! use syplog::{emitter::Emitter, layer::Layer};
//! use tracing::info;
//! use tracing_subscriber::{layer::SubscriberExt, registry::Registry};
//!
//! let emitter = Emitter::builder("my-node").open().unwrap();
//! let subscriber = Registry::default().with(Layer::new(emitter.handle()));
//! let _guard = tracing::subscriber::set_default(subscriber);
//!
//! info!(topic = 4u64, "Hello, world!");
//! ```
//!
//! The event's "message" field becomes the record's message; an optional "topic" field (an
//! unsigned bitmap) selects its topics, which otherwise default to [`Topics::LOG`]. This crate's
//! own diagnostics (events whose target begins with "syplog") are never forwarded, since they may
//! well be reporting on the emitter in question.

use crate::{
    emitter::EmitterHandle,
    facility::{Severity, Topics},
};

use tracing::Event;
use tracing_subscriber::layer::Context;

/// The default mapping from [`tracing`] levels to [`Severity`]
///
/// [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html
pub fn default_level_mapping(level: &tracing::Level) -> Severity {
    match level {
        &tracing::Level::TRACE => Severity::Func,
        &tracing::Level::DEBUG => Severity::Debug,
        &tracing::Level::INFO => Severity::Info,
        &tracing::Level::WARN => Severity::Warning,
        &tracing::Level::ERROR => Severity::Error,
    }
}

pub struct Layer {
    target: EmitterHandle,
    map_level: Box<dyn Fn(&tracing::Level) -> Severity + Send + Sync>,
    topics: Topics,
}

impl Layer {
    pub fn new(target: EmitterHandle) -> Layer {
        Layer {
            target,
            map_level: Box::new(default_level_mapping),
            topics: Topics::LOG,
        }
    }
    pub fn with_level_mapping<F>(mut self, map_level: F) -> Self
    where
        F: Fn(&tracing::Level) -> Severity + Send + Sync + 'static,
    {
        self.map_level = Box::new(map_level);
        self
    }
    /// Topics for events that don't carry a "topic" field
    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }
}

#[derive(Default)]
struct MessageEventVisitor {
    message: Option<String>,
    topics: Option<Topics>,
}

impl tracing::field::Visit for MessageEventVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            // The tracing macros pre-format the message into a `std::fmt::Arguments`, whose
            // `Debug` output has no enclosing quotes.
            self.message = Some(format!("{:?}", value));
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        if field.name() == "topic" {
            self.topics = Some(Topics::from_bits(value));
        }
    }
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        // integer literals arrive as i64
        if field.name() == "topic" && value >= 0 {
            self.topics = Some(Topics::from_bits(value as u64));
        }
    }
}

impl<S> tracing_subscriber::layer::Layer<S> for Layer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with("syplog") {
            return;
        }
        let mut visitor = MessageEventVisitor::default();
        event.record(&mut visitor);
        let message = match visitor.message {
            Some(message) => message,
            None => return,
        };
        if let Err(err) = self.target.emit(
            (self.map_level)(metadata.level()),
            visitor.topics.unwrap_or(self.topics),
            format_args!("{}", message),
        ) {
            ::tracing::debug!("couldn't forward a tracing event: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        emitter::Emitter,
        encoder::Encoder,
        medium::{Medium, MediumConfig, MediumKind},
    };

    use tempfile::TempDir;
    use tracing::{debug, info, trace, warn};
    use tracing_subscriber::{layer::SubscriberExt, registry::Registry};

    fn text_log(dir: &TempDir) -> MediumConfig {
        MediumConfig::builder()
            .kind(MediumKind::File)
            .encoder(Encoder::Text)
            .file_path(dir.path().join("log"))
            .build()
    }

    fn records(cfg: &MediumConfig) -> Vec<crate::record::Record> {
        let mut input = Medium::open(&cfg.reversed()).unwrap();
        let mut out = Vec::new();
        while let Some(rec) = input.read_record().unwrap() {
            out.push(rec);
        }
        out
    }

    #[test]
    fn forwards_events() {
        let dir = TempDir::new().unwrap();
        let cfg = text_log(&dir);
        let mut emitter = Emitter::builder("layered")
            .medium(cfg.clone())
            .severity(Severity::Debug)
            .open()
            .unwrap();

        let subscriber = Registry::default().with(Layer::new(emitter.handle()));
        tracing::subscriber::with_default(subscriber, || {
            info!(target: "app", "Hello, {}!", "世界");
            debug!(target: "app", topic = 4u64, "on the wire");
            warn!(target: "syplog::listener", "not forwarded");
            trace!(target: "app", "too verbose");
        });
        emitter.close().unwrap();

        let recs = records(&cfg);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].severity, Severity::Info);
        assert_eq!(recs[0].topics, Topics::LOG);
        assert_eq!(recs[0].message, "Hello, 世界!");
        assert_eq!(recs[1].severity, Severity::Debug);
        assert_eq!(recs[1].topics, Topics::NET);
        assert_eq!(recs[1].message, "on the wire");
        assert_eq!(recs[1].node, "layered");
    }

    #[test]
    fn custom_mapping() {
        let dir = TempDir::new().unwrap();
        let cfg = text_log(&dir);
        let mut emitter = Emitter::builder("layered")
            .medium(cfg.clone())
            .severity(Severity::Error)
            .topics(Topics::CACHE)
            .open()
            .unwrap();

        let layer = Layer::new(emitter.handle())
            .with_level_mapping(|_| Severity::Crit)
            .with_topics(Topics::CACHE);
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            trace!(target: "app", "promoted");
            info!(target: "app", topic = 1, "filtered by topic");
        });
        emitter.close().unwrap();

        let recs = records(&cfg);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, Severity::Crit);
        assert_eq!(recs[0].message, "promoted");
    }

    #[test]
    fn outlives_emitter() {
        let emitter = Emitter::builder("gone")
            .medium(MediumConfig::builder().kind(MediumKind::Null).build())
            .open()
            .unwrap();
        let layer = Layer::new(emitter.handle());
        drop(emitter);
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            info!(target: "app", "nobody's listening");
        });
    }
}
