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

//! The control protocol.
//!
//! Four operations may be sent to a running process: ping, set-level, enable-topic &
//! disable-topic. On a datagram socket each is exactly eight bytes: two big-endian 32-bit words,
//! `(kind, payload)`. On the session bus, ping is a method call (the string argument comes back
//! unchanged) & the other three are signals carrying one `u32`.
//!
//! Topic bitmaps are 64 bits wide but wire payloads only 32; payloads are zero-extended, except
//! that `0xFFFF_FFFF` stands for every topic there is.
//!
//! This module also provides the sending side of both channels: [`Controller`] over UDP and
//! [`BusController`] over a [`BusConnection`].

use crate::{
    bus::{call_method, BusConnection, BusMessage, BusValue},
    error::{Error, Result},
    facility::{Severity, Topics},
    transport::{Transport, UdpTransport},
};

use bytes::{Buf, BufMut};

use std::time::Duration;

type StdResult<T, E> = std::result::Result<T, E>;

/// Default UDP port for control messages
pub const DEFAULT_PORT: u16 = 12345;
/// Default address the datagram listener binds to
pub const DEFAULT_ADDR: &str = "127.0.0.1:12345";
/// Size of one datagram control message
pub const WIRE_SIZE: usize = 8;
/// Wire spelling of "all topics"
pub const WIRE_ALL: u32 = 0xFFFF_FFFF;

pub const BUS_INTERFACE: &str = "syplog.signal.control";
pub const BUS_OBJECT_PATH: &str = "/syplog/default/control";
/// Well-known name owned by a listening process
pub const BUS_TARGET_NAME: &str = "syplog.default.target";
/// Well-known name a controlling process may own
pub const BUS_SOURCE_NAME: &str = "syplog.default.source";
pub const BUS_PING: &str = "ping";
pub const BUS_SET_LEVEL: &str = "set_log_level";
pub const BUS_ENABLE_TOPICS: &str = "set_facility";
pub const BUS_DISABLE_TOPICS: &str = "reset_facility";
/// How long a bus client waits for a method reply
pub const BUS_TIMEOUT: Duration = Duration::from_millis(1000);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          wire format                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping = 0,
    SetLevel = 2,
    EnableTopics = 4,
    DisableTopics = 8,
}

impl MessageKind {
    pub fn from_u32(x: u32) -> Option<MessageKind> {
        match x {
            0 => Some(MessageKind::Ping),
            2 => Some(MessageKind::SetLevel),
            4 => Some(MessageKind::EnableTopics),
            8 => Some(MessageKind::DisableTopics),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                MessageKind::Ping => "ping",
                MessageKind::SetLevel => "set-level",
                MessageKind::EnableTopics => "enable-topic",
                MessageKind::DisableTopics => "disable-topic",
            }
        )
    }
}

/// One control message
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ControlMessage {
    pub kind: MessageKind,
    pub payload: u32,
}

impl ControlMessage {
    pub fn ping(payload: u32) -> ControlMessage {
        ControlMessage {
            kind: MessageKind::Ping,
            payload,
        }
    }
    pub fn set_level(severity: Severity) -> ControlMessage {
        ControlMessage {
            kind: MessageKind::SetLevel,
            payload: severity as u32,
        }
    }
    pub fn enable_topics(topics: Topics) -> ControlMessage {
        ControlMessage {
            kind: MessageKind::EnableTopics,
            payload: topics_to_wire(topics),
        }
    }
    pub fn disable_topics(topics: Topics) -> ControlMessage {
        ControlMessage {
            kind: MessageKind::DisableTopics,
            payload: topics_to_wire(topics),
        }
    }
    pub fn encode(&self) -> [u8; WIRE_SIZE] {
        let mut buf = [0u8; WIRE_SIZE];
        let mut out = &mut buf[..];
        out.put_u32(self.kind as u32);
        out.put_u32(self.payload);
        buf
    }
    /// Parse a datagram, which must be exactly [`WIRE_SIZE`] bytes of a known kind.
    pub fn decode(mut buf: &[u8]) -> Result<ControlMessage> {
        if buf.len() != WIRE_SIZE {
            return Err(Error::bad_message(format!(
                "control messages are {} bytes, got {}",
                WIRE_SIZE,
                buf.len()
            )));
        }
        let kind = buf.get_u32();
        let payload = buf.get_u32();
        let kind = MessageKind::from_u32(kind)
            .ok_or_else(|| Error::bad_message(format!("unknown control message kind {}", kind)))?;
        Ok(ControlMessage { kind, payload })
    }
    /// The severity a set-level payload asks for; anything past the least urgent level means
    /// that level.
    pub fn severity(&self) -> Severity {
        Severity::saturating_from(self.payload)
    }
    /// The topics an enable or disable payload names
    pub fn topics(&self) -> Topics {
        topics_from_wire(self.payload)
    }
}

impl std::fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}({:#x})", self.kind, self.payload)
    }
}

pub fn topics_from_wire(payload: u32) -> Topics {
    if payload == WIRE_ALL {
        Topics::ALL
    } else {
        Topics::from_bits(payload as u64)
    }
}

/// Topics above bit 31 can't be expressed on the wire (other than as part of "all") & are
/// dropped.
pub fn topics_to_wire(topics: Topics) -> u32 {
    if topics == Topics::ALL {
        WIRE_ALL
    } else {
        topics.bits() as u32
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        control clients                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Sends control messages to a datagram listener.
pub struct Controller<T: Transport = UdpTransport> {
    transport: T,
    timeout: Duration,
}

impl Controller<UdpTransport> {
    /// Control the listener at `addr`
    pub fn new<A: std::net::ToSocketAddrs>(addr: A) -> Result<Controller<UdpTransport>> {
        Ok(Controller::with_transport(UdpTransport::new(addr)?))
    }
    /// Control the listener at 127.0.0.1:12345
    pub fn local() -> Result<Controller<UdpTransport>> {
        Controller::new(DEFAULT_ADDR)
    }
}

impl<T: Transport> Controller<T> {
    pub fn with_transport(transport: T) -> Controller<T> {
        Controller {
            transport,
            timeout: Duration::from_secs(1),
        }
    }
    /// How long [`Controller::ping`] waits for its echo
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn send(&self, msg: &ControlMessage) -> Result<()> {
        let n = self.transport.send(&msg.encode())?;
        if n != WIRE_SIZE {
            return Err(Error::Truncated {
                requested: WIRE_SIZE as u64,
                granted: n as u64,
                back: backtrace::Backtrace::new(),
            });
        }
        Ok(())
    }
    pub fn set_level(&self, severity: Severity) -> Result<()> {
        self.send(&ControlMessage::set_level(severity))
    }
    pub fn enable_topics(&self, topics: Topics) -> Result<()> {
        self.send(&ControlMessage::enable_topics(topics))
    }
    pub fn disable_topics(&self, topics: Topics) -> Result<()> {
        self.send(&ControlMessage::disable_topics(topics))
    }
    /// Ping the listener & wait for it to echo our message back.
    ///
    /// Since the listener handles messages in order, a successful ping also means that everything
    /// sent before it has been applied.
    pub fn ping(&self, payload: u32) -> Result<()> {
        let msg = ControlMessage::ping(payload);
        self.send(&msg)?;
        let mut buf = [0u8; 64];
        match self.transport.recv(&mut buf, self.timeout)? {
            Some(n) if buf[..n] == msg.encode() => Ok(()),
            Some(n) => Err(Error::bad_message(format!(
                "unexpected {}-byte reply to ping",
                n
            ))),
            None => Err(Error::System {
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no reply to ping",
                ),
                back: backtrace::Backtrace::new(),
            }),
        }
    }
}

/// Sends control messages over a session bus.
pub struct BusController<C: BusConnection> {
    conn: C,
}

impl<C: BusConnection> BusController<C> {
    /// Wrap `conn`, claiming the control source name on the way.
    pub fn new(mut conn: C) -> Result<BusController<C>> {
        conn.request_name(BUS_SOURCE_NAME)?;
        Ok(BusController { conn })
    }
    fn signal(&mut self, member: &str, payload: u32) -> Result<()> {
        self.conn.send(
            BusMessage::signal(BUS_OBJECT_PATH, BUS_INTERFACE, member)
                .with_arg(BusValue::U32(payload)),
        )?;
        Ok(())
    }
    pub fn set_level(&mut self, severity: Severity) -> Result<()> {
        self.signal(BUS_SET_LEVEL, severity as u32)
    }
    pub fn enable_topics(&mut self, topics: Topics) -> Result<()> {
        self.signal(BUS_ENABLE_TOPICS, topics_to_wire(topics))
    }
    pub fn disable_topics(&mut self, topics: Topics) -> Result<()> {
        self.signal(BUS_DISABLE_TOPICS, topics_to_wire(topics))
    }
    /// Call the listener's ping method; returns whatever it sent back.
    pub fn ping(&mut self, text: &str) -> Result<String> {
        let reply = call_method(
            &mut self.conn,
            BusMessage::method_call(BUS_TARGET_NAME, BUS_OBJECT_PATH, BUS_INTERFACE, BUS_PING)
                .with_arg(BusValue::Str(text.to_string())),
            BUS_TIMEOUT,
        )?;
        match reply.args.first() {
            Some(BusValue::Str(s)) => Ok(s.clone()),
            other => Err(Error::bus(format!("unexpected ping reply {:?}", other))),
        }
    }
    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::error::ErrorCode;

    #[test]
    fn wire_format() {
        assert_eq!(
            ControlMessage::set_level(Severity::Debug).encode(),
            [0, 0, 0, 2, 0, 0, 0, 7]
        );
        assert_eq!(
            ControlMessage::enable_topics(Topics::NET).encode(),
            [0, 0, 0, 4, 0, 0, 0, 4]
        );
        assert_eq!(
            ControlMessage::disable_topics(Topics::ALL).encode(),
            [0, 0, 0, 8, 0xff, 0xff, 0xff, 0xff]
        );
        assert_eq!(
            ControlMessage::decode(&[0, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef]).unwrap(),
            ControlMessage::ping(0xdead_beef)
        );
    }

    #[test]
    fn malformed() {
        for bad in [&[0u8, 0, 0, 2, 0][..], &[0u8; 9][..], &[][..]] {
            assert_eq!(
                ControlMessage::decode(bad).unwrap_err().code(),
                ErrorCode::BadMessage
            );
        }
        assert_eq!(
            ControlMessage::decode(&[0, 0, 0, 3, 0, 0, 0, 1])
                .unwrap_err()
                .code(),
            ErrorCode::BadMessage
        );
    }

    #[test]
    fn payloads() {
        let msg = ControlMessage::decode(&[0, 0, 0, 2, 0, 0, 1, 0]).unwrap();
        assert_eq!(msg.severity(), Severity::Loops);
        let msg = ControlMessage::decode(&[0, 0, 0, 8, 0xff, 0xff, 0xff, 0xff]).unwrap();
        assert_eq!(msg.topics(), Topics::ALL);
        assert_eq!(topics_from_wire(0x10), Topics::DATA);
        assert_eq!(topics_to_wire(Topics::ZFSD | Topics::LOG), 0x10001);
    }
}
