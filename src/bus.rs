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

//! Session-bus plumbing.
//!
//! The control listener can take its orders from a message bus rather than a datagram socket.
//! [`BusConnection`] is all the listener asks of such a bus: own a well-known name, subscribe to
//! the signals on an interface, send a message & wait (boundedly) for the next one. Bindings to
//! a real system bus implement it outside this crate; [`LoopbackBus`] is an in-process bus that
//! routes messages between its own connections, which is enough to wire a controller to a
//! listener within one process (& to test both).

use crate::error::{Error, Result};

use parking_lot::{Condvar, Mutex};

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

/// One argument carried by a bus message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusValue {
    Str(String),
    U32(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusMessageKind {
    Signal,
    MethodCall,
    MethodReturn,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub kind: BusMessageKind,
    /// unique name of the sending connection; filled in by the bus
    pub sender: Option<String>,
    /// unique or well-known name of the recipient; signals are broadcast & have none
    pub destination: Option<String>,
    pub path: String,
    pub interface: String,
    pub member: String,
    /// assigned by the bus on send
    pub serial: u32,
    pub reply_serial: Option<u32>,
    pub args: Vec<BusValue>,
}

impl BusMessage {
    pub fn signal(path: &str, interface: &str, member: &str) -> BusMessage {
        BusMessage {
            kind: BusMessageKind::Signal,
            sender: None,
            destination: None,
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            serial: 0,
            reply_serial: None,
            args: Vec::new(),
        }
    }
    pub fn method_call(destination: &str, path: &str, interface: &str, member: &str) -> BusMessage {
        BusMessage {
            kind: BusMessageKind::MethodCall,
            destination: Some(destination.to_string()),
            ..BusMessage::signal(path, interface, member)
        }
    }
    /// A reply to `call`
    pub fn method_return(call: &BusMessage) -> BusMessage {
        BusMessage {
            kind: BusMessageKind::MethodReturn,
            destination: call.sender.clone(),
            reply_serial: Some(call.serial),
            ..BusMessage::signal(&call.path, &call.interface, &call.member)
        }
    }
    pub fn error_reply(call: &BusMessage, text: &str) -> BusMessage {
        BusMessage {
            kind: BusMessageKind::Error,
            ..BusMessage::method_return(call)
        }
        .with_arg(BusValue::Str(text.to_string()))
    }
    pub fn with_arg(mut self, arg: BusValue) -> BusMessage {
        self.args.push(arg);
        self
    }
}

/// What the control listener needs from a session bus.
pub trait BusConnection: Send {
    /// This connection's unique name
    fn unique_name(&self) -> &str;
    /// Take ownership of a well-known name, displacing any current owner.
    fn request_name(&mut self, name: &str) -> Result<()>;
    /// Subscribe to all signals on `interface`.
    fn add_match(&mut self, interface: &str) -> Result<()>;
    /// Send `msg`; returns the serial number the bus assigned it.
    fn send(&mut self, msg: BusMessage) -> Result<u32>;
    /// Wait up to `timeout` for the next incoming message.
    fn pop(&mut self, timeout: Duration) -> Result<Option<BusMessage>>;
}

/// Call a method & wait up to `timeout` for its reply. Anything else that arrives meanwhile is
/// discarded.
pub fn call_method(
    conn: &mut dyn BusConnection,
    msg: BusMessage,
    timeout: Duration,
) -> Result<BusMessage> {
    let serial = conn.send(msg)?;
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::bus("timed out waiting for a method reply"));
        }
        match conn.pop(deadline - now)? {
            Some(reply) if reply.reply_serial == Some(serial) => {
                return match reply.kind {
                    BusMessageKind::Error => Err(Error::bus(format!("{:?}", reply.args))),
                    _ => Ok(reply),
                }
            }
            _ => continue,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          loopback bus                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Default)]
struct Hub {
    next_id: u64,
    next_serial: u32,
    /// well-known name => owning unique name
    names: HashMap<String, String>,
    /// unique name => pending messages
    queues: HashMap<String, VecDeque<BusMessage>>,
    /// unique name => subscribed interfaces
    matches: HashMap<String, Vec<String>>,
}

impl Hub {
    fn resolve(&self, name: &str) -> Option<String> {
        if self.queues.contains_key(name) {
            Some(name.to_string())
        } else {
            self.names.get(name).cloned()
        }
    }
}

struct Shared {
    hub: Mutex<Hub>,
    arrived: Condvar,
}

/// An in-process message bus.
#[derive(Clone)]
pub struct LoopbackBus {
    shared: Arc<Shared>,
}

impl std::default::Default for LoopbackBus {
    fn default() -> Self {
        LoopbackBus::new()
    }
}

impl LoopbackBus {
    pub fn new() -> LoopbackBus {
        LoopbackBus {
            shared: Arc::new(Shared {
                hub: Mutex::new(Hub::default()),
                arrived: Condvar::new(),
            }),
        }
    }
    /// Open a new connection to this bus.
    pub fn connect(&self) -> LoopbackConnection {
        let mut hub = self.shared.hub.lock();
        hub.next_id += 1;
        let name = format!(":1.{}", hub.next_id);
        hub.queues.insert(name.clone(), VecDeque::new());
        LoopbackConnection {
            shared: self.shared.clone(),
            name,
        }
    }
    /// The unique name currently owning `name`, if any
    pub fn owner(&self, name: &str) -> Option<String> {
        self.shared.hub.lock().names.get(name).cloned()
    }
}

/// One connection to a [`LoopbackBus`]
pub struct LoopbackConnection {
    shared: Arc<Shared>,
    name: String,
}

impl BusConnection for LoopbackConnection {
    fn unique_name(&self) -> &str {
        &self.name
    }
    fn request_name(&mut self, name: &str) -> Result<()> {
        if name.starts_with(':') {
            return Err(Error::bus(format!("can't own unique name {}", name)));
        }
        self.shared
            .hub
            .lock()
            .names
            .insert(name.to_string(), self.name.clone());
        Ok(())
    }
    fn add_match(&mut self, interface: &str) -> Result<()> {
        self.shared
            .hub
            .lock()
            .matches
            .entry(self.name.clone())
            .or_default()
            .push(interface.to_string());
        Ok(())
    }
    fn send(&mut self, mut msg: BusMessage) -> Result<u32> {
        let mut hub = self.shared.hub.lock();
        hub.next_serial = hub.next_serial.wrapping_add(1).max(1);
        msg.serial = hub.next_serial;
        msg.sender = Some(self.name.clone());
        let serial = msg.serial;
        match msg.kind {
            BusMessageKind::Signal => {
                let recipients: Vec<String> = hub
                    .matches
                    .iter()
                    .filter(|(who, ifaces)| {
                        **who != self.name && ifaces.iter().any(|i| *i == msg.interface)
                    })
                    .map(|(who, _)| who.clone())
                    .collect();
                for who in recipients {
                    if let Some(queue) = hub.queues.get_mut(&who) {
                        queue.push_back(msg.clone());
                    }
                }
            }
            _ => {
                let dest = msg
                    .destination
                    .as_deref()
                    .and_then(|d| hub.resolve(d))
                    .ok_or_else(|| {
                        Error::bus(format!("no such bus name {:?}", msg.destination))
                    })?;
                if let Some(queue) = hub.queues.get_mut(&dest) {
                    queue.push_back(msg);
                }
            }
        }
        drop(hub);
        self.shared.arrived.notify_all();
        Ok(serial)
    }
    fn pop(&mut self, timeout: Duration) -> Result<Option<BusMessage>> {
        let deadline = Instant::now() + timeout;
        let mut hub = self.shared.hub.lock();
        loop {
            match hub.queues.get_mut(&self.name) {
                Some(queue) => {
                    if let Some(msg) = queue.pop_front() {
                        return Ok(Some(msg));
                    }
                }
                None => return Err(Error::bus("connection is no longer on the bus")),
            }
            if self
                .shared
                .arrived
                .wait_until(&mut hub, deadline)
                .timed_out()
            {
                return Ok(hub
                    .queues
                    .get_mut(&self.name)
                    .and_then(|queue| queue.pop_front()));
            }
        }
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        let mut hub = self.shared.hub.lock();
        hub.queues.remove(&self.name);
        hub.matches.remove(&self.name);
        let me = self.name.clone();
        hub.names.retain(|_, owner| *owner != me);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signals_and_calls() {
        let bus = LoopbackBus::new();
        let mut server = bus.connect();
        let mut client = bus.connect();
        let mut bystander = bus.connect();
        assert_ne!(server.unique_name(), client.unique_name());

        server.request_name("test.server").unwrap();
        server.add_match("test.iface").unwrap();
        assert_eq!(
            bus.owner("test.server").as_deref(),
            Some(server.unique_name())
        );

        client
            .send(BusMessage::signal("/obj", "test.iface", "poke").with_arg(BusValue::U32(7)))
            .unwrap();
        let sig = server.pop(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(sig.member, "poke");
        assert_eq!(sig.args, vec![BusValue::U32(7)]);
        // no match, no signal
        assert!(bystander.pop(Duration::from_millis(10)).unwrap().is_none());

        let worker = std::thread::spawn(move || {
            let call = server.pop(Duration::from_secs(5)).unwrap().unwrap();
            assert_eq!(call.kind, BusMessageKind::MethodCall);
            server
                .send(BusMessage::method_return(&call).with_arg(call.args[0].clone()))
                .unwrap();
        });
        let reply = call_method(
            &mut client,
            BusMessage::method_call("test.server", "/obj", "test.iface", "echo")
                .with_arg(BusValue::Str("hi".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(reply.args, vec![BusValue::Str("hi".to_string())]);
        worker.join().unwrap();

        // the server has gone, & its name with it
        assert!(bus.owner("test.server").is_none());
        assert!(client
            .send(BusMessage::method_call("test.server", "/obj", "test.iface", "echo"))
            .is_err());
    }
}
