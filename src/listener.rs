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

//! The control listener.
//!
//! A [`Listener`] runs one background thread that takes control messages off a transport (a UDP
//! socket or a session-bus connection) & applies them, in arrival order, to the emitter it was
//! started for. It holds only an [`EmitterHandle`]; if the emitter goes away, so does the worker.
//!
//! The worker never blocks for longer than its poll interval, so that [`Listener::stop`] can
//! shut it down cooperatively: clear the running flag under the lifecycle lock & wait for the
//! worker to notice. Rust offers no way to cancel a thread, so a worker that fails to finish
//! within two poll intervals is detached (& logged) rather than killed.
//!
//! Malformed messages & transport errors never end the loop; they're logged as warnings (topic
//! LOG) through the controlled emitter itself. Each change that is applied is logged there too,
//! at DATA.

use crate::{
    bus::{BusConnection, BusMessage, BusMessageKind, BusValue},
    control::{
        ControlMessage, MessageKind, BUS_DISABLE_TOPICS, BUS_ENABLE_TOPICS, BUS_INTERFACE,
        BUS_PING, BUS_SET_LEVEL, BUS_TARGET_NAME,
    },
    emitter::EmitterHandle,
    error::{Error, Result},
    facility::{Severity, Topics},
};

use parking_lot::Mutex;

use std::{
    net::{SocketAddr, UdpSocket},
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// How often an idle worker checks whether it's been asked to stop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A running control listener
pub struct Listener {
    /// Lifecycle lock: `true` while the worker should keep going
    running: Arc<Mutex<bool>>,
    worker: Option<JoinHandle<()>>,
    poll: Duration,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    /// Listen for datagrams on `addr`.
    pub fn start_udp<A: std::net::ToSocketAddrs>(target: EmitterHandle, addr: A) -> Result<Listener> {
        Listener::start_udp_with_poll(target, addr, DEFAULT_POLL_INTERVAL)
    }
    pub fn start_udp_with_poll<A: std::net::ToSocketAddrs>(
        target: EmitterHandle,
        addr: A,
        poll: Duration,
    ) -> Result<Listener> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(poll))?;
        let local_addr = socket.local_addr()?;
        let running = Arc::new(Mutex::new(true));
        let flag = running.clone();
        let worker = std::thread::Builder::new()
            .name("syplog-udp".to_string())
            .spawn(move || udp_loop(socket, target, flag))?;
        tracing::debug!("control listener up on {}", local_addr);
        Ok(Listener {
            running,
            worker: Some(worker),
            poll,
            local_addr: Some(local_addr),
        })
    }
    /// Take control messages off a session-bus connection. The connection claims the well-known
    /// target name & subscribes to the control interface before the worker starts.
    pub fn start_bus(target: EmitterHandle, conn: Box<dyn BusConnection>) -> Result<Listener> {
        Listener::start_bus_with_poll(target, conn, DEFAULT_POLL_INTERVAL)
    }
    pub fn start_bus_with_poll(
        target: EmitterHandle,
        mut conn: Box<dyn BusConnection>,
        poll: Duration,
    ) -> Result<Listener> {
        conn.request_name(BUS_TARGET_NAME)?;
        conn.add_match(BUS_INTERFACE)?;
        let running = Arc::new(Mutex::new(true));
        let flag = running.clone();
        let worker = std::thread::Builder::new()
            .name("syplog-bus".to_string())
            .spawn(move || bus_loop(conn, target, flag, poll))?;
        tracing::debug!("control listener up on the session bus");
        Ok(Listener {
            running,
            worker: Some(worker),
            poll,
            local_addr: None,
        })
    }
    /// The bound address, for datagram listeners
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
    pub fn is_running(&self) -> bool {
        *self.running.lock()
            && self
                .worker
                .as_ref()
                .map(|w| !w.is_finished())
                .unwrap_or(false)
    }
    /// Ask the worker to stop, & wait for it.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }
    fn shutdown(&mut self) -> Result<()> {
        let worker = {
            let mut running = self.running.lock();
            *running = false;
            self.worker.take()
        };
        let worker = match worker {
            Some(worker) => worker,
            None => return Ok(()),
        };
        let deadline = Instant::now() + 2 * self.poll;
        while !worker.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5).min(self.poll));
        }
        if !worker.is_finished() {
            tracing::warn!("control listener didn't stop in time; detaching it");
            return Ok(());
        }
        worker.join().map_err(|_| Error::System {
            source: std::io::Error::new(std::io::ErrorKind::Other, "control listener panicked"),
            back: backtrace::Backtrace::new(),
        })?;
        tracing::debug!("control listener stopped");
        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!("{}", err);
        }
    }
}

fn keep_going(running: &Mutex<bool>, target: &EmitterHandle) -> bool {
    *running.lock() && target.is_alive()
}

/// Log a warning through the controlled emitter (& through `tracing`, in case nobody's listening
/// there).
fn complain(target: &EmitterHandle, args: std::fmt::Arguments) {
    tracing::warn!("{}", args);
    if let Ok(shared) = target.upgrade() {
        shared.warn(args);
    }
}

/// Apply a decoded, non-ping message & record the fact through the emitter.
fn apply(target: &EmitterHandle, msg: &ControlMessage) -> Result<()> {
    match msg.kind {
        MessageKind::Ping => return Ok(()),
        MessageKind::SetLevel => target.set_severity(msg.severity())?,
        MessageKind::EnableTopics => target.enable_topics(msg.topics())?,
        MessageKind::DisableTopics => target.disable_topics(msg.topics())?,
    }
    // filtered against the settings just applied
    target.upgrade()?.emit(
        Severity::Data,
        Topics::LOG,
        format_args!("applied control message {}", msg),
    )
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        datagram worker                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn udp_loop(socket: UdpSocket, target: EmitterHandle, running: Arc<Mutex<bool>>) {
    // larger than any legal message, so oversized datagrams are seen as such
    let mut buf = [0u8; 64];
    while keep_going(&running, &target) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => handle_datagram(&socket, &target, &buf[..n], from),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut
                    || err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => complain(
                &target,
                format_args!("control listener receive failed: {}", err),
            ),
        }
    }
}

fn handle_datagram(socket: &UdpSocket, target: &EmitterHandle, bytes: &[u8], from: SocketAddr) {
    let msg = match ControlMessage::decode(bytes) {
        Ok(msg) => msg,
        Err(err) => {
            complain(
                target,
                format_args!("discarding control message from {}: {}", from, err),
            );
            return;
        }
    };
    tracing::debug!("control message {} from {}", msg, from);
    if msg.kind == MessageKind::Ping {
        // echo the caller's exact bytes, so they can recognize their own ping
        if let Err(err) = socket.send_to(bytes, from) {
            complain(
                target,
                format_args!("couldn't answer ping from {}: {}", from, err),
            );
        }
    } else if let Err(err) = apply(target, &msg) {
        tracing::debug!("couldn't apply {}: {}", msg, err);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          bus worker                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn bus_loop(
    mut conn: Box<dyn BusConnection>,
    target: EmitterHandle,
    running: Arc<Mutex<bool>>,
    poll: Duration,
) {
    while keep_going(&running, &target) {
        match conn.pop(poll) {
            Ok(Some(msg)) => handle_bus_message(conn.as_mut(), &target, msg),
            Ok(None) => {}
            Err(err) => {
                complain(
                    &target,
                    format_args!("control listener bus error: {}", err),
                );
                // don't spin on a dead connection
                std::thread::sleep(poll);
            }
        }
    }
}

fn handle_bus_message(conn: &mut dyn BusConnection, target: &EmitterHandle, msg: BusMessage) {
    if msg.interface != BUS_INTERFACE {
        return;
    }
    match (msg.kind, msg.member.as_str()) {
        (BusMessageKind::MethodCall, BUS_PING) => {
            let text = match msg.args.first() {
                Some(BusValue::Str(s)) => s.clone(),
                Some(other) => {
                    complain(
                        target,
                        format_args!("ping argument has the wrong type: {:?}", other),
                    );
                    "ping".to_string()
                }
                None => {
                    complain(target, format_args!("ping called without an argument"));
                    String::new()
                }
            };
            if let Err(err) = conn.send(BusMessage::method_return(&msg).with_arg(BusValue::Str(text)))
            {
                complain(target, format_args!("couldn't answer ping: {}", err));
            }
        }
        (BusMessageKind::MethodCall, member) => {
            let _ = conn.send(BusMessage::error_reply(
                &msg,
                &format!("unknown method {}", member),
            ));
        }
        (BusMessageKind::Signal, member) => {
            let kind = match member {
                BUS_SET_LEVEL => MessageKind::SetLevel,
                BUS_ENABLE_TOPICS => MessageKind::EnableTopics,
                BUS_DISABLE_TOPICS => MessageKind::DisableTopics,
                _ => return,
            };
            let payload = match msg.args.first() {
                Some(BusValue::U32(x)) => *x,
                other => {
                    complain(
                        target,
                        format_args!("discarding {} signal with argument {:?}", member, other),
                    );
                    return;
                }
            };
            let msg = ControlMessage { kind, payload };
            tracing::debug!("control message {} from the bus", msg);
            if let Err(err) = apply(target, &msg) {
                tracing::debug!("couldn't apply {}: {}", msg, err);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        bus::{call_method, LoopbackBus},
        control::{BusController, Controller, BUS_OBJECT_PATH},
        emitter::Emitter,
        encoder::Encoder,
        facility::{Severity, Topics},
        medium::{Medium, MediumConfig, MediumKind},
    };

    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(50);

    fn text_log(dir: &TempDir) -> MediumConfig {
        MediumConfig::builder()
            .kind(MediumKind::File)
            .encoder(Encoder::Text)
            .file_path(dir.path().join("log"))
            .build()
    }

    fn udp_emitter(cfg: &MediumConfig) -> Emitter {
        Emitter::builder("controlled")
            .medium(cfg.clone())
            .severity(Severity::Warning)
            .topics(Topics::LOG | Topics::NET)
            .listen_udp("127.0.0.1:0")
            .open()
            .unwrap()
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
    fn set_level_and_topics() {
        let dir = TempDir::new().unwrap();
        let cfg = text_log(&dir);
        let mut emitter = udp_emitter(&cfg);
        let addr = emitter.listener_addr().unwrap();
        let ctl = Controller::new(addr).unwrap().timeout(Duration::from_secs(5));

        // the exact bytes, rather than the helper, to pin down the wire format
        let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.send_to(&[0, 0, 0, 2, 0, 0, 0, 7], addr).unwrap();
        // pings are answered in order, so once this one comes back the level has been set
        ctl.ping(1).unwrap();
        assert_eq!(emitter.get_severity(), Severity::Debug);

        let before = emitter.get_topic_mask();
        ctl.enable_topics(Topics::NET).unwrap();
        ctl.enable_topics(Topics::CACHE).unwrap();
        ctl.ping(2).unwrap();
        let after = emitter.get_topic_mask();
        assert!(after.contains(Topics::NET | Topics::CACHE));
        assert_eq!(after & !(Topics::NET | Topics::CACHE), before & !(Topics::NET | Topics::CACHE));

        sock.send_to(&[0, 0, 0, 8, 0xff, 0xff, 0xff, 0xff], addr)
            .unwrap();
        ctl.ping(3).unwrap();
        assert_eq!(emitter.get_topic_mask(), Topics::NONE);

        // out-of-range levels are clamped
        ctl.send(&ControlMessage {
            kind: MessageKind::SetLevel,
            payload: 99,
        })
        .unwrap();
        ctl.ping(4).unwrap();
        assert_eq!(emitter.get_severity(), Severity::Loops);

        emitter.close().unwrap();
    }

    #[test]
    fn ping_echoes_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let emitter = udp_emitter(&text_log(&dir));
        let addr = emitter.listener_addr().unwrap();
        let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let sent = [0, 0, 0, 0, 0xca, 0xfe, 0xba, 0xbe];
        sock.send_to(&sent, addr).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = sock.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &sent);
        assert_eq!(from, addr);
    }

    #[test]
    fn malformed_datagram() {
        let dir = TempDir::new().unwrap();
        let cfg = text_log(&dir);
        let mut emitter = udp_emitter(&cfg);
        let addr = emitter.listener_addr().unwrap();
        let (severity, topics) = (emitter.get_severity(), emitter.get_topic_mask());

        let ctl = Controller::new(addr).unwrap().timeout(Duration::from_secs(5));
        let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.send_to(&[0, 0, 0, 2, 0], addr).unwrap();
        ctl.ping(0).unwrap();

        assert_eq!(emitter.get_severity(), severity);
        assert_eq!(emitter.get_topic_mask(), topics);
        emitter.close().unwrap();

        let recs = records(&cfg);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, Severity::Warning);
        assert_eq!(recs[0].topics, Topics::LOG);
        assert!(recs[0].message.contains("control messages are 8 bytes, got 5"));
    }

    #[test]
    fn unknown_kind() {
        let dir = TempDir::new().unwrap();
        let cfg = text_log(&dir);
        let mut emitter = udp_emitter(&cfg);
        let addr = emitter.listener_addr().unwrap();
        let ctl = Controller::new(addr).unwrap().timeout(Duration::from_secs(5));
        let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.send_to(&[0, 0, 0, 16, 0, 0, 0, 1], addr).unwrap();
        ctl.ping(0).unwrap();
        emitter.close().unwrap();
        let recs = records(&cfg);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].message.contains("unknown control message kind 16"));
    }

    #[test]
    fn applied_changes_are_logged() {
        let dir = TempDir::new().unwrap();
        let cfg = text_log(&dir);
        let mut emitter = Emitter::builder("controlled")
            .medium(cfg.clone())
            .severity(Severity::Info)
            .topics(Topics::LOG)
            .listen_udp("127.0.0.1:0")
            .open()
            .unwrap();
        let addr = emitter.listener_addr().unwrap();
        let ctl = Controller::new(addr).unwrap().timeout(Duration::from_secs(5));

        // still at INFO when this one is recorded, so it's filtered out
        ctl.enable_topics(Topics::NET).unwrap();
        let raise = ControlMessage {
            kind: MessageKind::SetLevel,
            payload: Severity::Data as u32,
        };
        ctl.send(&raise).unwrap();
        ctl.ping(0).unwrap();
        emitter.close().unwrap();

        let recs = records(&cfg);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].severity, Severity::Data);
        assert_eq!(recs[0].topics, Topics::LOG);
        assert!(recs[0].message.contains(&format!("{}", raise)));
    }

    #[test]
    fn stop_is_prompt() {
        let dir = TempDir::new().unwrap();
        let emitter = Emitter::builder("n")
            .medium(text_log(&dir))
            .open()
            .unwrap();
        let listener =
            Listener::start_udp_with_poll(emitter.handle(), "127.0.0.1:0", POLL).unwrap();
        assert!(listener.is_running());
        assert!(listener.local_addr().is_some());
        let start = Instant::now();
        listener.stop().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn worker_exits_with_emitter() {
        let dir = TempDir::new().unwrap();
        let emitter = Emitter::builder("n")
            .medium(text_log(&dir))
            .open()
            .unwrap();
        let listener =
            Listener::start_udp_with_poll(emitter.handle(), "127.0.0.1:0", POLL).unwrap();
        drop(emitter);
        let deadline = Instant::now() + Duration::from_secs(5);
        while listener.is_running() && Instant::now() < deadline {
            std::thread::sleep(POLL);
        }
        assert!(!listener.is_running());
    }

    #[test]
    fn session_bus() {
        let dir = TempDir::new().unwrap();
        let cfg = text_log(&dir);
        let bus = LoopbackBus::new();
        let mut emitter = Emitter::builder("controlled")
            .medium(cfg.clone())
            .severity(Severity::Warning)
            .topics(Topics::LOG)
            .open()
            .unwrap();
        let listener = Listener::start_bus_with_poll(
            emitter.handle(),
            Box::new(bus.connect()),
            POLL,
        )
        .unwrap();
        assert!(bus.owner(BUS_TARGET_NAME).is_some());

        let mut ctl = BusController::new(bus.connect()).unwrap();
        assert_eq!(ctl.ping("hello").unwrap(), "hello");

        ctl.set_level(Severity::Info).unwrap();
        ctl.enable_topics(Topics::NET).unwrap();
        ctl.disable_topics(Topics::LOG).unwrap();
        // ping is handled after the signals that preceded it
        assert_eq!(ctl.ping("sync").unwrap(), "sync");
        assert_eq!(emitter.get_severity(), Severity::Info);
        assert_eq!(emitter.get_topic_mask(), Topics::NET);

        // odd pings are still answered, but complained about
        emitter.enable_topics(Topics::LOG);
        let reply = call_method(
            ctl.connection(),
            BusMessage::method_call(BUS_TARGET_NAME, BUS_OBJECT_PATH, BUS_INTERFACE, BUS_PING),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(reply.args, vec![BusValue::Str(String::new())]);
        let reply = call_method(
            ctl.connection(),
            BusMessage::method_call(BUS_TARGET_NAME, BUS_OBJECT_PATH, BUS_INTERFACE, BUS_PING)
                .with_arg(BusValue::U32(3)),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(reply.args, vec![BusValue::Str("ping".to_string())]);

        listener.stop().unwrap();
        emitter.close().unwrap();
        let recs = records(&cfg);
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.severity == Severity::Warning));
    }
}
