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

//! The client side of the datagram control channel.
//!
//! This module defines the [`Transport`] trait that control clients speak through, along with
//! its UDP implementation.
//!
//! # Examples
//!
//! To talk to a listener on the default port on localhost:
//!
//! ```rust
//! use syplog::transport::UdpTransport;
//! let transpo = UdpTransport::local().unwrap();
//! ```
//!
//! On a non-standard port on another host:
//!
//! ```rust
//! use syplog::transport::UdpTransport;
//! let transpo = UdpTransport::new("some-host.domain.io:5514");
//! assert!(transpo.is_err()); // no such host, after all
//! ```

use crate::{control::DEFAULT_ADDR, error::Result};

use std::time::Duration;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      transport mechanisms                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Operations all transport layers must support.
pub trait Transport {
    /// Send a slice of byte on this transport mechanism.
    fn send(&self, buf: &[u8]) -> Result<usize>;
    /// Wait up to `timeout` for a reply; `Ok(None)` if none arrived in time.
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>>;
}

/// Sending control messages via UDP datagrams.
pub struct UdpTransport {
    socket: std::net::UdpSocket,
}

impl UdpTransport {
    /// Construct a [`Transport`] implementation via UDP at `addr`.
    pub fn new<A: std::net::ToSocketAddrs>(addr: A) -> Result<UdpTransport> {
        // Bind to any available port on localhost...
        let socket = std::net::UdpSocket::bind("127.0.0.1:0")?;
        // and connect to the listener at `addr`:
        socket.connect(addr)?;
        Ok(UdpTransport { socket })
    }
    /// Construct a [`Transport`] implementation via UDP at 127.0.0.1:12345
    pub fn local() -> Result<UdpTransport> {
        UdpTransport::new(DEFAULT_ADDR)
    }
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn send(&self, buf: &[u8]) -> Result<usize> {
        Ok(self.socket.send(buf)?)
    }
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>> {
        // a zero timeout would mean "block forever"
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn send_and_recv() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let transpo = UdpTransport::new(peer.local_addr().unwrap()).unwrap();
        assert_eq!(transpo.send(b"ping").unwrap(), 4);

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, transpo.local_addr().unwrap());

        peer.send_to(b"pong", from).unwrap();
        assert_eq!(
            transpo.recv(&mut buf, Duration::from_secs(5)).unwrap(),
            Some(4)
        );
        assert_eq!(&buf[..4], b"pong");
        assert_eq!(
            transpo.recv(&mut buf, Duration::from_millis(50)).unwrap(),
            None
        );
    }
}
