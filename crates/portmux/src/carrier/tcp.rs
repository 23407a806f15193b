// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Default TCP carrier: push, connection-oriented, blocking sockets.
//!
//! The listener is built through socket2 so reuse-address and the
//! backlog are set before bind. Sessions are plain blocking
//! `TcpStream`s; the shared control handle keeps a cloned stream so the
//! port can shut a connection down under a worker's blocked read and
//! adjust the TOS byte at any time.

use super::dscp;
use super::frame::{Frame, FrameKind, DEFAULT_MAX_FRAME_SIZE};
use super::{Carrier, ConnectionControl, Inbound, Listener, Outbound};
use crate::bottle::Property;
use crate::name::Contact;
use crate::route::Route;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// TCP transport with a configurable frame-size ceiling.
pub struct TcpCarrier {
    max_frame_size: usize,
}

impl TcpCarrier {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for TcpCarrier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Carrier for TcpCarrier {
    fn name(&self) -> &str {
        "tcp"
    }

    fn listen(&self, contact: &Contact) -> io::Result<Box<dyn Listener>> {
        let host = if contact.host.is_empty() {
            "0.0.0.0"
        } else {
            &contact.host
        };
        let addr: SocketAddr = format!("{}:{}", host, contact.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}", e)))?;

        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;

        let listener: TcpListener = socket.into();
        let bound = listener.local_addr()?;

        // The advertised host must be dialable; an unspecified bind
        // address is reported as loopback.
        let advertised_host = if bound.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            bound.ip().to_string()
        };

        log::debug!("[tcp] listening at {}:{}", advertised_host, bound.port());
        Ok(Box::new(TcpListenerSession {
            listener,
            local: Contact::new(
                contact.name.clone(),
                advertised_host,
                bound.port(),
                "tcp",
            ),
            max_frame_size: self.max_frame_size,
        }))
    }

    fn connect(&self, contact: &Contact) -> io::Result<Box<dyn Outbound>> {
        let addr: SocketAddr = contact
            .socket_addr()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}", e)))?;
        let stream = match contact.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;
        if let Some(timeout) = contact.timeout {
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
        }
        let control = Arc::new(TcpControl {
            stream: stream.try_clone()?,
        });
        Ok(Box::new(TcpOutbound {
            stream,
            control,
            route: Route::new("", contact.name.clone(), "tcp"),
            max_frame_size: self.max_frame_size,
        }))
    }
}

struct TcpListenerSession {
    listener: TcpListener,
    local: Contact,
    max_frame_size: usize,
}

impl Listener for TcpListenerSession {
    fn accept(&mut self) -> io::Result<Box<dyn Inbound>> {
        let (stream, peer) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        log::trace!("[tcp] accepted connection from {}", peer);
        let control = Arc::new(TcpControl {
            stream: stream.try_clone()?,
        });
        Ok(Box::new(TcpInbound {
            stream,
            control,
            route: Route::new("", self.local.name.clone(), ""),
            max_frame_size: self.max_frame_size,
        }))
    }

    fn local_contact(&self) -> Contact {
        self.local.clone()
    }
}

/// Shared control handle: a cloned stream for out-of-band shutdown and
/// socket options.
struct TcpControl {
    stream: TcpStream,
}

impl ConnectionControl for TcpControl {
    fn interrupt(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn set_tos(&self, tos: u8) -> bool {
        dscp::set_stream_tos(&self.stream, tos).is_ok()
    }

    fn tos(&self) -> Option<u8> {
        dscp::stream_tos(&self.stream).ok()
    }

    fn set_params(&self, params: &Property) -> bool {
        let mut ok = true;
        if params.check("nodelay") {
            ok &= self
                .stream
                .set_nodelay(params.find("nodelay").as_int() != 0)
                .is_ok();
        }
        ok
    }

    fn params(&self) -> Property {
        let mut out = Property::new();
        if let Ok(nodelay) = self.stream.nodelay() {
            out.put_int("nodelay", i32::from(nodelay));
        }
        if let Some(tos) = self.tos() {
            out.put_int("tos", i32::from(tos));
        }
        out
    }
}

struct TcpInbound {
    stream: TcpStream,
    control: Arc<TcpControl>,
    route: Route,
    max_frame_size: usize,
}

impl Inbound for TcpInbound {
    fn expect_header(&mut self) -> io::Result<Route> {
        let frame = Frame::read_from(&mut self.stream, self.max_frame_size)?;
        if frame.kind != FrameKind::Header {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "connection did not start with a header frame",
            ));
        }
        let mut route = frame.parse_header().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "malformed header frame")
        })?;
        // The dialing side does not always know our registered name.
        if route.to.is_empty() {
            route.to = self.route.to.clone();
        }
        self.route = route.clone();
        Ok(route)
    }

    fn route(&self) -> Route {
        self.route.clone()
    }

    fn read_frame(&mut self) -> io::Result<Frame> {
        Frame::read_from(&mut self.stream, self.max_frame_size)
    }

    fn reply(&mut self, frame: &Frame) -> io::Result<()> {
        frame.write_to(&mut self.stream)
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        let _ = self.stream.set_read_timeout(timeout);
        let _ = self.stream.set_write_timeout(timeout);
    }

    fn control(&self) -> Arc<dyn ConnectionControl> {
        self.control.clone()
    }
}

struct TcpOutbound {
    stream: TcpStream,
    control: Arc<TcpControl>,
    route: Route,
    max_frame_size: usize,
}

impl Outbound for TcpOutbound {
    fn open(&mut self, route: &Route) -> io::Result<()> {
        self.route = route.clone();
        Frame::header(route).write_to(&mut self.stream)
    }

    fn route(&self) -> Route {
        self.route.clone()
    }

    fn rename(&mut self, route: Route) {
        self.route = route;
    }

    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        frame.write_to(&mut self.stream)
    }

    fn read_reply(&mut self) -> io::Result<Frame> {
        Frame::read_from(&mut self.stream, self.max_frame_size)
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        let _ = self.stream.set_read_timeout(timeout);
        let _ = self.stream.set_write_timeout(timeout);
    }

    fn control(&self) -> Arc<dyn ConnectionControl> {
        self.control.clone()
    }

    fn into_inbound(self: Box<Self>) -> Result<Box<dyn Inbound>, Box<dyn Outbound>> {
        // TCP is a push carrier; direction never inverts.
        Err(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn listen_local(carrier: &TcpCarrier) -> Box<dyn Listener> {
        carrier
            .listen(&Contact::new("/test", "127.0.0.1", 0, "tcp"))
            .expect("listen")
    }

    #[test]
    fn test_listen_assigns_ephemeral_port() {
        let carrier = TcpCarrier::default();
        let listener = listen_local(&carrier);
        let contact = listener.local_contact();
        assert!(contact.port > 0);
        assert_eq!(contact.host, "127.0.0.1");
    }

    #[test]
    fn test_header_exchange_and_frames() {
        let carrier = TcpCarrier::default();
        let mut listener = listen_local(&carrier);
        let contact = listener.local_contact();

        let dialer = thread::spawn(move || {
            let carrier = TcpCarrier::default();
            let mut out = carrier.connect(&contact).expect("connect");
            out.open(&Route::new("/a", "/test", "tcp")).expect("open");
            out.write_frame(&Frame::data(b"payload".to_vec(), "env"))
                .expect("write");
            let reply = out.read_reply().expect("reply");
            assert_eq!(reply.payload, b"ack");
        });

        let mut inbound = listener.accept().expect("accept");
        let route = inbound.expect_header().expect("header");
        assert_eq!(route, Route::new("/a", "/test", "tcp"));

        let frame = inbound.read_frame().expect("frame");
        assert_eq!(frame.kind, FrameKind::Data);
        assert_eq!(frame.envelope, "env");
        assert_eq!(frame.payload, b"payload");

        inbound
            .reply(&Frame::data(b"ack".to_vec(), ""))
            .expect("reply");
        dialer.join().unwrap();
    }

    #[test]
    fn test_interrupt_unblocks_read() {
        let carrier = TcpCarrier::default();
        let mut listener = listen_local(&carrier);
        let contact = listener.local_contact();

        let _dialer = TcpCarrier::default().connect(&contact).expect("connect");
        let mut inbound = listener.accept().expect("accept");
        let control = inbound.control();

        let reader = thread::spawn(move || inbound.read_frame());
        thread::sleep(Duration::from_millis(50));
        control.interrupt();
        assert!(reader.join().unwrap().is_err());
    }

    #[test]
    fn test_connect_refused() {
        let carrier = TcpCarrier::default();
        // Bind then drop to get a port that refuses connections.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let contact = Contact::new("/gone", "127.0.0.1", port, "tcp")
            .with_timeout(Some(Duration::from_millis(200)));
        assert!(carrier.connect(&contact).is_err());
    }
}
