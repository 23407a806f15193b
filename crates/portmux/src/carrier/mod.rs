// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Carrier abstraction: pluggable transports behind a uniform session
//! interface.
//!
//! A carrier knows how to listen and how to dial. Sessions exchange
//! [`Frame`]s; the frame kind tells the receiving port whether a frame
//! is a connection header, user data, or an administrative bottle.
//!
//! Carrier names may carry `+key.value` modifiers (`tcp+log.in`): the
//! base name selects the transport, the modifiers tune the connection.
//! The `log` modifier marks a connection as a logger; such outputs only
//! receive recorded transcripts, never normal traffic.
//!
//! # Ownership
//!
//! A session is owned by exactly one worker thread. The out-of-band
//! [`ConnectionControl`] handle is the only part shared with the port:
//! it can shut the socket down under a blocked read and adjust socket
//! options (TOS) without touching the worker.

mod frame;
pub mod dscp;
mod tcp;

pub use frame::{Frame, FrameKind, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
pub use tcp::TcpCarrier;

use crate::bottle::Property;
use crate::name::Contact;
use crate::route::Route;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Base carrier name, with any `+key.value` modifiers stripped.
pub fn base_name(carrier: &str) -> &str {
    carrier.split('+').next().unwrap_or(carrier)
}

/// Value of a `+key.value` modifier in a carrier name, if present.
///
/// `carrier_modifier("tcp+log.in", "log")` is `Some("in")`.
pub fn carrier_modifier(carrier: &str, key: &str) -> Option<String> {
    for segment in carrier.split('+').skip(1) {
        let mut parts = segment.splitn(2, '.');
        if parts.next() == Some(key) {
            return Some(parts.next().unwrap_or("").to_string());
        }
    }
    None
}

/// A transport protocol.
pub trait Carrier: Send + Sync {
    /// Base name this carrier registers under.
    fn name(&self) -> &str;

    /// Push carriers are initiated by the sender; pull carriers dial in
    /// the opposite direction and surface as reverse inputs.
    fn is_push(&self) -> bool {
        true
    }

    /// Connectionless carriers have no session teardown to negotiate.
    fn is_connectionless(&self) -> bool {
        false
    }

    /// Open a listening endpoint.
    fn listen(&self, contact: &Contact) -> io::Result<Box<dyn Listener>>;

    /// Dial a remote endpoint.
    fn connect(&self, contact: &Contact) -> io::Result<Box<dyn Outbound>>;
}

/// Server side of a carrier: produces inbound sessions.
pub trait Listener: Send {
    /// Block until a peer dials in.
    ///
    /// Transient errors are returned as `Err`; the caller loops. The
    /// blocking accept is unblocked at shutdown by a local self-dial.
    fn accept(&mut self) -> io::Result<Box<dyn Inbound>>;

    /// The contact this listener is reachable at.
    fn local_contact(&self) -> Contact;
}

/// One accepted connection, owned by its input worker.
pub trait Inbound: Send {
    /// Consume the connection header and learn the peer's route.
    fn expect_header(&mut self) -> io::Result<Route>;

    /// Route as known so far; carrier name is empty before the header
    /// exchange completes.
    fn route(&self) -> Route;

    /// Block for the next frame.
    fn read_frame(&mut self) -> io::Result<Frame>;

    /// Write a frame on the back-channel (admin replies, RPC replies).
    fn reply(&mut self, frame: &Frame) -> io::Result<()>;

    /// Apply a per-operation I/O timeout.
    fn set_timeout(&self, timeout: Option<Duration>);

    /// Shared out-of-band control handle.
    fn control(&self) -> Arc<dyn ConnectionControl>;
}

/// One dialed connection, owned by its output worker.
pub trait Outbound: Send {
    /// Perform the header exchange for the given route.
    fn open(&mut self, route: &Route) -> io::Result<()>;

    /// Route this connection was opened with.
    fn route(&self) -> Route;

    /// Replace the route (used when a pull carrier inverts direction).
    fn rename(&mut self, route: Route);

    /// Write one frame.
    fn write_frame(&mut self, frame: &Frame) -> io::Result<()>;

    /// Block for a reply frame on the back-channel.
    fn read_reply(&mut self) -> io::Result<Frame>;

    /// Apply a per-operation I/O timeout.
    fn set_timeout(&self, timeout: Option<Duration>);

    /// Shared out-of-band control handle.
    fn control(&self) -> Arc<dyn ConnectionControl>;

    /// Flip a pull-style connection into an inbound session. Push
    /// carriers return `Err(self)` unchanged.
    fn into_inbound(self: Box<Self>) -> Result<Box<dyn Inbound>, Box<dyn Outbound>>;
}

/// Out-of-band handle to a live connection.
///
/// Shared between the owning worker and the port so shutdown and QoS
/// changes never have to wait for the worker's blocking I/O.
pub trait ConnectionControl: Send + Sync {
    /// Force any blocked I/O on the connection to return.
    fn interrupt(&self);

    /// Push a TOS byte onto the underlying stream.
    fn set_tos(&self, tos: u8) -> bool;

    /// Current TOS byte, if the transport exposes one.
    fn tos(&self) -> Option<u8>;

    /// Update transport-specific parameters.
    fn set_params(&self, params: &Property) -> bool {
        let _ = params;
        false
    }

    /// Read transport-specific parameters.
    fn params(&self) -> Property {
        Property::new()
    }
}

/// A message filter attachable to a port's input or output side.
///
/// The output modifier sees every outgoing payload before fan-out and
/// may veto or rewrite it; the input modifier is applied to inbound
/// payloads before the user reader runs.
pub trait PortModifier: Send {
    /// Accept or veto a payload. Vetoed sends return false to the
    /// caller; vetoed receives are dropped silently.
    fn accept(&mut self, payload: &[u8]) -> bool {
        let _ = payload;
        true
    }

    /// Rewrite a payload in place.
    fn modify(&mut self, payload: &mut Vec<u8>) {
        let _ = payload;
    }

    /// Update modifier parameters.
    fn set_params(&mut self, params: &Property) {
        let _ = params;
    }

    /// Read modifier parameters.
    fn params(&self) -> Property {
        Property::new()
    }
}

/// Builds [`PortModifier`]s by name; the admin `atch` verb looks these
/// up in the carrier registry.
pub trait ModifierFactory: Send + Sync {
    fn create(&self, config: &Property) -> Result<Box<dyn PortModifier>, String>;
}

/// Registry resolving carrier names to transports.
///
/// Instance-scoped rather than global so tests and embedded deployments
/// can assemble their own transport sets.
pub struct CarrierRegistry {
    carriers: RwLock<HashMap<String, Arc<dyn Carrier>>>,
    modifiers: RwLock<HashMap<String, Arc<dyn ModifierFactory>>>,
}

impl CarrierRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            carriers: RwLock::new(HashMap::new()),
            modifiers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in TCP carrier.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TcpCarrier::default()));
        registry
    }

    /// Add a carrier under its base name.
    pub fn register(&self, carrier: Arc<dyn Carrier>) {
        self.carriers
            .write()
            .insert(carrier.name().to_string(), carrier);
    }

    /// Add a modifier factory under a name.
    pub fn register_modifier(&self, name: impl Into<String>, factory: Arc<dyn ModifierFactory>) {
        self.modifiers.write().insert(name.into(), factory);
    }

    /// Resolve a carrier by (possibly modified) name.
    pub fn choose(&self, carrier: &str) -> Option<Arc<dyn Carrier>> {
        let name = if carrier.is_empty() {
            "tcp"
        } else {
            base_name(carrier)
        };
        self.carriers.read().get(name).cloned()
    }

    /// Resolve a modifier factory by name.
    pub fn choose_modifier(&self, name: &str) -> Option<Arc<dyn ModifierFactory>> {
        self.modifiers.read().get(name).cloned()
    }

    /// Open a listening endpoint with the contact's carrier.
    pub fn listen(&self, contact: &Contact) -> io::Result<Box<dyn Listener>> {
        let carrier = self.choose(&contact.carrier).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no carrier registered for '{}'", contact.carrier),
            )
        })?;
        carrier.listen(contact)
    }

    /// Dial with the contact's carrier.
    pub fn connect(&self, contact: &Contact) -> io::Result<Box<dyn Outbound>> {
        let carrier = self.choose(&contact.carrier).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no carrier registered for '{}'", contact.carrier),
            )
        })?;
        carrier.connect(contact)
    }
}

impl Default for CarrierRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
