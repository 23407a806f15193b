// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # portmux - peer-to-peer port connection engine
//!
//! A messaging substrate for distributed robotics: named endpoints
//! ("ports") exchange framed messages over pluggable transports
//! ("carriers") arranged as a directed connection graph. Connections
//! are negotiated at run time through a name service and may mix
//! transports on the same port. Any port can publish, subscribe, serve
//! RPC, or log traffic.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use portmux::{CarrierRegistry, Contact, LocalNameService, PortCore};
//!
//! let carriers = Arc::new(CarrierRegistry::with_defaults());
//! let names = Arc::new(LocalNameService::new(carriers.clone()));
//!
//! let sender = PortCore::new(carriers.clone(), names.clone());
//! assert!(sender.listen(&Contact::new("/sender", "127.0.0.1", 0, "tcp"), true));
//! assert!(sender.start());
//!
//! sender.add_output("/receiver", false);
//! let payload: Arc<dyn portmux::PortWriter> = Arc::new(b"hello".to_vec());
//! sender.send(payload);
//! sender.close();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                          PortCore                            |
//! |  lifecycle FSM | unit registry | fan-out send | admin verbs  |
//! +--------------------------------------------------------------+
//! |     Units (one worker per connection, input or output)       |
//! +--------------------------------------------------------------+
//! |   Carriers (frame codec, TCP, carrier-name modifiers)        |
//! +--------------------------------------------------------------+
//! |   Name service (resolve / announce / disconnect)             |
//! +--------------------------------------------------------------+
//! ```
//!
//! A dedicated listener thread accepts connections and wraps each in
//! an input unit with its own worker; output units are dialed on
//! demand. A send is fanned out atomically with respect to the unit
//! registry, tracked by a ref-counted packet until every output has
//! carried it. Frames tagged administrative are answered by the port
//! itself: connection management, QoS (DSCP/TOS), scheduling, user
//! properties, and attachable payload modifiers.
//!
//! ## Observability
//!
//! The crate logs through the `log` facade and never installs a global
//! logger; binaries and tests own that choice.

/// Nested-list message model used by the admin protocol.
pub mod bottle;
/// Pluggable transports behind a uniform session interface.
pub mod carrier;
/// Name service contract and the in-process registry.
pub mod name;
/// The port connection engine.
pub mod port;
/// Connection routes with wildcard matching.
pub mod route;

pub use bottle::{Bottle, Property, Value};
pub use carrier::{Carrier, CarrierRegistry, Frame, FrameKind, PortModifier, TcpCarrier};
pub use name::{Contact, LocalNameService, NameService};
pub use port::{
    admin_request, ConnectionReader, PortCore, PortInfo, PortInfoTag, PortReader,
    PortReaderCreator, PortReport, PortWriter, PORT_IS_INPUT, PORT_IS_OUTPUT, PORT_IS_RPC,
};
pub use route::Route;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
