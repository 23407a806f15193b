// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! User-facing callback traits and the port event channel.

use crate::route::Route;

/// View of one received message, handed to a [`PortReader`].
///
/// A reader invoked with `is_valid() == false` received a synthetic
/// empty read: the port is interrupted or closing and a blocked reader
/// should re-check port state rather than process data.
pub trait ConnectionReader {
    /// Message payload; empty for synthetic reads.
    fn payload(&self) -> &[u8];

    /// Envelope that traveled with the message.
    fn envelope(&self) -> &str;

    /// Route of the connection the message arrived on.
    fn route(&self) -> &Route;

    /// False for synthetic reads delivered by `interrupt` and `close`.
    fn is_valid(&self) -> bool;

    /// Send a reply on the connection's back-channel.
    fn reply(&mut self, payload: &[u8]) -> bool;

    /// Ask the port to close this connection once the current exchange
    /// completes.
    fn request_drop(&mut self);
}

/// Handler for messages arriving at a port.
pub trait PortReader: Send {
    /// Process one incoming message. Returning false signals a protocol
    /// failure on this connection.
    fn read(&mut self, reader: &mut dyn ConnectionReader) -> bool;

    /// Name of the payload type this reader expects, if it declares
    /// one.
    fn read_type(&self) -> Option<String> {
        None
    }
}

/// Factory producing one reader per input connection.
pub trait PortReaderCreator: Send + Sync {
    fn create(&self) -> Box<dyn PortReader>;
}

/// Source of outgoing message bytes.
pub trait PortWriter: Send + Sync {
    /// Serialize the message. Returning false aborts the send.
    fn write(&self, out: &mut Vec<u8>) -> bool;

    /// Called once when a send of this object begins.
    fn on_commencement(&self) {}

    /// Called exactly once when the message has been handed to every
    /// carrier (or dropped), whether or not delivery succeeded.
    fn on_completion(&self) {}
}

/// Blanket writer for raw byte payloads.
impl PortWriter for Vec<u8> {
    fn write(&self, out: &mut Vec<u8>) -> bool {
        out.extend_from_slice(self);
        true
    }
}

/// What a [`PortInfo`] event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortInfoTag {
    /// Free-form message about the port itself.
    Misc,
    /// A connection was created or removed.
    Connection,
}

/// One port event, delivered through [`PortReport`].
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub tag: PortInfoTag,
    pub incoming: bool,
    pub created: bool,
    pub message: String,
    pub port_name: String,
    pub source_name: String,
    pub target_name: String,
    pub carrier_name: String,
}

impl PortInfo {
    /// Free-form event.
    pub fn misc(message: impl Into<String>) -> Self {
        Self {
            tag: PortInfoTag::Misc,
            incoming: false,
            created: true,
            message: message.into(),
            port_name: String::new(),
            source_name: String::new(),
            target_name: String::new(),
            carrier_name: String::new(),
        }
    }

    /// Connection lifecycle event.
    pub fn connection(port_name: &str, route: &Route, incoming: bool, created: bool) -> Self {
        let direction = if incoming { "input" } else { "output" };
        let verb = if created { "There is" } else { "Removed" };
        Self {
            tag: PortInfoTag::Connection,
            incoming,
            created,
            message: format!(
                "{} an {} connection from {} to {} using {}",
                verb, direction, route.from, route.to, route.carrier
            ),
            port_name: port_name.to_string(),
            source_name: route.from.clone(),
            target_name: route.to.clone(),
            carrier_name: route.carrier.clone(),
        }
    }
}

/// Receiver for port events (connection changes, describe output).
pub trait PortReport: Send {
    fn report(&mut self, info: &PortInfo);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_writer() {
        let payload: Vec<u8> = b"abc".to_vec();
        let mut out = Vec::new();
        assert!(PortWriter::write(&payload, &mut out));
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_connection_info_message() {
        let route = Route::new("/a", "/b", "tcp");
        let info = PortInfo::connection("/b", &route, true, true);
        assert_eq!(info.tag, PortInfoTag::Connection);
        assert!(info.incoming);
        assert_eq!(
            info.message,
            "There is an input connection from /a to /b using tcp"
        );
    }
}
