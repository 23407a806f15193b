// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name service contract and the in-process registry.
//!
//! Ports announce their listening contact under a registered name;
//! peers resolve names to contacts before dialing. The engine only
//! consumes the [`NameService`] capability contract, so deployments can
//! plug in an external daemon; [`LocalNameService`] is the in-process
//! implementation used by tests and single-process systems.

use crate::bottle::{vocab, Bottle, Value};
use crate::carrier::CarrierRegistry;
use crate::port::admin_request;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where a port can be reached: registered name plus transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Registered port name (`/...` requests auto-assignment).
    pub name: String,

    /// Host name or address.
    pub host: String,

    /// Transport port number; 0 requests an ephemeral port.
    pub port: u16,

    /// Carrier name, possibly with `+key.value` modifiers.
    pub carrier: String,

    /// Per-operation I/O timeout.
    pub timeout: Option<Duration>,
}

impl Contact {
    /// Contact for a named port with transport details still unknown.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: String::new(),
            port: 0,
            carrier: String::new(),
            timeout: None,
        }
    }

    /// Fully specified contact.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        carrier: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            carrier: carrier.into(),
            timeout: None,
        }
    }

    /// Parse a destination as admin clients write it: `/name`,
    /// `carrier:/name`, or `carrier+mod.val:/name`.
    pub fn from_text(text: &str) -> Self {
        match text.find(":/") {
            Some(pos) => {
                let mut c = Self::by_name(&text[pos + 1..]);
                c.carrier = text[..pos].to_string();
                c
            }
            None => Self::by_name(text),
        }
    }

    /// A contact is dialable once it carries a transport address.
    pub fn is_valid(&self) -> bool {
        self.port > 0 && !self.host.is_empty()
    }

    /// `host:port` socket address form.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Replace the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let carrier = if self.carrier.is_empty() {
            "tcp"
        } else {
            &self.carrier
        };
        write!(f, "{}://{}:{}", carrier, self.host, self.port)
    }
}

/// Capability contract of the name service.
pub trait NameService: Send + Sync {
    /// Resolve a registered name to a contact.
    fn query(&self, name: &str) -> Option<Contact>;

    /// Register a name with its listening contact. Returns false when
    /// the name is already held by another live registration.
    fn announce(&self, name: &str, contact: &Contact) -> bool;

    /// Drop a registration.
    fn unregister(&self, name: &str);

    /// Ask the port `src` to remove its output connection to `dst`.
    fn disconnect(&self, src: &str, dst: &str) -> bool;

    /// Ask the port `dst` to remove its input connection from `src`.
    /// Fallback used when [`NameService::disconnect`] fails.
    fn disconnect_input(&self, dst: &str, src: &str) -> bool;

    /// In local-only mode ports skip announcements entirely.
    fn local_mode(&self) -> bool {
        false
    }
}

/// In-process name registry.
///
/// Holds name→contact registrations behind an RwLock and performs
/// disconnect requests by dialing the target port's admin surface
/// through the carrier registry.
pub struct LocalNameService {
    carriers: Arc<CarrierRegistry>,
    entries: RwLock<HashMap<String, Contact>>,
    local_mode: bool,
}

impl LocalNameService {
    /// Create a registry that dials through the given carriers.
    pub fn new(carriers: Arc<CarrierRegistry>) -> Self {
        Self {
            carriers,
            entries: RwLock::new(HashMap::new()),
            local_mode: false,
        }
    }

    /// Create a registry in local-only mode (no announcements expected).
    pub fn local_only(carriers: Arc<CarrierRegistry>) -> Self {
        Self {
            carriers,
            entries: RwLock::new(HashMap::new()),
            local_mode: true,
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn admin(&self, target: &str, cmd: Bottle) -> bool {
        let contact = match self.query(target) {
            Some(c) => c,
            None => return false,
        };
        match admin_request(&self.carriers, &contact, cmd) {
            Ok(reply) => matches!(reply.get(0), Value::Int(v) if *v >= 0),
            Err(e) => {
                log::debug!("[name] admin request to {} failed: {}", target, e);
                false
            }
        }
    }
}

impl NameService for LocalNameService {
    fn query(&self, name: &str) -> Option<Contact> {
        self.entries.read().get(name).cloned()
    }

    fn announce(&self, name: &str, contact: &Contact) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            log::warn!("[name] refusing to announce {}: name already registered", name);
            return false;
        }
        entries.insert(name.to_string(), contact.clone());
        log::debug!("[name] registered {} at {}", name, contact);
        true
    }

    fn unregister(&self, name: &str) {
        if self.entries.write().remove(name).is_some() {
            log::debug!("[name] unregistered {}", name);
        }
    }

    fn disconnect(&self, src: &str, dst: &str) -> bool {
        let mut cmd = Bottle::new();
        cmd.add_vocab(vocab("del"));
        cmd.add_string(dst);
        self.admin(src, cmd)
    }

    fn disconnect_input(&self, dst: &str, src: &str) -> bool {
        let mut cmd = Bottle::new();
        cmd.add_vocab(vocab("del"));
        cmd.add_string(src);
        self.admin(dst, cmd)
    }

    fn local_mode(&self) -> bool {
        self.local_mode
    }
}
