// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DSCP (Differentiated Services Code Point) support for connection
//! QoS.
//!
//! The admin protocol lets peers raise or lower the network priority of
//! a connection. Three spellings are accepted, all ending up as an
//! `IP_TOS` byte on the underlying socket (`TOS = DSCP << 2`):
//!
//! - a coarse priority level: `LOW`, `NORM`, `HIGH`, `CRIT`
//! - a named DSCP class per RFC 2474/4594: `CS0`..`CS7`, `AF11`..`AF43`,
//!   `VA`, `EF`
//! - a raw DSCP value in `0..64`, or a raw TOS byte

use crate::bottle::vocab_text;
use std::io;
use std::net::TcpStream;

/// Named DSCP classes and their code points.
const CLASSES: &[(&str, u8)] = &[
    ("CS0", 0),
    ("CS1", 8),
    ("CS2", 16),
    ("CS3", 24),
    ("CS4", 32),
    ("CS5", 40),
    ("CS6", 48),
    ("CS7", 56),
    ("AF11", 10),
    ("AF12", 12),
    ("AF13", 14),
    ("AF21", 18),
    ("AF22", 20),
    ("AF23", 22),
    ("AF31", 26),
    ("AF32", 28),
    ("AF33", 30),
    ("AF41", 34),
    ("AF42", 36),
    ("AF43", 38),
    ("VA", 44),
    ("EF", 46),
];

/// Map a coarse priority vocab (`LOW`, `NORM`, `HIGH`, `CRIT`) to its
/// DSCP value.
pub fn priority_dscp(priority: i32) -> Option<u8> {
    match vocab_text(priority).as_str() {
        "LOW" => Some(10),
        "NORM" => Some(0),
        "HIGH" => Some(36),
        "CRIT" => Some(44),
        _ => None,
    }
}

/// Map a named DSCP class vocab (`AF12`, `CS3`, `EF`, ...) to its code
/// point.
pub fn class_dscp(class: i32) -> Option<u8> {
    let name = vocab_text(class);
    CLASSES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, dscp)| *dscp)
}

/// Convert a DSCP code point to the TOS byte (`DSCP << 2`).
pub const fn dscp_to_tos(dscp: u8) -> u8 {
    dscp << 2
}

/// Set the TOS byte on a TCP stream.
pub fn set_stream_tos(stream: &TcpStream, tos: u8) -> io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    match sock.set_tos(u32::from(tos)) {
        Ok(()) => {
            log::debug!("[dscp] set TOS={} (DSCP={})", tos, tos >> 2);
            Ok(())
        }
        Err(e) => {
            log::warn!("[dscp] failed to set TOS={}: {}", tos, e);
            Err(e)
        }
    }
}

/// Read the TOS byte currently set on a TCP stream.
pub fn stream_tos(stream: &TcpStream) -> io::Result<u8> {
    let sock = socket2::SockRef::from(stream);
    // TOS is 8-bit per the IP spec; clamp defensively against buggy
    // OS/driver combinations.
    sock.tos().map(|tos| tos.min(255) as u8)
}
