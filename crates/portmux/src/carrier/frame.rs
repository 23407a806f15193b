// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing for connection-oriented carriers.
//!
//! Stream transports have no message boundaries, so every exchange is
//! framed:
//!
//! ```text
//! +----------------+------+----------------+----------+-----------+
//! | Length (4B BE) | Kind | EnvLen (2B BE) | Envelope | Payload   |
//! +----------------+------+----------------+----------+-----------+
//! ```
//!
//! The length covers everything after the 4-byte prefix. `Kind`
//! distinguishes the connection header, data frames, and administrative
//! frames; the receiving port routes on it. The envelope is the
//! optional per-message ASCII header.

use crate::bottle::Bottle;
use crate::route::Route;
use std::io::{self, Read, Write};

/// Frame header size (length prefix only).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default maximum frame size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const KIND_HEADER: u8 = 0;
const KIND_DATA: u8 = 1;
const KIND_ADMIN: u8 = 2;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Connection header: the dialing side announces its route.
    Header,
    /// User data, delivered to the port's read handler.
    Data,
    /// Administrative bottle, handled by the port itself.
    Admin,
}

/// One framed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub envelope: String,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Data frame with an envelope.
    pub fn data(payload: Vec<u8>, envelope: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Data,
            envelope: envelope.into(),
            payload,
        }
    }

    /// Administrative frame.
    pub fn admin(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Admin,
            envelope: String::new(),
            payload,
        }
    }

    /// Connection header announcing the dialing side's route.
    pub fn header(route: &Route) -> Self {
        let mut b = Bottle::new();
        b.add_string(route.from.clone());
        b.add_string(route.to.clone());
        b.add_string(route.carrier.clone());
        Self {
            kind: FrameKind::Header,
            envelope: String::new(),
            payload: b.encode(),
        }
    }

    /// Recover the route from a header frame payload.
    pub fn parse_header(&self) -> Option<Route> {
        if self.kind != FrameKind::Header {
            return None;
        }
        let b = Bottle::decode(&self.payload).ok()?;
        Some(Route::new(
            b.get(0).as_str(),
            b.get(1).as_str(),
            b.get(2).as_str(),
        ))
    }

    /// Append the wire form to a buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let env = self.envelope.as_bytes();
        let body_len = 1 + 2 + env.len() + self.payload.len();
        buf.reserve(FRAME_HEADER_SIZE + body_len);
        buf.extend_from_slice(&(body_len as u32).to_be_bytes());
        buf.push(match self.kind {
            FrameKind::Header => KIND_HEADER,
            FrameKind::Data => KIND_DATA,
            FrameKind::Admin => KIND_ADMIN,
        });
        buf.extend_from_slice(&(env.len() as u16).to_be_bytes());
        buf.extend_from_slice(env);
        buf.extend_from_slice(&self.payload);
    }

    /// Wire form as a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Write the frame to a blocking stream.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let buf = self.encode();
        writer.write_all(&buf)?;
        writer.flush()
    }

    /// Read one frame from a blocking stream.
    ///
    /// Frames longer than `max_size` are rejected with
    /// [`io::ErrorKind::InvalidData`] before any body byte is read, so
    /// a hostile length prefix cannot force a huge allocation.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R, max_size: usize) -> io::Result<Frame> {
        let mut prefix = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut prefix)?;
        let body_len = u32::from_be_bytes(prefix) as usize;

        if body_len < 3 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame body shorter than its fixed fields",
            ));
        }
        if body_len > max_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame too large: {} bytes (max {})", body_len, max_size),
            ));
        }

        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body)?;

        let kind = match body[0] {
            KIND_HEADER => FrameKind::Header,
            KIND_DATA => FrameKind::Data,
            KIND_ADMIN => FrameKind::Admin,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown frame kind {}", other),
                ))
            }
        };

        let env_len = u16::from_be_bytes([body[1], body[2]]) as usize;
        if 3 + env_len > body_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "envelope length exceeds frame body",
            ));
        }
        let envelope = std::str::from_utf8(&body[3..3 + env_len])
            .map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "envelope is not valid UTF-8")
            })?
            .to_string();
        let payload = body[3 + env_len..].to_vec();

        Ok(Frame {
            kind,
            envelope,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_data_roundtrip() {
        let frame = Frame::data(b"hello".to_vec(), "env-7");
        let mut cursor = Cursor::new(frame.encode());
        let back = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_admin_roundtrip() {
        let frame = Frame::admin(b"payload".to_vec());
        let mut cursor = Cursor::new(frame.encode());
        let back = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(back.kind, FrameKind::Admin);
        assert_eq!(back.envelope, "");
        assert_eq!(back.payload, b"payload");
    }

    #[test]
    fn test_header_carries_route() {
        let route = Route::new("/a", "/b", "tcp");
        let frame = Frame::header(&route);
        let mut cursor = Cursor::new(frame.encode());
        let back = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(back.parse_header(), Some(route));
    }

    #[test]
    fn test_oversize_rejected_before_alloc() {
        let frame = Frame::data(vec![0u8; 64], "");
        let mut cursor = Cursor::new(frame.encode());
        let err = Frame::read_from(&mut cursor, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_eof_mid_frame() {
        let frame = Frame::data(b"hello world".to_vec(), "");
        let bytes = frame.encode();
        let mut cursor = Cursor::new(&bytes[..bytes.len() - 3]);
        let err = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_bad_kind() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&[9, 0, 0]);
        let mut cursor = Cursor::new(bytes);
        let err = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_multiple_frames_on_stream() {
        let mut buf = Vec::new();
        Frame::data(b"one".to_vec(), "e1").encode_into(&mut buf);
        Frame::admin(b"two".to_vec()).encode_into(&mut buf);
        let mut cursor = Cursor::new(buf);

        let first = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(first.envelope, "e1");
        let second = Frame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(second.kind, FrameKind::Admin);
    }
}
