// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet tracking for fan-out sends.
//!
//! Every `send` allocates one packet from a free-list. The packet's
//! outstanding count starts at 1 (the sender's own hold) and is
//! incremented once per output carrying the message. Each hold is
//! released exactly once; when the count reaches zero the completion
//! callback fires and the slot returns to the free-list.
//!
//! The pool is single-threaded under the port's packet mutex. The
//! input/output count snapshots used by fast reads live in the same
//! struct so they share that mutex.

use super::traits::PortWriter;
use std::sync::Arc;

/// Index of a packet slot within the pool.
pub(crate) type PacketId = usize;

struct PacketSlot {
    in_use: bool,
    outstanding: usize,
    callback: Option<Arc<dyn PortWriter>>,
}

/// Free-list of packet slots plus the connection-count snapshots.
pub(crate) struct PacketPool {
    slots: Vec<PacketSlot>,

    /// Live input connections, excluding admin-originated ones.
    pub input_count: usize,

    /// Live output connections.
    pub output_count: usize,
}

impl PacketPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            input_count: 0,
            output_count: 0,
        }
    }

    /// Allocate a packet holding the completion callback, with the
    /// sender's own hold already counted.
    pub fn get_free(&mut self, callback: Arc<dyn PortWriter>) -> PacketId {
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if !slot.in_use {
                slot.in_use = true;
                slot.outstanding = 1;
                slot.callback = Some(callback);
                return id;
            }
        }
        self.slots.push(PacketSlot {
            in_use: true,
            outstanding: 1,
            callback: Some(callback),
        });
        self.slots.len() - 1
    }

    /// Add one hold for an output now carrying the message.
    pub fn inc(&mut self, id: PacketId) {
        let slot = &mut self.slots[id];
        debug_assert!(slot.in_use);
        slot.outstanding += 1;
    }

    /// Release one hold. When the last hold goes, the slot is recycled
    /// and the callback is returned so the caller can fire it outside
    /// the packet mutex.
    pub fn dec_and_check(&mut self, id: PacketId) -> Option<Arc<dyn PortWriter>> {
        let slot = &mut self.slots[id];
        if !slot.in_use || slot.outstanding == 0 {
            debug_assert!(false, "packet over-released");
            return None;
        }
        slot.outstanding -= 1;
        if slot.outstanding > 0 {
            return None;
        }
        slot.in_use = false;
        slot.callback.take()
    }

    /// Number of packets currently tracking a send.
    #[cfg(test)]
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }
}
