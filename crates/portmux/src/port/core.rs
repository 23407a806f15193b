// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The port connection engine.
//!
//! `PortCore` owns a listening endpoint, accepts and spawns input
//! connections, dials output connections, fans outgoing sends across
//! all outputs, routes incoming frames to the user reader or the admin
//! dispatcher, and coordinates shutdown across the per-connection
//! workers.
//!
//! # Locking
//!
//! ```text
//! state (control plane)  ->  packets (free-list + count snapshots)
//! reader / admin_reader  ->  callback lock
//! name, reporter, envelope, props, type: leaf locks
//! ```
//!
//! The control-plane lock serializes lifecycle transitions, the unit
//! registry, and fan-out; it is never taken by unit workers on their
//! frame path. The connection-change condvar pairs with the state lock:
//! the listener broadcasts after every accept/reap cycle and on phase
//! changes, and synchronous removals wait on it.

use super::admin;
use super::modifier::ModifierHolder;
use super::packet::{PacketId, PacketPool};
use super::traits::{
    ConnectionReader, PortInfo, PortReader, PortReaderCreator, PortReport, PortWriter,
};
use super::unit::{current_tid, FrameReader, NullReader, Unit};
use crate::bottle::{vocab, Bottle, Property, Value};
use crate::carrier::{carrier_modifier, CarrierRegistry, Frame, FrameKind, Inbound, Listener};
use crate::name::{Contact, NameService};
use crate::route::{Route, WILDCARD};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Port accepts incoming connections.
pub const PORT_IS_INPUT: u32 = 0x1;
/// Port may create outgoing connections.
pub const PORT_IS_OUTPUT: u32 = 0x2;
/// Port is an RPC endpoint: at most one data output at any time.
pub const PORT_IS_RPC: u32 = 0x4;

/// Guard for the user callback lock; owns its Arc so the guard can
/// outlive the port's own field lock.
type CallbackGuard = parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ()>;

/// Fan-out selection: normal traffic skips log connections, recorded
/// transcripts target only them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendMode {
    Normal,
    Log,
}

/// Lifecycle phase. Exactly one at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Listening,
    Starting,
    Running,
    Manual,
    Closing,
    Finished,
}

struct CoreState {
    phase: Phase,
    finishing: bool,
    address: Contact,
    units: Vec<Option<Arc<Unit>>>,
    counter: i32,
    events: u64,
    data_output_count: usize,
    listener: Option<Box<dyn Listener>>,
    listener_thread: Option<JoinHandle<()>>,
}

impl CoreState {
    /// Next unit index: strictly positive, monotone between wraps, and
    /// never equal to an index still in use.
    fn next_index(&mut self) -> i32 {
        loop {
            let candidate = self.counter;
            self.counter = self.counter.wrapping_add(1);
            if self.counter < 0 {
                self.counter = 1;
            }
            if candidate <= 0 {
                continue;
            }
            if self
                .units
                .iter()
                .flatten()
                .any(|unit| unit.index == candidate)
            {
                continue;
            }
            return candidate;
        }
    }

    fn live_data_outputs(&self) -> usize {
        self.units
            .iter()
            .flatten()
            .filter(|u| {
                u.is_output() && !u.is_doomed() && !u.is_finished() && u.mode().is_empty()
            })
            .count()
    }

    /// Does a unit with this index still exist and match the route?
    fn is_unit(&self, route: &Route, index: i32) -> bool {
        self.units
            .iter()
            .flatten()
            .any(|u| u.index == index && route.matches(&u.route()))
    }
}

struct TypeInfo {
    name: Option<String>,
    checked: bool,
}

/// Named endpoint owning one optional listener and any number of
/// connection units.
pub struct PortCore {
    carriers: Arc<CarrierRegistry>,
    names: Arc<dyn NameService>,

    state: Mutex<CoreState>,
    cond: Condvar,
    packets: Mutex<PacketPool>,

    name: RwLock<String>,
    envelope: Mutex<String>,
    props: Mutex<Property>,
    type_info: Mutex<TypeInfo>,

    reader: Mutex<Option<Box<dyn PortReader>>>,
    admin_reader: Mutex<Option<Box<dyn PortReader>>>,
    reader_creator: Mutex<Option<Arc<dyn PortReaderCreator>>>,
    reporter: Mutex<Option<Box<dyn PortReport>>>,
    callback_lock: Mutex<Option<Arc<Mutex<()>>>>,
    pub(crate) modifier: ModifierHolder,

    flags: AtomicU32,
    interrupted: AtomicBool,
    interruptible: AtomicBool,
    log_needed: AtomicBool,
    wait_before_send: AtomicBool,
    wait_after_send: AtomicBool,
    control_registration: AtomicBool,
    verbosity: AtomicI64,
    listener_tid: AtomicI64,
    timeout: Mutex<Option<Duration>>,
}

impl PortCore {
    /// Create an engine over the given transports and name service.
    pub fn new(carriers: Arc<CarrierRegistry>, names: Arc<dyn NameService>) -> Arc<PortCore> {
        Arc::new(PortCore {
            carriers,
            names,
            state: Mutex::new(CoreState {
                phase: Phase::Idle,
                finishing: false,
                address: Contact::by_name(""),
                units: Vec::new(),
                counter: 1,
                events: 0,
                data_output_count: 0,
                listener: None,
                listener_thread: None,
            }),
            cond: Condvar::new(),
            packets: Mutex::new(PacketPool::new()),
            name: RwLock::new(String::new()),
            envelope: Mutex::new(String::new()),
            props: Mutex::new(Property::new()),
            type_info: Mutex::new(TypeInfo {
                name: None,
                checked: false,
            }),
            reader: Mutex::new(None),
            admin_reader: Mutex::new(None),
            reader_creator: Mutex::new(None),
            reporter: Mutex::new(None),
            callback_lock: Mutex::new(None),
            modifier: ModifierHolder::default(),
            flags: AtomicU32::new(PORT_IS_INPUT | PORT_IS_OUTPUT),
            interrupted: AtomicBool::new(false),
            interruptible: AtomicBool::new(true),
            log_needed: AtomicBool::new(false),
            wait_before_send: AtomicBool::new(true),
            wait_after_send: AtomicBool::new(true),
            control_registration: AtomicBool::new(true),
            verbosity: AtomicI64::new(1),
            listener_tid: AtomicI64::new(-1),
            timeout: Mutex::new(None),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bind the listening endpoint and optionally announce the name.
    ///
    /// Fails when the port is already on the network, when the
    /// transport cannot bind, or when another port already holds the
    /// name. A name of `/...` (or an empty name) requests
    /// auto-assignment from the bound address.
    pub fn listen(&self, contact: &Contact, announce: bool) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Idle {
            debug_assert_eq!(state.phase, Phase::Idle, "listen() while port is active");
            return false;
        }

        let mut bind = contact.clone();
        bind.timeout = *self.timeout.lock();
        let listener = match self.carriers.listen(&bind) {
            Ok(listener) => listener,
            Err(e) => {
                log::warn!("[port] cannot listen at {}: {}", contact.socket_addr(), e);
                return false;
            }
        };

        let mut address = listener.local_contact();
        address.name = contact.name.clone();
        if address.name.is_empty() || address.name == "/..." {
            address.name = format!("/{}_{}", address.host, address.port);
        }
        address.timeout = *self.timeout.lock();

        *self.name.write() = address.name.clone();
        state.address = address.clone();
        state.listener = Some(listener);
        state.phase = Phase::Listening;
        drop(state);
        log::debug!("[port] {} listening at {}", address.name, address);

        if announce && !self.names.local_mode() {
            if !self.names.announce(&address.name, &address) {
                let mut state = self.state.lock();
                state.listener = None;
                state.phase = Phase::Idle;
                return false;
            }
        }
        true
    }

    /// Spawn the listener task and block until it is accepting.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Listening {
            debug_assert_eq!(state.phase, Phase::Listening, "start() requires listen()");
            return false;
        }
        let listener = match state.listener.take() {
            Some(listener) => listener,
            None => return false,
        };
        state.phase = Phase::Starting;
        drop(state);

        // The slot lets a failed spawn hand the endpoint back.
        let slot = Arc::new(Mutex::new(Some(listener)));
        let weak = Arc::downgrade(self);
        let spawned = std::thread::Builder::new()
            .name("portmux-listen".to_string())
            .spawn({
                let slot = slot.clone();
                move || run_listener(weak, slot)
            });

        let mut state = self.state.lock();
        match spawned {
            Ok(handle) => {
                state.listener_thread = Some(handle);
                // Rendezvous: run_listener flips the phase to Running.
                while state.phase == Phase::Starting {
                    self.cond.wait(&mut state);
                }
                state.phase == Phase::Running
            }
            Err(e) => {
                log::warn!("[port] failed to spawn listener: {}", e);
                state.listener = slot.lock().take();
                state.phase = Phase::Listening;
                false
            }
        }
    }

    /// Promote a write-only client: no listener, no incoming traffic.
    pub fn manual_start(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        if !matches!(state.phase, Phase::Idle | Phase::Listening) {
            return false;
        }
        state.listener = None;
        state.phase = Phase::Manual;
        drop(state);
        self.interruptible.store(false, Ordering::Release);
        *self.name.write() = name.to_string();
        true
    }

    /// Flag the port as interrupted and give any blocked reader a
    /// synthetic empty read so it can observe the flag.
    pub fn interrupt(&self) {
        {
            let state = self.state.lock();
            // No listener, nothing to interrupt.
            if !matches!(
                state.phase,
                Phase::Listening | Phase::Starting | Phase::Running | Phase::Closing
            ) {
                return;
            }
        }
        self.interrupted.store(true, Ordering::Release);
        if !self.interruptible.load(Ordering::Acquire) {
            return;
        }
        let _state = self.state.lock();
        let mut guard = self.reader.lock();
        if let Some(reader) = guard.as_mut() {
            log::debug!("[port] sending update-state message to listener");
            let _cb = self.lock_callback();
            let mut null = NullReader::new();
            reader.read(&mut null);
        }
    }

    /// Clear the interrupted flag.
    pub fn resume(&self) {
        self.interrupted.store(false, Ordering::Release);
    }

    /// Idempotent shutdown; restores the port to Idle.
    pub fn close(self: &Arc<Self>) {
        self.close_main();
        self.modifier.detach(true);
        self.modifier.detach(false);
    }

    fn close_main(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.finishing {
                return;
            }
            match state.phase {
                Phase::Running | Phase::Manual => {
                    state.finishing = true;
                }
                Phase::Listening => {
                    // Bound but never started: drop the endpoint and
                    // revert.
                    state.listener = None;
                    state.phase = Phase::Idle;
                    drop(state);
                    self.unregister_name();
                    return;
                }
                _ => return,
            }
        }
        log::debug!("[port] {} preparing to shut down", self.name());

        // Ask peers to tear down their outputs to us; the listener is
        // still running so those negotiations can reach us.
        let self_name = self.name();
        let mut prev_name = String::new();
        loop {
            let remove_name = {
                let state = self.state.lock();
                state
                    .units
                    .iter()
                    .flatten()
                    .filter(|u| u.is_input() && !u.is_doomed())
                    .map(|u| u.route().from)
                    .find(|from| {
                        from.starts_with('/') && *from != self_name && *from != prev_name
                    })
            };
            let remove_name = match remove_name {
                Some(name) => name,
                None => break,
            };
            log::debug!("[port] requesting removal of connection from {}", remove_name);
            if !self.names.disconnect(&remove_name, &self_name) {
                self.names.disconnect_input(&self_name, &remove_name);
            }
            prev_name = remove_name;
        }

        // Outputs are torn down brute force; peers are not consulted.
        loop {
            let remove_route = {
                let state = self.state.lock();
                state
                    .units
                    .iter()
                    .flatten()
                    .filter(|u| u.is_output() && !u.is_finished())
                    .map(|u| u.route())
                    .find(|route| route.from == self_name)
            };
            match remove_route {
                Some(route) => {
                    self.remove_unit_ext(&route, true, None, None);
                }
                None => break,
            }
        }

        let was_running = { self.state.lock().phase == Phase::Running };
        if was_running {
            {
                self.state.lock().phase = Phase::Closing;
            }
            // Unblock the accept and join the listener.
            self.dial_self();
            let handle = { self.state.lock().listener_thread.take() };
            if let Some(handle) = handle {
                let _ = handle.join();
            }
            debug_assert_eq!(self.state.lock().phase, Phase::Finished);
        } else {
            // Manual ports have no listener to bring down.
            self.state.lock().phase = Phase::Finished;
        }
        self.close_units();

        // Wake a blocked reader with the bad news.
        let reader = self.reader.lock().take();
        if let Some(mut reader) = reader {
            log::debug!("[port] sending end-of-port message to listener");
            let _cb = self.lock_callback();
            let mut null = NullReader::new();
            reader.read(&mut null);
        }

        if was_running {
            self.unregister_name();
        }

        let mut state = self.state.lock();
        state.finishing = false;
        state.phase = Phase::Idle;
        drop(state);
        self.interrupted.store(false, Ordering::Release);
        self.interruptible.store(true, Ordering::Release);
        self.log_needed.store(false, Ordering::Release);
    }

    fn unregister_name(&self) {
        if !self.control_registration.load(Ordering::Acquire) || self.names.local_mode() {
            return;
        }
        let name = self.name();
        if !name.is_empty() {
            self.names.unregister(&name);
        }
    }

    // ========================================================================
    // Unit registry
    // ========================================================================

    /// Wrap an accepted connection in an input unit. Listener thread
    /// only.
    pub(crate) fn add_input(self: &Arc<Self>, conn: Box<dyn Inbound>) {
        let mut state = self.state.lock();
        if state.phase == Phase::Finished {
            return;
        }
        let index = state.next_index();
        match Unit::spawn_input(Arc::downgrade(self), index, conn, false, None) {
            Ok(unit) => state.units.push(Some(unit)),
            Err(e) => log::warn!("[port] failed to spawn input worker: {}", e),
        }
    }

    /// Register a reverse (pull-style) connection as an input unit.
    pub(crate) fn add_reverse_input(
        self: &Arc<Self>,
        conn: Box<dyn Inbound>,
        pup_name: Option<String>,
    ) {
        let mut state = self.state.lock();
        if state.phase == Phase::Finished {
            return;
        }
        let index = state.next_index();
        match Unit::spawn_input(Arc::downgrade(self), index, conn, true, pup_name) {
            Ok(unit) => state.units.push(Some(unit)),
            Err(e) => log::warn!("[port] failed to spawn reverse input worker: {}", e),
        }
    }

    /// Wrap a dialed connection in an output unit, enforcing RPC
    /// exclusivity atomically with registration.
    fn add_output_unit(
        self: &Arc<Self>,
        conn: Box<dyn crate::carrier::Outbound>,
        mode: String,
    ) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.phase == Phase::Finished {
            return Err("port is shutting down".to_string());
        }
        let rpc = self.flags.load(Ordering::Acquire) & PORT_IS_RPC != 0;
        if rpc && mode.is_empty() && state.live_data_outputs() >= 1 {
            return Err("RPC output already connected".to_string());
        }
        let index = state.next_index();
        match Unit::spawn_output(Arc::downgrade(self), index, conn, mode) {
            Ok(unit) => {
                if !unit.mode().is_empty() {
                    self.log_needed.store(true, Ordering::Release);
                }
                state.units.push(Some(unit));
                Ok(())
            }
            Err(e) => Err(format!("failed to spawn output worker: {}", e)),
        }
    }

    /// Mark all units matching the route as doomed and prod them to
    /// die. With `except`, a carrier-name hit reports satisfaction
    /// instead of dooming. With `synch`, blocks until the doomed units
    /// have left the registry. `skip_index` protects the connection a
    /// command arrived on from dooming itself.
    pub(crate) fn remove_unit_ext(
        &self,
        route: &Route,
        synch: bool,
        mut except: Option<&mut bool>,
        skip_index: Option<i32>,
    ) -> bool {
        match except.as_deref_mut() {
            Some(e) => {
                *e = false;
                log::debug!("[port] asked to remove connection in the way of {}", route);
            }
            None => log::debug!("[port] asked to remove connection {}", route),
        }

        let mut removals = Vec::new();
        let has_listener;
        {
            let state = self.state.lock();
            if state.phase != Phase::Finished {
                for unit in state.units.iter().flatten() {
                    if Some(unit.index) == skip_index {
                        continue;
                    }
                    let current = unit.route();
                    let matched = match except.as_deref_mut() {
                        Some(e) => route.matches_except_carrier(&current, e),
                        None => route.matches(&current),
                    };
                    if matched {
                        log::debug!("[port] removing connection {}", current);
                        unit.set_doomed();
                        removals.push(unit.index);
                    }
                }
            }
            has_listener =
                state.phase == Phase::Running && state.listener_thread.is_some();
        }
        if removals.is_empty() {
            return false;
        }

        if !has_listener {
            // No server thread, no problems: reap in place.
            self.reap_units();
            return true;
        }

        // Wake the listener so it reaps, then optionally wait for the
        // registry to reflect the removals.
        self.dial_self();
        if synch {
            log::debug!("[port] synchronizing with connection death");
            let mut state = self.state.lock();
            loop {
                if state.phase == Phase::Finished || state.listener_thread.is_none() {
                    break;
                }
                // A caller whose own connection got doomed by a
                // concurrent removal must not wait for a reaper that
                // may be waiting for it.
                if let Some(skip) = skip_index {
                    let caller_doomed = state
                        .units
                        .iter()
                        .flatten()
                        .any(|u| u.index == skip && u.is_doomed());
                    if caller_doomed {
                        break;
                    }
                }
                let lingering = removals
                    .iter()
                    .any(|index| state.is_unit(route, *index));
                if !lingering {
                    break;
                }
                // Bounded wait: re-check even if a broadcast is missed.
                let _ = self
                    .cond
                    .wait_for(&mut state, Duration::from_millis(100));
            }
        }
        true
    }

    /// Public removal by route.
    pub fn remove_io(&self, route: &Route, synch: bool) -> bool {
        self.remove_unit_ext(route, synch, None, None)
    }

    /// Close and join doomed units, then collect finished slots.
    /// Called by the listener after each accept cycle.
    pub(crate) fn reap_units(&self) {
        let doomed: Vec<Arc<Unit>> = {
            let state = self.state.lock();
            if state.phase == Phase::Finished {
                Vec::new()
            } else {
                state
                    .units
                    .iter()
                    .flatten()
                    .filter(|u| u.is_doomed() && !u.is_finished())
                    .cloned()
                    .collect()
            }
        };
        for unit in doomed {
            log::debug!("[port] informing connection {} that it is doomed", unit.route());
            unit.close();
            unit.join();
        }
        self.clean_units(true);
    }

    /// Collect finished units and refresh the connection counts. The
    /// non-blocking variant skips if the control plane is contended.
    pub(crate) fn clean_units(&self, blocking: bool) {
        let mut state = match blocking {
            true => self.state.lock(),
            false => match self.state.try_lock() {
                Some(guard) => guard,
                None => return,
            },
        };

        let mut input_count = 0;
        let mut output_count = 0;
        let mut data_output_count = 0;
        if state.phase != Phase::Finished {
            for slot in state.units.iter_mut() {
                let finished = match slot.as_ref() {
                    Some(unit) => {
                        if unit.is_finished() {
                            true
                        } else {
                            if !unit.is_doomed() {
                                if unit.is_output() {
                                    output_count += 1;
                                    if unit.mode().is_empty() {
                                        data_output_count += 1;
                                    }
                                }
                                if unit.is_input() && unit.route().from != "admin" {
                                    input_count += 1;
                                }
                            }
                            false
                        }
                    }
                    None => false,
                };
                if finished {
                    if let Some(unit) = slot.take() {
                        unit.close();
                        unit.join();
                    }
                }
            }
            state.units.retain(|slot| slot.is_some());
        }
        state.data_output_count = data_output_count;
        drop(state);

        let mut packets = self.packets.lock();
        packets.input_count = input_count;
        packets.output_count = output_count;
    }

    /// Force-close, join, and delete every unit. Requires the listener
    /// to be finished.
    fn close_units(&self) {
        let units: Vec<Arc<Unit>> = {
            let mut state = self.state.lock();
            debug_assert_eq!(state.phase, Phase::Finished);
            let all = state.units.iter().flatten().cloned().collect();
            state.units.clear();
            state.data_output_count = 0;
            all
        };
        for unit in &units {
            unit.close();
        }
        for unit in &units {
            unit.join();
        }
        let mut packets = self.packets.lock();
        packets.input_count = 0;
        packets.output_count = 0;
    }

    /// Dial our own listener once to unblock its accept.
    fn dial_self(&self) {
        let (mut contact, name) = {
            let state = self.state.lock();
            (state.address.clone(), self.name())
        };
        if contact.timeout.is_none() {
            contact.timeout = Some(Duration::from_secs(2));
        }
        match self.carriers.connect(&contact) {
            Ok(mut conn) => {
                let carrier = contact.carrier.clone();
                let _ = conn.open(&Route::new(name.clone(), name, carrier));
                log::debug!("[port] sent message to prod connection death");
            }
            Err(e) => log::debug!("[port] self-dial failed: {}", e),
        }
    }

    // ========================================================================
    // Output management
    // ========================================================================

    /// Dial a destination and register the connection, reporting the
    /// outcome as human-readable text.
    pub fn add_output_report(
        self: &Arc<Self>,
        dest: &str,
        only_if_needed: bool,
        report: &mut String,
    ) -> bool {
        log::debug!("[port] asked to add output to {}", dest);
        let parts = Contact::from_text(dest);
        let mut address = match self.names.query(&parts.name) {
            Some(contact) if contact.is_valid() => contact,
            _ => {
                append_line(report, &format!("Do not know how to connect to {}", dest));
                return false;
            }
        };
        let self_name = self.name();
        let carrier_name = if parts.carrier.is_empty() {
            if address.carrier.is_empty() {
                "tcp".to_string()
            } else {
                address.carrier.clone()
            }
        } else {
            parts.carrier.clone()
        };

        // Clean existing connections to this destination, optionally
        // stopping when one with the right carrier already exists.
        if only_if_needed {
            let mut except = false;
            self.remove_unit_ext(
                &Route::new(self_name.clone(), address.name.clone(), carrier_name.clone()),
                true,
                Some(&mut except),
                None,
            );
            if except {
                log::debug!("[port] output already present to {}", dest);
                append_line(
                    report,
                    &format!(
                        "Desired connection already present from {} to {}",
                        self_name, dest
                    ),
                );
                return true;
            }
        } else {
            self.remove_unit_ext(
                &Route::new(self_name.clone(), address.name.clone(), WILDCARD),
                true,
                None,
                None,
            );
        }

        let target_name = if address.name.is_empty() {
            address.to_string()
        } else {
            address.name.clone()
        };
        let mut route = Route::new(self_name.clone(), target_name, carrier_name);

        // Port restrictions: logging dialect, output permission, RPC
        // exclusivity.
        let flags = self.flags.load(Ordering::Acquire);
        let allow_output = flags & PORT_IS_OUTPUT != 0;
        let rpc = flags & PORT_IS_RPC != 0;
        let log_mode = carrier_modifier(&route.carrier, "log");
        let is_log = log_mode.is_some();
        let mut append = String::new();
        if let Some(mode) = &log_mode {
            if mode != "in" {
                append_line(
                    report,
                    &format!(
                        "Logger configured as log.{}, but only log.in is supported",
                        mode
                    ),
                );
                return false;
            }
            append = format!(
                "; {} will forward messages and replies (if any) to {}",
                route.from, route.to
            );
        }
        if !allow_output && !is_log {
            let push = self
                .carriers
                .choose(&route.carrier)
                .map(|c| c.is_push())
                .unwrap_or(false);
            if push {
                append_line(report, "Outputs not allowed");
                return false;
            }
        } else if rpc && !is_log {
            let state = self.state.lock();
            if state.live_data_outputs() >= 1 {
                drop(state);
                append_line(report, "RPC output already connected");
                return false;
            }
        }

        // Dial.
        address.carrier = route.carrier.clone();
        address.timeout = *self.timeout.lock();
        let mut conn = match self.carriers.connect(&address) {
            Ok(conn) => conn,
            Err(e) => {
                log::debug!("[port] connect to {} failed: {}", dest, e);
                append_line(report, &format!("Cannot connect to {}", dest));
                return false;
            }
        };
        conn.set_timeout(*self.timeout.lock());
        if let Err(e) = conn.open(&route) {
            log::debug!("[port] open route error: {}", e);
            append_line(report, &format!("Cannot connect to {}", dest));
            return false;
        }

        let push = self
            .carriers
            .choose(&route.carrier)
            .map(|c| c.is_push())
            .unwrap_or(true);
        if push {
            // The normal case.
            if let Err(err) = self.add_output_unit(conn, log_mode.unwrap_or_default()) {
                append_line(report, &err);
                return false;
            }
        } else {
            // Pull-style carriers dial in the opposite direction: the
            // connection inverts and joins the registry as an input.
            route.swap_names();
            conn.rename(route.clone());
            match conn.into_inbound() {
                Ok(inbound) => self.add_reverse_input(inbound, None),
                Err(_) => {
                    append_line(report, &format!("Cannot connect to {}", dest));
                    return false;
                }
            }
        }

        append_line(
            report,
            &format!("Added connection from {} to {}{}", self_name, dest, append),
        );
        self.clean_units(true);
        true
    }

    /// Dial a destination; text report discarded.
    pub fn add_output(self: &Arc<Self>, dest: &str, only_if_needed: bool) -> bool {
        let mut report = String::new();
        self.add_output_report(dest, only_if_needed, &mut report)
    }

    /// Remove outgoing connections to a destination.
    pub(crate) fn remove_output_report(
        &self,
        dest: &str,
        report: &mut String,
        skip_index: Option<i32>,
    ) -> bool {
        let found = self.remove_unit_ext(
            &Route::new(WILDCARD, dest, WILDCARD),
            true,
            None,
            skip_index,
        );
        if found {
            append_line(
                report,
                &format!("Removed connection from {} to {}", self.name(), dest),
            );
        } else {
            append_line(
                report,
                &format!("Could not find an outgoing connection to {}", dest),
            );
        }
        self.clean_units(true);
        found
    }

    /// Remove incoming connections from a source.
    pub(crate) fn remove_input_report(
        &self,
        src: &str,
        report: &mut String,
        skip_index: Option<i32>,
    ) -> bool {
        let found = self.remove_unit_ext(
            &Route::new(src, WILDCARD, WILDCARD),
            true,
            None,
            skip_index,
        );
        if found {
            append_line(
                report,
                &format!("Removing connection from {} to {}", src, self.name()),
            );
        } else {
            append_line(
                report,
                &format!("Could not find an incoming connection from {}", src),
            );
        }
        self.clean_units(true);
        found
    }

    /// Remove outgoing connections to a destination.
    pub fn remove_output(&self, dest: &str) -> bool {
        let mut report = String::new();
        self.remove_output_report(dest, &mut report, None)
    }

    /// Remove incoming connections from a source.
    pub fn remove_input(&self, src: &str) -> bool {
        let mut report = String::new();
        self.remove_input_report(src, &mut report, None)
    }

    // ========================================================================
    // Send path
    // ========================================================================

    /// Send a message across all data outputs.
    pub fn send(&self, writer: Arc<dyn PortWriter>) -> bool {
        self.send_full(writer, None, None)
    }

    /// Send with an optional reply reader and completion callback.
    ///
    /// With `waitAfterSend` and a reader, the result is the AND of the
    /// per-output acknowledgements and whether any reply arrived. With
    /// more than one output attached the reply is best-effort: replies
    /// from different peers race for the same reader.
    pub fn send_full(
        &self,
        writer: Arc<dyn PortWriter>,
        reader: Option<&mut dyn PortReader>,
        callback: Option<Arc<dyn PortWriter>>,
    ) -> bool {
        writer.on_commencement();
        let mut payload = Vec::new();
        if !writer.write(&mut payload) {
            return false;
        }
        if !self.modifier.apply(true, &mut payload) {
            return false;
        }
        let callback = callback.unwrap_or_else(|| writer.clone());
        self.send_payload(payload, SendMode::Normal, reader, callback)
    }

    pub(crate) fn send_payload(
        &self,
        payload: Vec<u8>,
        mode: SendMode,
        mut reader: Option<&mut dyn PortReader>,
        callback: Arc<dyn PortWriter>,
    ) -> bool {
        if self.interrupted.load(Ordering::Acquire) {
            return false;
        }

        // The fan-out is atomic with respect to the unit registry:
        // the control-plane lock is held across the whole scan.
        let state = self.state.lock();
        if state.finishing || state.phase == Phase::Finished {
            return false;
        }

        let envelope = self.envelope.lock().clone();
        let data = Arc::new(payload);
        let packet: PacketId = self.packets.lock().get_free(callback);

        let wait_after = self.wait_after_send.load(Ordering::Acquire);
        let wait_before = self.wait_before_send.load(Ordering::Acquire);
        let mut all_ok = true;
        let mut got_reply = false;
        let mut log_count = 0;

        for unit in state.units.iter().flatten() {
            if !unit.is_output() || unit.is_finished() {
                continue;
            }
            let is_log = !unit.mode().is_empty();
            if is_log {
                log_count += 1;
            }
            let wanted = match mode {
                SendMode::Normal => !is_log,
                SendMode::Log => is_log,
            };
            if !wanted {
                continue;
            }
            let waiter = wait_after || mode == SendMode::Log;
            self.packets.lock().inc(packet);
            let want_reply = waiter && reader.is_some();
            let outcome = unit.send_job(
                data.clone(),
                envelope.clone(),
                packet,
                want_reply,
                wait_before,
                waiter,
            );
            if outcome.completed_sync {
                // The unit never took the job; drop its hold here.
                self.notify_completion(packet);
            }
            got_reply |= outcome.got_reply;
            if let (Some(user_reader), Some(reply)) = (reader.as_deref_mut(), outcome.reply)
            {
                let mut reply_reader = ReplyReader {
                    payload: reply,
                    route: unit.route(),
                };
                let _cb = self.lock_callback();
                user_reader.read(&mut reply_reader);
            }
            if waiter && (!outcome.ok || unit.is_finished()) {
                all_ok = false;
            }
        }

        if mode == SendMode::Log && log_count == 0 {
            // Nobody is recording; skip the recording path from now on.
            self.log_needed.store(false, Ordering::Release);
        }

        // Release the sender's own hold.
        self.notify_completion(packet);
        drop(state);

        if wait_after && reader.is_some() {
            all_ok = all_ok && got_reply;
        }
        all_ok
    }

    /// Release one packet hold; fires the completion callback when the
    /// last hold goes.
    pub(crate) fn notify_completion(&self, packet: PacketId) {
        let callback = self.packets.lock().dec_and_check(packet);
        if let Some(callback) = callback {
            callback.on_completion();
        }
    }

    // ========================================================================
    // Input path
    // ========================================================================

    /// Route one data frame to the user reader (or drain it).
    /// Returns true when the connection should be dropped.
    pub(crate) fn handle_data_frame(
        &self,
        frame: &Frame,
        conn: &mut dyn Inbound,
        local_reader: Option<&mut dyn PortReader>,
    ) -> bool {
        let mut payload = frame.payload.clone();
        if !self.modifier.apply(false, &mut payload) {
            // Vetoed by the input modifier.
            return false;
        }
        let frame = Frame {
            kind: FrameKind::Data,
            envelope: frame.envelope.clone(),
            payload,
        };

        if self.interrupted.load(Ordering::Acquire) {
            log::debug!("[port] data received while interrupted, discarding");
            return false;
        }

        // A connection-specific reader takes precedence.
        if let Some(reader) = local_reader {
            self.interruptible.store(false, Ordering::Release);
            let mut frame_reader = FrameReader::new(&frame, conn);
            {
                let _cb = self.lock_callback();
                reader.read(&mut frame_reader);
            }
            self.interruptible.store(true, Ordering::Release);
            return frame_reader.drop_requested();
        }

        let mut guard = self.reader.lock();
        let reader = match guard.as_mut() {
            Some(reader) => reader,
            None => {
                log::debug!("[port] data received, no reader for it");
                return false;
            }
        };

        self.interruptible.store(false, Ordering::Release);
        let have_outputs = self.packets.lock().output_count != 0;
        let drop_conn;
        if self.log_needed.load(Ordering::Acquire) && have_outputs {
            // Record the exchange and fan the transcript out to log
            // connections after the handler returns.
            let mut recorder = RecordingReader::new(&frame, conn);
            {
                let _cb = self.lock_callback();
                reader.read(&mut recorder);
            }
            drop_conn = recorder.inner.drop_requested();
            let transcript = recorder.transcript().encode();
            drop(guard);
            let callback: Arc<dyn PortWriter> = Arc::new(transcript.clone());
            self.send_payload(transcript, SendMode::Log, None, callback);
        } else {
            let mut frame_reader = FrameReader::new(&frame, conn);
            {
                let _cb = self.lock_callback();
                reader.read(&mut frame_reader);
            }
            drop_conn = frame_reader.drop_requested();
        }
        self.interruptible.store(true, Ordering::Release);
        drop_conn
    }

    /// Decode and dispatch one administrative frame, writing the reply
    /// on the connection's back-channel. Returns true when the peer
    /// asked for the connection to be dropped.
    pub(crate) fn handle_admin_frame(
        self: &Arc<Self>,
        caller_index: i32,
        frame: &Frame,
        conn: &mut dyn Inbound,
    ) -> bool {
        let cmd = match Bottle::decode(&frame.payload) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::debug!("[port] malformed admin bottle: {}", e);
                let mut reply = Bottle::new();
                reply.add_vocab(vocab("fail"));
                reply.add_string(format!("malformed admin message: {}", e));
                let _ = conn.reply(&Frame::admin(reply.encode()));
                return false;
            }
        };
        log::debug!("[admin] port {} received command {}", self.name(), cmd);
        let result = admin::dispatch(self, caller_index, &cmd);
        if conn.reply(&Frame::admin(result.reply.encode())).is_err() {
            return true;
        }
        result.drop_connection
    }

    /// Per-connection reader from the installed factory, if any.
    pub(crate) fn create_connection_reader(&self) -> Option<Box<dyn PortReader>> {
        self.reader_creator
            .lock()
            .as_ref()
            .map(|creator| creator.create())
    }

    // ========================================================================
    // Handlers and configuration
    // ========================================================================

    /// Install the user data reader. Only valid while not Running.
    pub fn set_read_handler(&self, reader: Box<dyn PortReader>) {
        debug_assert!(!self.is_running(), "cannot set reader while running");
        self.check_type(reader.as_ref());
        *self.reader.lock() = Some(reader);
    }

    /// Install the admin reader override. Only valid while not Running.
    pub fn set_admin_read_handler(&self, reader: Box<dyn PortReader>) {
        debug_assert!(!self.is_running(), "cannot set admin reader while running");
        *self.admin_reader.lock() = Some(reader);
    }

    /// Install a factory creating one reader per connection. Only valid
    /// while not Running.
    pub fn set_read_creator(&self, creator: Arc<dyn PortReaderCreator>) {
        debug_assert!(!self.is_running(), "cannot set read creator while running");
        *self.reader_creator.lock() = Some(creator);
    }

    /// Install the event reporter.
    pub fn set_report_callback(&self, reporter: Box<dyn PortReport>) {
        *self.reporter.lock() = Some(reporter);
    }

    /// Remove the event reporter.
    pub fn reset_report_callback(&self) {
        *self.reporter.lock() = None;
    }

    pub(crate) fn report_unit_event(&self, route: &Route, incoming: bool, created: bool) {
        let mut guard = self.reporter.lock();
        if let Some(reporter) = guard.as_mut() {
            let name = self.name();
            reporter.report(&PortInfo::connection(&name, route, incoming, created));
        }
    }

    /// Use an externally owned callback lock (`Some`) or allocate one
    /// internally (`None`).
    pub fn set_callback_lock(&self, lock: Option<Arc<Mutex<()>>>) {
        *self.callback_lock.lock() = Some(lock.unwrap_or_else(|| Arc::new(Mutex::new(()))));
    }

    /// Stop wrapping reader invocations in a callback lock.
    pub fn remove_callback_lock(&self) {
        *self.callback_lock.lock() = None;
    }

    pub(crate) fn lock_callback(&self) -> Option<CallbackGuard> {
        let lock = self.callback_lock.lock().clone();
        lock.map(|mutex| mutex.lock_arc())
    }

    /// Set the per-operation I/O timeout applied to new connections.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *self.timeout.lock() = timeout;
    }

    /// Set the outgoing envelope. Truncated at the first control
    /// character.
    pub fn set_envelope(&self, envelope: &str) {
        let cleaned = match envelope.find(|c| (c as u32) < 0x20) {
            Some(pos) => &envelope[..pos],
            None => envelope,
        };
        log::debug!("[port] set envelope to {}", cleaned);
        *self.envelope.lock() = cleaned.to_string();
    }

    /// Current outgoing envelope.
    pub fn get_envelope(&self) -> String {
        self.envelope.lock().clone()
    }

    /// Diagnostic verbosity level.
    pub fn set_verbosity(&self, level: i32) {
        self.verbosity.store(i64::from(level), Ordering::Release);
    }

    pub fn verbosity(&self) -> i32 {
        self.verbosity.load(Ordering::Acquire) as i32
    }

    /// Whether close() unregisters the name with the name service.
    pub fn set_control_registration(&self, flag: bool) {
        self.control_registration.store(flag, Ordering::Release);
    }

    /// Block until the previous message drained before queueing a new
    /// one on each output.
    pub fn set_wait_before_send(&self, wait: bool) {
        self.wait_before_send.store(wait, Ordering::Release);
    }

    /// Block until each output acknowledges the current message.
    pub fn set_wait_after_send(&self, wait: bool) {
        self.wait_after_send.store(wait, Ordering::Release);
    }

    /// Replace the port flags (INPUT/OUTPUT/RPC). Only meaningful
    /// before `listen`.
    pub fn set_flags(&self, flags: u32) {
        self.flags.store(flags, Ordering::Release);
    }

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    // ========================================================================
    // Type registry
    // ========================================================================

    /// Adopt the reader's declared type on first contact.
    pub fn check_type(&self, reader: &dyn PortReader) {
        let mut info = self.type_info.lock();
        if !info.checked {
            if info.name.is_none() {
                info.name = reader.read_type();
            }
            info.checked = true;
        }
    }

    /// Declare the payload type outright.
    pub fn promise_type(&self, name: impl Into<String>) {
        let mut info = self.type_info.lock();
        info.name = Some(name.into());
        info.checked = true;
    }

    /// Declared payload type, if any.
    pub fn type_name(&self) -> Option<String> {
        self.type_info.lock().name.clone()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Registered name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Bound network address.
    pub fn address(&self) -> Contact {
        self.state.lock().address.clone()
    }

    pub fn is_listening(&self) -> bool {
        matches!(
            self.state.lock().phase,
            Phase::Listening | Phase::Starting | Phase::Running | Phase::Closing
        )
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().phase == Phase::Running
    }

    pub fn is_manual(&self) -> bool {
        self.state.lock().phase == Phase::Manual
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// How many accept cycles the listener has run.
    pub fn event_count(&self) -> u64 {
        self.state.lock().events
    }

    /// Live input connections (admin connections excluded).
    pub fn input_count(&self) -> usize {
        self.clean_units(false);
        self.packets.lock().input_count
    }

    /// Live output connections.
    pub fn output_count(&self) -> usize {
        self.clean_units(false);
        self.packets.lock().output_count
    }

    /// Live data outputs (log connections excluded).
    pub fn data_output_count(&self) -> usize {
        self.state.lock().data_output_count
    }

    /// True while any output worker is inside a write.
    pub fn is_writing(&self) -> bool {
        let state = self.state.lock();
        if state.phase == Phase::Finished {
            return false;
        }
        state
            .units
            .iter()
            .flatten()
            .any(|u| !u.is_finished() && u.is_busy())
    }

    /// Run a closure over the unit registry under the control-plane
    /// lock.
    pub(crate) fn with_units<R>(&self, f: impl FnOnce(&[Option<Arc<Unit>>]) -> R) -> R {
        let state = self.state.lock();
        f(&state.units)
    }

    /// Run a closure over the user property map.
    pub fn with_properties<R>(&self, f: impl FnOnce(&mut Property) -> R) -> R {
        let mut props = self.props.lock();
        f(&mut props)
    }

    pub(crate) fn carriers(&self) -> &Arc<CarrierRegistry> {
        &self.carriers
    }

    pub(crate) fn names(&self) -> &Arc<dyn NameService> {
        &self.names
    }

    pub(crate) fn listener_tid(&self) -> i64 {
        self.listener_tid.load(Ordering::Acquire)
    }

    /// Run the admin reader override on an unrecognized command.
    pub(crate) fn admin_fallback(&self, cmd: &Bottle) -> Option<Bottle> {
        let mut guard = self.admin_reader.lock();
        let reader = guard.as_mut()?;
        let mut capture = CaptureReader::new(cmd.encode());
        let ok = {
            let _cb = self.lock_callback();
            reader.read(&mut capture)
        };
        if ok {
            capture.reply_bottle()
        } else {
            None
        }
    }

    /// Human-readable connectivity report.
    ///
    /// Outputs are reported unconditionally; inputs only when their
    /// carrier name is non-empty (a connection still mid-handshake has
    /// no carrier yet and is noise here).
    pub fn describe(&self, report: &mut String) {
        self.clean_units(false);
        let state = self.state.lock();
        append_line(
            report,
            &format!("This is {} at {}", self.name(), state.address),
        );

        let mut output_count = 0;
        for unit in state.units.iter().flatten() {
            if unit.is_output() && !unit.is_finished() {
                let route = unit.route();
                append_line(
                    report,
                    &format!(
                        "There is an output connection from {} to {} using {}",
                        route.from, route.to, route.carrier
                    ),
                );
                output_count += 1;
            }
        }
        if output_count < 1 {
            append_line(report, "There are no outgoing connections");
        }

        let mut input_count = 0;
        for unit in state.units.iter().flatten() {
            if unit.is_input() && !unit.is_finished() {
                let route = unit.route();
                if !route.carrier.is_empty() {
                    append_line(
                        report,
                        &format!(
                            "There is an input connection from {} to {} using {}",
                            route.from, route.to, route.carrier
                        ),
                    );
                    input_count += 1;
                }
            }
        }
        if input_count < 1 {
            append_line(report, "There are no incoming connections");
        }
    }

    /// Connectivity report through the event channel.
    pub fn describe_report(&self, reporter: &mut dyn PortReport) {
        self.clean_units(false);
        let state = self.state.lock();
        let name = self.name();
        reporter.report(&PortInfo::misc(format!(
            "This is {} at {}",
            name, state.address
        )));

        let mut output_count = 0;
        for unit in state.units.iter().flatten() {
            if unit.is_output() && !unit.is_finished() {
                reporter.report(&PortInfo::connection(&name, &unit.route(), false, true));
                output_count += 1;
            }
        }
        if output_count < 1 {
            reporter.report(&PortInfo::misc("There are no outgoing connections"));
        }

        let mut input_count = 0;
        for unit in state.units.iter().flatten() {
            if unit.is_input() && !unit.is_finished() {
                let route = unit.route();
                if !route.carrier.is_empty() {
                    reporter.report(&PortInfo::connection(&name, &route, true, true));
                    input_count += 1;
                }
            }
        }
        if input_count < 1 {
            reporter.report(&PortInfo::misc("There are no incoming connections"));
        }
    }

    /// Push a TOS byte to a unit's stream(s). Input units push to their
    /// back-channel. Returns true when there was nothing to set.
    pub(crate) fn set_type_of_service(&self, unit: &Unit, tos: u8) -> bool {
        unit.control().set_tos(tos)
    }

    /// TOS byte of a unit's stream, if the transport exposes one.
    pub(crate) fn type_of_service(&self, unit: &Unit) -> Option<u8> {
        unit.control().tos()
    }
}

impl Drop for PortCore {
    fn drop(&mut self) {
        // Workers hold only Weak references, so reaching this point
        // means they are gone or about to fail their upgrade and exit.
        // A port must still be close()d to join them deterministically.
        if !std::thread::panicking() {
            debug_assert!(
                self.state.get_mut().phase != Phase::Running,
                "port dropped while running; call close()"
            );
        }
    }
}

// ============================================================================
// Listener task
// ============================================================================

fn run_listener(port: Weak<PortCore>, slot: Arc<Mutex<Option<Box<dyn Listener>>>>) {
    let mut listener = match slot.lock().take() {
        Some(listener) => listener,
        None => return,
    };
    {
        let p = match port.upgrade() {
            Some(p) => p,
            None => return,
        };
        p.listener_tid.store(current_tid(), Ordering::Release);
        let mut state = p.state.lock();
        state.phase = Phase::Running;
        p.cond.notify_all();
    }
    log::debug!("[port] listener running");

    let mut should_stop = false;
    while !should_stop {
        let accepted = listener.accept();
        let p = match port.upgrade() {
            Some(p) => p,
            None => break,
        };

        let mut conn = None;
        {
            let mut state = p.state.lock();
            if state.phase == Phase::Closing {
                should_stop = true;
            }
            state.events += 1;
            match accepted {
                Ok(inbound) => {
                    if should_stop {
                        // Shutting down: release the session untouched.
                        drop(inbound);
                    } else {
                        inbound.set_timeout(*p.timeout.lock());
                        conn = Some(inbound);
                    }
                }
                Err(e) => {
                    // Transient accept failure: loop and retry.
                    log::trace!("[port] accept error: {}", e);
                }
            }
        }

        if let Some(inbound) = conn {
            log::debug!("[port] received something");
            p.add_input(inbound);
        }

        // Remove any defunct connections, then wake tasks waiting on
        // connection-state changes.
        p.reap_units();
        {
            let _state = p.state.lock();
            p.cond.notify_all();
        }
    }

    if let Some(p) = port.upgrade() {
        let mut state = p.state.lock();
        state.phase = Phase::Finished;
        p.cond.notify_all();
    }
    log::debug!("[port] listener stopped");
    // Dropping the listener closes the endpoint.
}

// ============================================================================
// Reply and recording readers
// ============================================================================

/// Reader view over an RPC reply payload.
struct ReplyReader {
    payload: Vec<u8>,
    route: Route,
}

impl ConnectionReader for ReplyReader {
    fn payload(&self) -> &[u8] {
        &self.payload
    }
    fn envelope(&self) -> &str {
        ""
    }
    fn route(&self) -> &Route {
        &self.route
    }
    fn is_valid(&self) -> bool {
        true
    }
    fn reply(&mut self, _payload: &[u8]) -> bool {
        false
    }
    fn request_drop(&mut self) {}
}

/// Wraps a [`FrameReader`], capturing the request and every reply so
/// the exchange can be forwarded to log connections.
struct RecordingReader<'a> {
    inner: FrameReader<'a>,
    request: Vec<u8>,
    envelope: String,
    replies: Vec<Vec<u8>>,
}

impl<'a> RecordingReader<'a> {
    fn new(frame: &'a Frame, conn: &'a mut dyn Inbound) -> Self {
        let request = frame.payload.clone();
        let envelope = frame.envelope.clone();
        Self {
            inner: FrameReader::new(frame, conn),
            request,
            envelope,
            replies: Vec::new(),
        }
    }

    /// Transcript bottle: `(rec <request> <envelope> (<replies>...))`.
    fn transcript(&self) -> Bottle {
        let mut out = Bottle::new();
        out.add_vocab(vocab("rec"));
        out.add_blob(self.request.clone());
        out.add_string(self.envelope.clone());
        let replies = out.add_list();
        for reply in &self.replies {
            replies.add(Value::Blob(reply.clone()));
        }
        out
    }
}

impl ConnectionReader for RecordingReader<'_> {
    fn payload(&self) -> &[u8] {
        self.inner.payload()
    }
    fn envelope(&self) -> &str {
        self.inner.envelope()
    }
    fn route(&self) -> &Route {
        self.inner.route()
    }
    fn is_valid(&self) -> bool {
        true
    }
    fn reply(&mut self, payload: &[u8]) -> bool {
        self.replies.push(payload.to_vec());
        self.inner.reply(payload)
    }
    fn request_drop(&mut self) {
        self.inner.request_drop();
    }
}

/// Feeds a command to the admin override reader and captures its reply.
struct CaptureReader {
    payload: Vec<u8>,
    route: Route,
    reply: Option<Vec<u8>>,
}

impl CaptureReader {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            route: Route::new("admin", "", ""),
            reply: None,
        }
    }

    fn reply_bottle(&self) -> Option<Bottle> {
        self.reply
            .as_ref()
            .and_then(|bytes| Bottle::decode(bytes).ok())
    }
}

impl ConnectionReader for CaptureReader {
    fn payload(&self) -> &[u8] {
        &self.payload
    }
    fn envelope(&self) -> &str {
        ""
    }
    fn route(&self) -> &Route {
        &self.route
    }
    fn is_valid(&self) -> bool {
        true
    }
    fn reply(&mut self, payload: &[u8]) -> bool {
        self.reply = Some(payload.to_vec());
        true
    }
    fn request_drop(&mut self) {}
}

pub(crate) fn append_line(report: &mut String, line: &str) {
    report.push_str(line);
    report.push('\n');
}
