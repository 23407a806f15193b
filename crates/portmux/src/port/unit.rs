// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection units and their worker threads.
//!
//! Every live connection is wrapped in a [`Unit`]: the registry entry
//! the port tracks, plus one worker thread that owns the carrier
//! session. Input workers block reading frames and hand them to the
//! port; output workers drain a job queue and write.
//!
//! Lifecycle: `starting -> active -> doomed -> finished -> reaped`.
//! A doomed unit is interrupted through the connection's control handle
//! so its worker observes the shutdown at its next I/O boundary; only
//! the reaper joins and deletes units.

use super::core::PortCore;
use super::packet::PacketId;
use super::traits::ConnectionReader;
use crate::carrier::{ConnectionControl, Frame, FrameKind, Inbound, Outbound};
use crate::route::Route;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

/// Direction of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitKind {
    /// Accepted (or reverse-dialed) connection feeding the port.
    Input {
        /// True when this input was created by inverting an outgoing
        /// dial (pull-style carriers).
        reverse: bool,
    },
    /// Dialed connection carrying the port's fan-out.
    Output,
}

/// Registry entry for one connection.
pub(crate) struct Unit {
    pub index: i32,
    kind: UnitKind,
    mode: String,
    route: Mutex<Route>,
    doomed: AtomicBool,
    finished: AtomicBool,
    busy: AtomicBool,
    pup_name: Mutex<Option<String>>,
    control: Arc<dyn ConnectionControl>,
    worker: Mutex<Option<JoinHandle<()>>>,
    job_tx: Mutex<Option<Sender<OutputJob>>>,
    last_job: Mutex<Option<Arc<JobState>>>,
    tid: AtomicI64,
}

impl Unit {
    /// Spawn an input unit around an accepted or reverse connection.
    pub fn spawn_input(
        port: Weak<PortCore>,
        index: i32,
        conn: Box<dyn Inbound>,
        reverse: bool,
        pup_name: Option<String>,
    ) -> io::Result<Arc<Unit>> {
        let unit = Arc::new(Unit {
            index,
            kind: UnitKind::Input { reverse },
            mode: String::new(),
            route: Mutex::new(conn.route()),
            doomed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            pup_name: Mutex::new(pup_name),
            control: conn.control(),
            worker: Mutex::new(None),
            job_tx: Mutex::new(None),
            last_job: Mutex::new(None),
            tid: AtomicI64::new(-1),
        });
        let handle = std::thread::Builder::new()
            .name(format!("portmux-in-{}", index))
            .spawn({
                let unit = unit.clone();
                move || input_worker(port, unit, conn, reverse)
            })?;
        *unit.worker.lock() = Some(handle);
        Ok(unit)
    }

    /// Spawn an output unit around a dialed connection.
    pub fn spawn_output(
        port: Weak<PortCore>,
        index: i32,
        conn: Box<dyn Outbound>,
        mode: String,
    ) -> io::Result<Arc<Unit>> {
        let (tx, rx) = unbounded();
        let unit = Arc::new(Unit {
            index,
            kind: UnitKind::Output,
            mode,
            route: Mutex::new(conn.route()),
            doomed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            pup_name: Mutex::new(None),
            control: conn.control(),
            worker: Mutex::new(None),
            job_tx: Mutex::new(Some(tx)),
            last_job: Mutex::new(None),
            tid: AtomicI64::new(-1),
        });
        let handle = std::thread::Builder::new()
            .name(format!("portmux-out-{}", index))
            .spawn({
                let unit = unit.clone();
                move || output_worker(port, unit, conn, rx)
            })?;
        *unit.worker.lock() = Some(handle);
        Ok(unit)
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, UnitKind::Input { .. })
    }

    pub fn is_output(&self) -> bool {
        self.kind == UnitKind::Output
    }

    /// Log connections carry a non-empty mode string.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn route(&self) -> Route {
        self.route.lock().clone()
    }

    pub fn set_route(&self, route: Route) {
        *self.route.lock() = route;
    }

    pub fn is_doomed(&self) -> bool {
        self.doomed.load(Ordering::Acquire)
    }

    pub fn set_doomed(&self) {
        self.doomed.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn set_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// True while the output worker is inside a write.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// ROS publisher tag for reverse inputs created by
    /// `publisherUpdate`.
    pub fn pup_name(&self) -> Option<String> {
        self.pup_name.lock().clone()
    }

    pub fn is_pupped(&self) -> bool {
        self.pup_name.lock().is_some()
    }

    pub fn control(&self) -> &Arc<dyn ConnectionControl> {
        &self.control
    }

    /// Worker thread id, once the worker has recorded it; -1 before.
    pub fn tid(&self) -> i64 {
        self.tid.load(Ordering::Acquire)
    }

    /// Begin teardown: flag the unit, nudge the worker out of any
    /// blocked I/O. Safe to call repeatedly.
    pub fn close(&self) {
        self.set_doomed();
        if let Some(tx) = self.job_tx.lock().as_ref() {
            let _ = tx.send(OutputJob::Quit);
        }
        self.control.interrupt();
    }

    /// Join the worker. Must not be called from the worker itself.
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Hand a fan-out job to the output worker.
    ///
    /// With `wait_before`, blocks until the previously queued job has
    /// drained. With `wait_after`, blocks until this job completes and
    /// carries back any reply. When the outcome reports
    /// `completed_sync`, the worker never saw the job and the caller
    /// must release the packet hold itself.
    pub fn send_job(
        &self,
        data: Arc<Vec<u8>>,
        envelope: String,
        packet: PacketId,
        want_reply: bool,
        wait_before: bool,
        wait_after: bool,
    ) -> SendOutcome {
        debug_assert!(self.is_output());
        if self.is_finished() || self.is_doomed() {
            return SendOutcome::completed_sync();
        }

        if wait_before {
            let prev = self.last_job.lock().clone();
            if let Some(prev) = prev {
                prev.wait();
            }
        }

        let state = Arc::new(JobState::new());
        let job = SendJob {
            data,
            envelope,
            packet,
            want_reply,
            state: state.clone(),
        };
        let sent = match self.job_tx.lock().as_ref() {
            Some(tx) => tx.send(OutputJob::Send(job)).is_ok(),
            None => false,
        };
        if !sent {
            // Worker already gone; the job never left this thread.
            return SendOutcome::completed_sync();
        }
        *self.last_job.lock() = Some(state.clone());

        if !wait_after {
            return SendOutcome {
                completed_sync: false,
                ok: true,
                got_reply: false,
                reply: None,
            };
        }
        state.wait();
        let reply = state.reply.lock().take();
        SendOutcome {
            completed_sync: false,
            ok: state.ok.load(Ordering::Acquire),
            got_reply: state.got_reply.load(Ordering::Acquire),
            reply,
        }
    }
}

/// Result of handing one job to an output unit.
pub(crate) struct SendOutcome {
    /// The worker never took the job; the packet hold stays with the
    /// caller.
    pub completed_sync: bool,
    pub ok: bool,
    pub got_reply: bool,
    pub reply: Option<Vec<u8>>,
}

impl SendOutcome {
    fn completed_sync() -> Self {
        Self {
            completed_sync: true,
            ok: false,
            got_reply: false,
            reply: None,
        }
    }
}

enum OutputJob {
    Send(SendJob),
    Quit,
}

struct SendJob {
    data: Arc<Vec<u8>>,
    envelope: String,
    packet: PacketId,
    want_reply: bool,
    state: Arc<JobState>,
}

/// Completion handshake between a sender and the output worker.
struct JobState {
    done: Mutex<bool>,
    cond: Condvar,
    ok: AtomicBool,
    got_reply: AtomicBool,
    reply: Mutex<Option<Vec<u8>>>,
}

impl JobState {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
            ok: AtomicBool::new(false),
            got_reply: AtomicBool::new(false),
            reply: Mutex::new(None),
        }
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    fn finish(&self, ok: bool) {
        self.ok.store(ok, Ordering::Release);
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }
}

// ============================================================================
// Workers
// ============================================================================

fn input_worker(
    port: Weak<PortCore>,
    unit: Arc<Unit>,
    mut conn: Box<dyn Inbound>,
    reverse: bool,
) {
    unit.tid.store(current_tid(), Ordering::Release);

    if reverse {
        // Reverse connections arrive with their route already known.
        if let Some(p) = port.upgrade() {
            p.report_unit_event(&unit.route(), true, true);
        }
    } else {
        match conn.expect_header() {
            Ok(route) => {
                log::debug!("[unit] input {} opened by {}", unit.index, route);
                unit.set_route(route.clone());
                if let Some(p) = port.upgrade() {
                    p.report_unit_event(&route, true, true);
                }
            }
            Err(e) => {
                log::trace!("[unit] input {} closed before header: {}", unit.index, e);
                unit.set_finished();
                return;
            }
        }
    }

    // A per-connection reader takes precedence over the port reader.
    let mut local_reader = port.upgrade().and_then(|p| p.create_connection_reader());

    loop {
        if unit.is_doomed() {
            break;
        }
        let frame = match conn.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::trace!("[unit] input {} read ended: {}", unit.index, e);
                break;
            }
        };
        let p = match port.upgrade() {
            Some(p) => p,
            None => break,
        };
        let drop_conn = match frame.kind {
            // A second header on a live connection is noise.
            FrameKind::Header => false,
            FrameKind::Admin => p.handle_admin_frame(unit.index, &frame, conn.as_mut()),
            FrameKind::Data => {
                let reader: Option<&mut dyn crate::PortReader> = match local_reader.as_mut() {
                    Some(r) => Some(r.as_mut()),
                    None => None,
                };
                p.handle_data_frame(&frame, conn.as_mut(), reader)
            }
        };
        drop(p);
        if drop_conn {
            break;
        }
    }

    unit.set_finished();
    if let Some(p) = port.upgrade() {
        p.report_unit_event(&unit.route(), true, false);
    }
    log::debug!("[unit] input {} finished", unit.index);
}

fn output_worker(
    port: Weak<PortCore>,
    unit: Arc<Unit>,
    mut conn: Box<dyn Outbound>,
    rx: Receiver<OutputJob>,
) {
    unit.tid.store(current_tid(), Ordering::Release);
    if let Some(p) = port.upgrade() {
        p.report_unit_event(&unit.route(), false, true);
    }

    let mut broken = false;
    while !broken {
        let job = match rx.recv() {
            Ok(OutputJob::Send(job)) => job,
            Ok(OutputJob::Quit) | Err(_) => break,
        };
        if unit.is_doomed() {
            complete_job(&port, &unit, job, false);
            break;
        }

        unit.busy.store(true, Ordering::Release);
        let frame = Frame::data(job.data.as_ref().clone(), job.envelope.clone());
        let mut ok = match conn.write_frame(&frame) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("[unit] output {} write failed: {}", unit.index, e);
                false
            }
        };
        if ok && job.want_reply {
            match conn.read_reply() {
                Ok(reply) => {
                    job.state.got_reply.store(true, Ordering::Release);
                    *job.state.reply.lock() = Some(reply.payload);
                }
                Err(e) => {
                    log::debug!("[unit] output {} reply failed: {}", unit.index, e);
                    ok = false;
                }
            }
        }
        unit.busy.store(false, Ordering::Release);

        broken = !ok;
        complete_job(&port, &unit, job, ok);
    }

    // Retire the sender side first: send_job enqueues under the same
    // mutex, so after this swap no new job can slip past the drain.
    *unit.job_tx.lock() = None;
    // Jobs still queued must release their packet holds, or senders
    // waiting on them would hang.
    while let Ok(job) = rx.try_recv() {
        if let OutputJob::Send(job) = job {
            complete_job(&port, &unit, job, false);
        }
    }

    unit.set_finished();
    if let Some(p) = port.upgrade() {
        p.report_unit_event(&unit.route(), false, false);
    }
    log::debug!("[unit] output {} finished", unit.index);
}

fn complete_job(port: &Weak<PortCore>, unit: &Arc<Unit>, job: SendJob, ok: bool) {
    if !ok {
        unit.set_doomed();
    }
    if let Some(p) = port.upgrade() {
        p.notify_completion(job.packet);
    }
    job.state.finish(ok);
}

// ============================================================================
// Connection readers
// ============================================================================

/// [`ConnectionReader`] over one received frame, replying on the
/// connection's back-channel.
pub(crate) struct FrameReader<'a> {
    frame: &'a Frame,
    conn: &'a mut dyn Inbound,
    route: Route,
    drop_requested: bool,
}

impl<'a> FrameReader<'a> {
    pub fn new(frame: &'a Frame, conn: &'a mut dyn Inbound) -> Self {
        let route = conn.route();
        Self {
            frame,
            conn,
            route,
            drop_requested: false,
        }
    }

    pub fn drop_requested(&self) -> bool {
        self.drop_requested
    }
}

impl ConnectionReader for FrameReader<'_> {
    fn payload(&self) -> &[u8] {
        &self.frame.payload
    }

    fn envelope(&self) -> &str {
        &self.frame.envelope
    }

    fn route(&self) -> &Route {
        &self.route
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn reply(&mut self, payload: &[u8]) -> bool {
        self.conn
            .reply(&Frame::data(payload.to_vec(), ""))
            .is_ok()
    }

    fn request_drop(&mut self) {
        self.drop_requested = true;
    }
}

/// Synthetic empty read delivered on interrupt and close.
pub(crate) struct NullReader {
    route: Route,
}

impl NullReader {
    pub fn new() -> Self {
        Self {
            route: Route::new("", "", ""),
        }
    }
}

impl ConnectionReader for NullReader {
    fn payload(&self) -> &[u8] {
        &[]
    }

    fn envelope(&self) -> &str {
        ""
    }

    fn route(&self) -> &Route {
        &self.route
    }

    fn is_valid(&self) -> bool {
        false
    }

    fn reply(&mut self, _payload: &[u8]) -> bool {
        false
    }

    fn request_drop(&mut self) {}
}

// ============================================================================
// Thread scheduling
// ============================================================================

/// Current OS thread id.
#[cfg(target_os = "linux")]
pub(crate) fn current_tid() -> i64 {
    // SAFETY: gettid has no preconditions and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_tid() -> i64 {
    -1
}

/// Scheduling (priority, policy) of a thread; (-1, -1) when
/// unavailable.
#[cfg(target_os = "linux")]
pub(crate) fn thread_sched_params(tid: i64) -> (i32, i32) {
    if tid < 0 {
        return (-1, -1);
    }
    let mut param = libc::sched_param { sched_priority: 0 };
    // SAFETY: param is a properly aligned, writable sched_param;
    // sched_getparam only writes within it.
    let prio = unsafe {
        if libc::sched_getparam(tid as libc::pid_t, &mut param) == 0 {
            param.sched_priority
        } else {
            -1
        }
    };
    // SAFETY: sched_getscheduler reads kernel state only.
    let policy = unsafe { libc::sched_getscheduler(tid as libc::pid_t) };
    (prio, policy)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn thread_sched_params(_tid: i64) -> (i32, i32) {
    (-1, -1)
}

/// Apply (priority, policy) to one thread.
#[cfg(target_os = "linux")]
pub(crate) fn set_thread_sched_params(tid: i64, priority: i32, policy: i32) -> bool {
    if tid < 0 {
        return false;
    }
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: param is a valid sched_param; sched_setscheduler only
    // modifies kernel scheduler state for the target thread.
    unsafe { libc::sched_setscheduler(tid as libc::pid_t, policy, &param) == 0 }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_thread_sched_params(_tid: i64, _priority: i32, _policy: i32) -> bool {
    false
}

/// Apply (priority, policy) to every thread of this process.
#[cfg(target_os = "linux")]
pub(crate) fn set_process_sched_params(priority: i32, policy: i32) -> bool {
    let tasks = match std::fs::read_dir("/proc/self/task") {
        Ok(tasks) => tasks,
        Err(_) => return false,
    };
    let mut ok = true;
    for entry in tasks.flatten() {
        if let Some(tid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i64>().ok())
        {
            ok &= set_thread_sched_params(tid, priority, policy);
        }
    }
    ok
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_process_sched_params(_priority: i32, _policy: i32) -> bool {
    false
}
