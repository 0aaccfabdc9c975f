//! Per-peer transport-protocol sessions and the table that owns them.
//!
//! The table is the sole home of live transfer state: one slot per
//! `(src, dst)` pair, indexed through an open-addressed map, created on
//! RTS/BAM or an outgoing `tp_send` and destroyed on any terminal
//! transition. A session is shared between the thread blocked inside
//! `tp_send` and the dispatch thread advancing it, so every field the
//! two sides exchange is an atomic: handlers publish the advertised
//! window or acknowledgement with a release store on the signal flag,
//! the waiter consumes it with an acquire swap.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32, Ordering};
use std::sync::Mutex;

use log::warn;

use crate::hasht::HashTable;
use crate::pgn::Pgn;
use crate::types::{Address, MAX_SESSIONS};

/// Life cycle of a transport-protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    /// Originator waiting for the remote's clear-to-send.
    AwaitCts = 1,
    /// Originator pacing data frames onto the bus.
    SendingDt = 2,
    /// Originator waiting for the end-of-message acknowledgement.
    AwaitEom = 3,
    /// Responder collecting data frames.
    RecvDt = 4,
    Done = 5,
    Aborted = 6,
}

impl TryFrom<u8> for SessionState {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::AwaitCts),
            2 => Ok(Self::SendingDt),
            3 => Ok(Self::AwaitEom),
            4 => Ok(Self::RecvDt),
            5 => Ok(Self::Done),
            6 => Ok(Self::Aborted),
            other => Err(other),
        }
    }
}

/// Context of one directed transfer between two addresses.
#[derive(Debug)]
pub struct Session {
    id: u8,
    pub src: Address,
    pub dst: Address,
    state: AtomicU8,
    /// PGN of the packeted message, taken from the RTS/BAM announcement
    /// or the `tp_send` arguments.
    pgn: AtomicU32,
    total_size: AtomicU16,
    total_packets: AtomicU8,
    /// Receive side: frames still expected.
    packets_remaining: AtomicU8,
    /// Receive side: payload bytes still expected, used to trim the
    /// padding off the final frame.
    bytes_remaining: AtomicU16,
    /// Receive side: next expected sequence number (1-origin).
    seqno_next: AtomicU8,
    cts_num_packets: AtomicU8,
    cts_next_packet: AtomicU8,
    eom_ack_size: AtomicU16,
    eom_ack_num_packets: AtomicU8,
    abort_reason: AtomicU8,
    timeout_anchor: AtomicU32,
    /// Armed timeout in milliseconds; zero disarms the sweep.
    timeout_limit: AtomicU32,
    cts_signalled: AtomicBool,
    eom_signalled: AtomicBool,
}

impl Session {
    fn new(id: u8, src: Address, dst: Address) -> Self {
        Self {
            id,
            src,
            dst,
            state: AtomicU8::new(SessionState::Idle as u8),
            pgn: AtomicU32::new(0),
            total_size: AtomicU16::new(0),
            total_packets: AtomicU8::new(0),
            packets_remaining: AtomicU8::new(0),
            bytes_remaining: AtomicU16::new(0),
            seqno_next: AtomicU8::new(0),
            cts_num_packets: AtomicU8::new(0),
            cts_next_packet: AtomicU8::new(0),
            eom_ack_size: AtomicU16::new(0),
            eom_ack_num_packets: AtomicU8::new(0),
            abort_reason: AtomicU8::new(0),
            timeout_anchor: AtomicU32::new(0),
            timeout_limit: AtomicU32::new(0),
            cts_signalled: AtomicBool::new(false),
            eom_signalled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Idle)
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn pgn(&self) -> Pgn {
        self.pgn.load(Ordering::Relaxed)
    }

    pub fn set_pgn(&self, pgn: Pgn) {
        self.pgn.store(pgn, Ordering::Relaxed);
    }

    pub fn total_size(&self) -> u16 {
        self.total_size.load(Ordering::Relaxed)
    }

    pub fn total_packets(&self) -> u8 {
        self.total_packets.load(Ordering::Relaxed)
    }

    pub fn set_totals(&self, size: u16, packets: u8) {
        self.total_size.store(size, Ordering::Relaxed);
        self.total_packets.store(packets, Ordering::Relaxed);
    }

    pub fn packets_remaining(&self) -> u8 {
        self.packets_remaining.load(Ordering::Relaxed)
    }

    pub fn set_packets_remaining(&self, packets: u8) {
        self.packets_remaining.store(packets, Ordering::Relaxed);
    }

    pub fn bytes_remaining(&self) -> u16 {
        self.bytes_remaining.load(Ordering::Relaxed)
    }

    pub fn set_bytes_remaining(&self, bytes: u16) {
        self.bytes_remaining.store(bytes, Ordering::Relaxed);
    }

    pub fn seqno_next(&self) -> u8 {
        self.seqno_next.load(Ordering::Relaxed)
    }

    pub fn set_seqno_next(&self, seqno: u8) {
        self.seqno_next.store(seqno, Ordering::Relaxed);
    }

    /// Publishes a received CTS window and wakes the waiter.
    pub fn signal_cts(&self, num_packets: u8, next_packet: u8) {
        self.cts_num_packets.store(num_packets, Ordering::Relaxed);
        self.cts_next_packet.store(next_packet, Ordering::Relaxed);
        self.cts_signalled.store(true, Ordering::Release);
    }

    /// Consumes a pending CTS signal, clearing it for the next wait.
    pub fn take_cts(&self) -> bool {
        self.cts_signalled.swap(false, Ordering::Acquire)
    }

    pub fn cts_pending(&self) -> bool {
        self.cts_signalled.load(Ordering::Acquire)
    }

    pub fn cts_window(&self) -> (u8, u8) {
        (
            self.cts_num_packets.load(Ordering::Relaxed),
            self.cts_next_packet.load(Ordering::Relaxed),
        )
    }

    /// Publishes a received EOM acknowledgement and wakes the waiter.
    pub fn signal_eom(&self, size: u16, num_packets: u8) {
        self.eom_ack_size.store(size, Ordering::Relaxed);
        self.eom_ack_num_packets.store(num_packets, Ordering::Relaxed);
        self.eom_signalled.store(true, Ordering::Release);
    }

    pub fn take_eom(&self) -> bool {
        self.eom_signalled.swap(false, Ordering::Acquire)
    }

    pub fn eom_ack(&self) -> (u16, u8) {
        (
            self.eom_ack_size.load(Ordering::Relaxed),
            self.eom_ack_num_packets.load(Ordering::Relaxed),
        )
    }

    /// Records a remote abort; the blocked originator observes the
    /// state change on its next wait iteration.
    pub fn mark_aborted(&self, reason: u8) {
        self.abort_reason.store(reason, Ordering::Relaxed);
        self.set_state(SessionState::Aborted);
    }

    pub fn abort_reason(&self) -> u8 {
        self.abort_reason.load(Ordering::Relaxed)
    }

    /// Arms (or re-arms) the timeout the sweep checks this session
    /// against.
    pub fn arm_timeout(&self, now: u32, limit_ms: u32) {
        self.timeout_anchor.store(now, Ordering::Relaxed);
        self.timeout_limit.store(limit_ms, Ordering::Release);
    }

    /// Returns `(anchor, limit)`; a zero limit means disarmed.
    pub fn timeout(&self) -> (u32, u32) {
        (
            self.timeout_anchor.load(Ordering::Relaxed),
            self.timeout_limit.load(Ordering::Acquire),
        )
    }
}

/// Map key of a directed peer pair.
#[inline]
pub fn session_key(src: Address, dst: Address) -> u32 {
    ((src as u32) << 8) | dst as u32
}

struct TableInner {
    slots: Vec<Option<Arc<Session>>>,
    index: HashTable<usize>,
}

/// Pool of transport-protocol sessions keyed by `(src, dst)`.
pub struct SessionTable {
    inner: Mutex<TableInner>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }

    /// A table with `capacity` slots; the index map is sized double so
    /// its tombstoned probing stays reliable.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            inner: Mutex::new(TableInner {
                slots,
                index: HashTable::new(capacity * 2),
            }),
        }
    }

    /// Opens a session for `(src, dst)`.
    ///
    /// Returns `None` while a session with that key exists or when no
    /// slot is free; the caller maps that to an abort or a
    /// `NoResource` error.
    pub fn open(&self, src: Address, dst: Address) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock().unwrap();
        let key = session_key(src, dst);
        if inner.index.get(key).is_some() {
            return None;
        }
        let slot = inner.slots.iter().position(Option::is_none)?;
        let session = Arc::new(Session::new(slot as u8, src, dst));
        if inner.index.insert(key, slot).is_err() {
            warn!("[TP] session index rejected key {key:#06X}");
            return None;
        }
        inner.slots[slot] = Some(Arc::clone(&session));
        Some(session)
    }

    pub fn find(&self, src: Address, dst: Address) -> Option<Arc<Session>> {
        let inner = self.inner.lock().unwrap();
        let slot = *inner.index.get(session_key(src, dst))?;
        inner.slots[slot].clone()
    }

    /// Destroys the `(src, dst)` session if it exists.
    pub fn close(&self, src: Address, dst: Address) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.index.remove(session_key(src, dst)) {
            Ok(slot) => {
                inner.slots[slot] = None;
                true
            }
            Err(_) => false,
        }
    }

    /// Frees every slot.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.index.clear();
        for slot in &mut inner.slots {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live sessions, taken under the lock so the sweep
    /// can inspect them without holding it.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        let inner = self.inner.lock().unwrap();
        inner.slots.iter().flatten().cloned().collect()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
