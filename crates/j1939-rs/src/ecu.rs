//! The ECU-facing engine: framing, transport protocol, address claim.
//!
//! An [`Ecu`] owns the CAN driver, the clock, the session table and the
//! dispatch table. One thread drives [`Ecu::poll_once`] in a loop;
//! application threads call [`Ecu::tp_send`] and friends, blocking until
//! the remote acknowledges or a J1939/21 timeout fires. Sessions are the
//! only shared transfer state, and each one is destroyed on its terminal
//! transition, so distinct `(src, dst)` pairs can transfer concurrently.

use alloc::sync::Arc;
use std::sync::Mutex;

use log::{debug, info, trace, warn};

use crate::cm::{self, CmControl};
use crate::dispatch::{DispatchTable, Handler, PgnCallback, subcode_of};
use crate::hal::{AbortReason, CanDriver, Clock, J1939Error, PgnFilter};
use crate::name::EcuName;
use crate::pgn::{self, AC, Pgn, RAC, TP_CM, TP_DT};
use crate::session::{Session, SessionState, SessionTable};
use crate::time::elapsed;
use crate::types::{
    ADDRESS_GLOBAL, ADDRESS_NOT_CLAIMED, Address, DLC_MAX, DT_PAYLOAD, MAX_DATA_LEN,
    NOT_AVAILABLE_8, PRIORITY_DEFAULT, PRIORITY_LOW, SEND_PERIOD, T1, T2, T3, TB_RX_LIMIT,
    valid_priority,
};

/// Error callback: `(pgn, src, dst, reason)` of the aborted or expired
/// transfer.
pub type ErrorCallback = dyn Fn(Pgn, Address, Address, AbortReason) + Send + Sync;

/// One decoded inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct J1939Frame {
    pub pgn: Pgn,
    pub priority: u8,
    pub src: Address,
    pub dst: Address,
    pub data: [u8; 8],
    pub len: u8,
}

impl J1939Frame {
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Request-for-address-claimed body: the AC PGN, low byte first.
const AC_REQUEST_BODY: [u8; 3] = [
    pgn::pdu_specific(AC),
    pgn::pdu_format(AC),
    pgn::data_page(AC),
];

/// A J1939 node binding the protocol engine to a CAN driver and clock.
pub struct Ecu<D, C> {
    driver: D,
    clock: C,
    sessions: SessionTable,
    dispatch: DispatchTable,
    rx_callback: Mutex<Option<Arc<PgnCallback>>>,
    err_callback: Mutex<Option<Arc<ErrorCallback>>>,
}

impl<D: CanDriver, C: Clock> Ecu<D, C> {
    pub fn new(driver: D, clock: C) -> Self {
        Self {
            driver,
            clock,
            sessions: SessionTable::new(),
            dispatch: DispatchTable::new(),
            rx_callback: Mutex::new(None),
            err_callback: Mutex::new(None),
        }
    }

    /// The underlying CAN driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Installs the transport-protocol handlers and the two user
    /// callbacks. `rx` receives every reassembled 7-byte chunk of a
    /// multi-packet transfer; `err` is told about aborted or expired
    /// transfers.
    pub fn setup<R, E>(&self, rx: R, err: E) -> Result<(), J1939Error>
    where
        R: Fn(Pgn, u8, Address, Address, &[u8]) -> Result<(), J1939Error> + Send + Sync + 'static,
        E: Fn(Pgn, Address, Address, AbortReason) + Send + Sync + 'static,
    {
        *self.rx_callback.lock().unwrap() = Some(Arc::new(rx));
        *self.err_callback.lock().unwrap() = Some(Arc::new(err));

        self.dispatch
            .register(TP_CM, CmControl::Rts as u8, Handler::TpRts)?;
        self.dispatch
            .register(TP_CM, CmControl::Cts as u8, Handler::TpCts)?;
        self.dispatch
            .register(TP_CM, CmControl::EomAck as u8, Handler::TpEomAck)?;
        self.dispatch
            .register(TP_CM, CmControl::Abort as u8, Handler::TpAbort)?;
        self.dispatch
            .register(TP_CM, CmControl::Bam as u8, Handler::TpBam)?;
        self.dispatch.register(TP_DT, 0, Handler::TpDt)?;
        Ok(())
    }

    /// Deregisters every handler and frees all sessions.
    pub fn dispose(&self) {
        self.dispatch.clear_all();
        self.sessions.clear();
        *self.rx_callback.lock().unwrap() = None;
        *self.err_callback.lock().unwrap() = None;
    }

    /// Registers an application callback for a PGN. `subcode` is
    /// non-zero only for connection-management PGNs.
    pub fn register_pgn<F>(&self, pgn: Pgn, subcode: u8, callback: F) -> Result<(), J1939Error>
    where
        F: Fn(Pgn, u8, Address, Address, &[u8]) -> Result<(), J1939Error> + Send + Sync + 'static,
    {
        self.dispatch
            .register(pgn, subcode, Handler::User(Arc::new(callback)))
    }

    pub fn deregister_pgn(&self, pgn: Pgn, subcode: u8) -> Result<(), J1939Error> {
        self.dispatch.deregister(pgn, subcode)
    }

    /// Hands acceptance filters to the CAN driver.
    pub fn apply_filters(&self, filters: &[PgnFilter]) -> Result<(), J1939Error> {
        self.driver.apply_filters(filters)
    }

    /// True while a transport session exists for `(src, dst)`.
    pub fn session_active(&self, src: Address, dst: Address) -> bool {
        self.sessions.find(src, dst).is_some()
    }

    /// Encodes and transmits a single frame.
    pub fn send(
        &self,
        pgn: Pgn,
        priority: u8,
        src: Address,
        dst: Address,
        data: &[u8],
    ) -> Result<(), J1939Error> {
        if !valid_priority(priority) || data.len() > DLC_MAX {
            return Err(J1939Error::Args);
        }
        self.driver.send(pgn::encode_id(pgn, priority, src, dst), data)
    }

    /// Receives and decodes a single frame, if one is pending.
    pub fn receive(&self) -> Result<Option<J1939Frame>, J1939Error> {
        let Some(frame) = self.driver.receive()? else {
            return Ok(None);
        };
        let (pgn, priority, src, dst) = pgn::decode_id(frame.id);
        Ok(Some(J1939Frame {
            pgn,
            priority,
            src,
            dst,
            data: frame.data,
            len: frame.len,
        }))
    }

    /// One step of the dispatch loop: expire overdue receive sessions,
    /// then read and route a single frame.
    ///
    /// Returns the frame length (also for unmatched frames, which are
    /// dropped) or `Ok(0)` when nothing was pending. Handler errors
    /// propagate to the caller.
    pub fn poll_once(&self) -> Result<usize, J1939Error> {
        self.expire_receive_sessions();

        let Some(frame) = self.receive()? else {
            return Ok(0);
        };
        let subcode = subcode_of(frame.pgn, frame.payload());
        match self.dispatch.lookup(frame.pgn, subcode) {
            Some(handler) => self.run_handler(handler, &frame)?,
            None => trace!(
                "[DISPATCH] no handler for PGN {:#07X} subcode {:#04X}, dropping",
                frame.pgn,
                subcode
            ),
        }
        Ok(frame.len as usize)
    }

    fn run_handler(&self, handler: Handler, frame: &J1939Frame) -> Result<(), J1939Error> {
        match handler {
            Handler::TpRts => self.on_rts(frame),
            Handler::TpCts => self.on_cts(frame),
            Handler::TpEomAck => self.on_eom_ack(frame),
            Handler::TpAbort => self.on_abort(frame),
            Handler::TpBam => self.on_bam(frame),
            Handler::TpDt => self.on_dt(frame),
            Handler::User(cb) => cb(
                frame.pgn,
                frame.priority,
                frame.src,
                frame.dst,
                frame.payload(),
            ),
        }
    }

    // --- Transport protocol, originating side ---

    /// Sends `data` to `dst`, fragmenting through the transport protocol
    /// when it exceeds one frame.
    ///
    /// Blocks until the remote acknowledges the whole stream or a
    /// timeout fires; any failure destroys the session before returning.
    pub fn tp_send(
        &self,
        pgn: Pgn,
        priority: u8,
        src: Address,
        dst: Address,
        data: &[u8],
    ) -> Result<(), J1939Error> {
        if !valid_priority(priority) {
            return Err(J1939Error::Args);
        }
        if data.len() > MAX_DATA_LEN {
            return Err(J1939Error::WrongDataLen);
        }
        // Single frame, send directly.
        if data.len() <= DLC_MAX {
            return self.send(pgn, priority, src, dst, data);
        }

        let total_packets = cm::packets_for(data.len());
        let session = self
            .sessions
            .open(src, dst)
            .ok_or(J1939Error::NoResource)?;
        session.set_pgn(pgn);
        session.set_totals(data.len() as u16, total_packets);
        debug!(
            "[TP] {src:#04X}->{dst:#04X}: sending {} bytes in {total_packets} packets",
            data.len()
        );

        let result = self.run_initiator(&session, pgn, priority, src, dst, data, total_packets);
        session.set_state(match result {
            Ok(()) => SessionState::Done,
            Err(_) => SessionState::Aborted,
        });
        self.sessions.close(src, dst);
        if let Err(e) = result {
            warn!("[TP] {src:#04X}->{dst:#04X}: transfer failed: {e}");
        }
        result
    }

    fn run_initiator(
        &self,
        session: &Session,
        pgn: Pgn,
        priority: u8,
        src: Address,
        dst: Address,
        data: &[u8],
        total_packets: u8,
    ) -> Result<(), J1939Error> {
        // Enter AwaitCts before the RTS can be answered, so a fast
        // remote's CTS is not discarded by the handler.
        session.set_state(SessionState::AwaitCts);
        self.send(
            TP_CM,
            priority,
            src,
            dst,
            &cm::rts(data.len() as u16, total_packets, pgn),
        )?;

        let total = total_packets as u32;
        let mut packets_left = total;
        let mut cts_seen = false;
        while packets_left > 0 {
            session.set_state(SessionState::AwaitCts);
            self.wait_cts(session, cts_seen, pgn, src, dst)?;
            cts_seen = true;

            let (num, next) = session.cts_window();
            if num == 0 {
                // Zero-sized window: the remote is holding the
                // connection open, keep waiting.
                continue;
            }
            let start = next.max(1) as u32;
            if start > total {
                warn!("[TP] CTS requests packet {start} of {total}, ignoring");
                continue;
            }
            let window = (num as u32).min(total - start + 1);
            session.set_state(SessionState::SendingDt);
            for n in 0..window {
                if session.state() == SessionState::Aborted {
                    return Err(abort_error(session.abort_reason()));
                }
                let seqno = (start + n) as u8;
                self.send(TP_DT, PRIORITY_LOW, src, dst, &dt_frame(seqno, data))?;
                self.pace();
            }
            packets_left = total - (start + window - 1);
        }

        session.set_state(SessionState::AwaitEom);
        self.wait_eom(session)?;
        let (ack_size, ack_packets) = session.eom_ack();
        if ack_size == data.len() as u16 && ack_packets == total_packets {
            debug!("[TP] {src:#04X}->{dst:#04X}: transfer acknowledged");
            Ok(())
        } else {
            warn!(
                "[TP] EOM acknowledges {ack_size} bytes / {ack_packets} packets, \
                 sent {} / {total_packets}",
                data.len()
            );
            Err(J1939Error::Incomplete)
        }
    }

    /// Waits for the remote's clear-to-send, up to T3.
    ///
    /// A timeout before the remote ever engaged is `Busy`; afterwards it
    /// aborts the connection and is `Timeout`.
    fn wait_cts(
        &self,
        session: &Session,
        cts_seen: bool,
        pgn: Pgn,
        src: Address,
        dst: Address,
    ) -> Result<(), J1939Error> {
        let anchor = self.clock.now_ms();
        loop {
            if session.take_cts() {
                return Ok(());
            }
            if session.state() == SessionState::Aborted {
                return Err(abort_error(session.abort_reason()));
            }
            if elapsed(self.clock.now_ms(), anchor, T3) {
                return if cts_seen {
                    warn!("[TP] {src:#04X}->{dst:#04X}: CTS timeout mid-transfer, aborting");
                    let _ = self.send(
                        TP_CM,
                        PRIORITY_LOW,
                        src,
                        dst,
                        &cm::abort(AbortReason::Timeout.to_wire(), pgn),
                    );
                    Err(J1939Error::Timeout)
                } else {
                    debug!("[TP] {src:#04X}->{dst:#04X}: remote never engaged");
                    Err(J1939Error::Busy)
                };
            }
            self.clock.yield_now();
        }
    }

    /// Waits for the end-of-message acknowledgement, up to T3.
    fn wait_eom(&self, session: &Session) -> Result<(), J1939Error> {
        let anchor = self.clock.now_ms();
        loop {
            if session.take_eom() {
                return Ok(());
            }
            if session.state() == SessionState::Aborted {
                return Err(abort_error(session.abort_reason()));
            }
            if elapsed(self.clock.now_ms(), anchor, T3) {
                return Err(J1939Error::Timeout);
            }
            self.clock.yield_now();
        }
    }

    /// Holds the line between data frames.
    fn pace(&self) {
        let anchor = self.clock.now_ms();
        while !elapsed(self.clock.now_ms(), anchor, SEND_PERIOD) {
            self.clock.yield_now();
        }
    }

    /// Announces and streams `data` to every node on the bus.
    ///
    /// No handshake: one broadcast announce, then paced data frames.
    pub fn bam_send(&self, priority: u8, src: Address, data: &[u8]) -> Result<(), J1939Error> {
        if !valid_priority(priority) || data.len() > MAX_DATA_LEN {
            return Err(J1939Error::Args);
        }
        let num_packets = cm::packets_for(data.len());
        debug!("[BAM] {src:#04X}: broadcasting {} bytes in {num_packets} packets", data.len());
        self.send(
            TP_CM,
            priority,
            src,
            ADDRESS_GLOBAL,
            &cm::bam(data.len() as u16, num_packets, pgn::BAM),
        )?;
        for seqno in 1..=num_packets {
            self.send(
                TP_DT,
                priority,
                src,
                ADDRESS_GLOBAL,
                &dt_frame(seqno, data),
            )?;
            self.pace();
        }
        Ok(())
    }

    // --- Transport protocol, responding side ---

    fn on_rts(&self, frame: &J1939Frame) -> Result<(), J1939Error> {
        let Some(body) = cm_body(frame) else {
            return Ok(());
        };
        let size = cm::body_size(&body);
        let num_packets = body[3];
        let data_pgn = cm::embedded_pgn(&body);
        if num_packets == 0 || size == 0 {
            warn!("[TP] malformed RTS from {:#04X}, ignoring", frame.src);
            return Ok(());
        }

        match self.sessions.open(frame.src, frame.dst) {
            Some(session) => {
                session.set_pgn(data_pgn);
                session.set_totals(size, num_packets);
                session.set_packets_remaining(num_packets);
                session.set_bytes_remaining(size);
                session.set_seqno_next(1);
                session.set_state(SessionState::RecvDt);
                session.arm_timeout(self.clock.now_ms(), T2);
                debug!(
                    "[TP] {:#04X}->{:#04X}: accepting {size} bytes of PGN {data_pgn:#07X}",
                    frame.src, frame.dst
                );
                // Grant the whole stream in one window.
                let result = self.send(
                    TP_CM,
                    PRIORITY_LOW,
                    frame.dst,
                    frame.src,
                    &cm::cts(num_packets, 1, data_pgn),
                );
                if result.is_err() {
                    self.sessions.close(frame.src, frame.dst);
                }
                result
            }
            None => {
                warn!(
                    "[TP] no session slot for RTS from {:#04X}, aborting",
                    frame.src
                );
                self.send(
                    TP_CM,
                    PRIORITY_LOW,
                    frame.dst,
                    frame.src,
                    &cm::abort(AbortReason::NoResource.to_wire(), data_pgn),
                )
            }
        }
    }

    fn on_cts(&self, frame: &J1939Frame) -> Result<(), J1939Error> {
        let Some(body) = cm_body(frame) else {
            return Ok(());
        };
        // We opened the session as (local, remote); the CTS arrives with
        // the addresses mirrored.
        let Some(session) = self.sessions.find(frame.dst, frame.src) else {
            warn!("[TP] stray CTS from {:#04X}, ignoring", frame.src);
            return Ok(());
        };
        let (num_packets, next_packet) = (body[1], body[2]);
        match session.state() {
            SessionState::AwaitCts => session.signal_cts(num_packets, next_packet),
            SessionState::SendingDt if !session.cts_pending() => {
                // Raced with the tail of the previous window; the waiter
                // picks it up when it loops.
                session.signal_cts(num_packets, next_packet);
            }
            SessionState::SendingDt => {
                warn!(
                    "[TP] CTS from {:#04X} while data transfer in progress, aborting",
                    frame.src
                );
                let result = self.send(
                    TP_CM,
                    PRIORITY_LOW,
                    session.src,
                    session.dst,
                    &cm::abort(AbortReason::CtsWhileDt.to_wire(), session.pgn()),
                );
                self.notify_error(session.pgn(), frame.src, frame.dst, AbortReason::CtsWhileDt);
                session.mark_aborted(AbortReason::CtsWhileDt.to_wire());
                self.sessions.close(session.src, session.dst);
                return result;
            }
            state => trace!("[TP] CTS ignored in state {state:?}"),
        }
        Ok(())
    }

    fn on_eom_ack(&self, frame: &J1939Frame) -> Result<(), J1939Error> {
        let Some(body) = cm_body(frame) else {
            return Ok(());
        };
        let Some(session) = self.sessions.find(frame.dst, frame.src) else {
            warn!("[TP] stray EOM acknowledgement from {:#04X}", frame.src);
            return Ok(());
        };
        session.signal_eom(cm::body_size(&body), body[3]);
        Ok(())
    }

    fn on_abort(&self, frame: &J1939Frame) -> Result<(), J1939Error> {
        let Some(body) = cm_body(frame) else {
            return Ok(());
        };
        let reason = AbortReason::from_wire(body[1]);
        // Either we originated (session keyed local->remote) or we were
        // receiving (remote->local).
        let session = self
            .sessions
            .find(frame.dst, frame.src)
            .or_else(|| self.sessions.find(frame.src, frame.dst));
        let Some(session) = session else {
            trace!("[TP] abort from {:#04X} without a session", frame.src);
            return Ok(());
        };
        info!(
            "[TP] {:#04X}->{:#04X}: connection aborted, reason {reason:?}",
            session.src, session.dst
        );
        self.notify_error(session.pgn(), frame.src, frame.dst, reason);
        session.mark_aborted(body[1]);
        self.sessions.close(session.src, session.dst);
        Ok(())
    }

    fn on_bam(&self, frame: &J1939Frame) -> Result<(), J1939Error> {
        let Some(body) = cm_body(frame) else {
            return Ok(());
        };
        let size = cm::body_size(&body);
        let num_packets = body[3];
        let data_pgn = cm::embedded_pgn(&body);
        if num_packets == 0 || size == 0 {
            warn!("[BAM] malformed announce from {:#04X}, ignoring", frame.src);
            return Ok(());
        }
        // frame.dst is the global address here; the session is keyed on
        // it so broadcast data frames find it again.
        match self.sessions.open(frame.src, frame.dst) {
            Some(session) => {
                session.set_pgn(data_pgn);
                session.set_totals(size, num_packets);
                session.set_packets_remaining(num_packets);
                session.set_bytes_remaining(size);
                session.set_seqno_next(1);
                session.set_state(SessionState::RecvDt);
                session.arm_timeout(self.clock.now_ms(), TB_RX_LIMIT);
                debug!(
                    "[BAM] {:#04X}: collecting {size} bytes of PGN {data_pgn:#07X}",
                    frame.src
                );
            }
            None => warn!(
                "[BAM] announce from {:#04X} while a broadcast is already open, ignoring",
                frame.src
            ),
        }
        Ok(())
    }

    fn on_dt(&self, frame: &J1939Frame) -> Result<(), J1939Error> {
        if frame.len < DLC_MAX as u8 {
            warn!("[TP] short data frame from {:#04X}, ignoring", frame.src);
            return Ok(());
        }
        let Some(session) = self.sessions.find(frame.src, frame.dst) else {
            trace!("[TP] data frame from {:#04X} without a session", frame.src);
            return Ok(());
        };
        if session.state() != SessionState::RecvDt {
            trace!("[TP] data frame ignored in state {:?}", session.state());
            return Ok(());
        }

        let seqno = frame.data[0];
        if seqno != session.seqno_next() {
            // Dropped: the armed timeout reclaims the session if the
            // stream never recovers.
            warn!(
                "[TP] out-of-order data frame from {:#04X}: got {seqno}, expected {}",
                frame.src,
                session.seqno_next()
            );
            return Ok(());
        }

        let chunk_len = (session.bytes_remaining() as usize).min(DT_PAYLOAD);
        let delivery = self.deliver(
            session.pgn(),
            frame.priority,
            frame.src,
            frame.dst,
            &frame.data[1..1 + chunk_len],
        );

        session.set_seqno_next(seqno.wrapping_add(1));
        session.set_bytes_remaining(session.bytes_remaining() - chunk_len as u16);
        session.set_packets_remaining(session.packets_remaining() - 1);

        if session.packets_remaining() == 0 {
            let acked = if session.dst != ADDRESS_GLOBAL {
                self.send(
                    TP_CM,
                    PRIORITY_LOW,
                    session.dst,
                    session.src,
                    &cm::eom_ack(session.total_size(), session.total_packets(), session.pgn()),
                )
            } else {
                Ok(())
            };
            debug!(
                "[TP] {:#04X}->{:#04X}: received all {} bytes",
                session.src,
                session.dst,
                session.total_size()
            );
            session.set_state(SessionState::Done);
            self.sessions.close(session.src, session.dst);
            acked?;
        } else {
            let limit = if session.dst == ADDRESS_GLOBAL {
                TB_RX_LIMIT
            } else {
                T1
            };
            session.arm_timeout(self.clock.now_ms(), limit);
        }
        delivery
    }

    /// Closes receive sessions whose inter-frame timeout elapsed, so a
    /// silent originator cannot leak a slot.
    fn expire_receive_sessions(&self) {
        let now = self.clock.now_ms();
        for session in self.sessions.snapshot() {
            if session.state() != SessionState::RecvDt {
                continue;
            }
            let (anchor, limit) = session.timeout();
            if limit == 0 || !elapsed(now, anchor, limit) {
                continue;
            }
            warn!(
                "[TP] {:#04X}->{:#04X}: receive timed out, reclaiming session",
                session.src, session.dst
            );
            if session.dst != ADDRESS_GLOBAL {
                let _ = self.send(
                    TP_CM,
                    PRIORITY_LOW,
                    session.dst,
                    session.src,
                    &cm::abort(AbortReason::Timeout.to_wire(), session.pgn()),
                );
            }
            self.notify_error(session.pgn(), session.src, session.dst, AbortReason::Timeout);
            session.mark_aborted(AbortReason::Timeout.to_wire());
            self.sessions.close(session.src, session.dst);
        }
    }

    fn deliver(
        &self,
        pgn: Pgn,
        priority: u8,
        src: Address,
        dst: Address,
        chunk: &[u8],
    ) -> Result<(), J1939Error> {
        let callback = self.rx_callback.lock().unwrap().clone();
        match callback {
            Some(cb) => cb(pgn, priority, src, dst, chunk),
            None => Ok(()),
        }
    }

    fn notify_error(&self, pgn: Pgn, src: Address, dst: Address, reason: AbortReason) {
        let callback = self.err_callback.lock().unwrap().clone();
        if let Some(cb) = callback {
            cb(pgn, src, dst, reason);
        }
    }

    // --- Address claim ---

    /// Requests the current address claims, then claims `src` with our
    /// NAME.
    pub fn address_claim(&self, src: Address, name: EcuName) -> Result<(), J1939Error> {
        info!("[AC] claiming address {src:#04X}");
        self.send(RAC, PRIORITY_DEFAULT, src, ADDRESS_GLOBAL, &AC_REQUEST_BODY)?;
        self.send(AC, PRIORITY_DEFAULT, src, ADDRESS_GLOBAL, &name.to_wire())
    }

    /// Emits an unsolicited address-claimed message for `src`.
    pub fn address_claimed(&self, src: Address, name: EcuName) -> Result<(), J1939Error> {
        self.send(AC, PRIORITY_DEFAULT, src, ADDRESS_GLOBAL, &name.to_wire())
    }

    /// Announces that no address could be claimed.
    pub fn cannot_claim_address(&self, name: EcuName) -> Result<(), J1939Error> {
        info!("[AC] cannot claim an address");
        self.send(
            AC,
            PRIORITY_DEFAULT,
            ADDRESS_NOT_CLAIMED,
            ADDRESS_GLOBAL,
            &name.to_wire(),
        )
    }
}

/// Builds the `seqno`-th (1-origin) data frame of `data`, padding the
/// tail with 0xFF.
fn dt_frame(seqno: u8, data: &[u8]) -> [u8; 8] {
    let mut frame = [NOT_AVAILABLE_8; 8];
    frame[0] = seqno;
    let offset = (seqno as usize - 1) * DT_PAYLOAD;
    let chunk = &data[offset..data.len().min(offset + DT_PAYLOAD)];
    frame[1..1 + chunk.len()].copy_from_slice(chunk);
    frame
}

/// The eight CM body bytes, or `None` (with a log line) for a short
/// frame.
fn cm_body(frame: &J1939Frame) -> Option<[u8; 8]> {
    if frame.len < DLC_MAX as u8 {
        warn!(
            "[TP] short connection-management frame from {:#04X}, ignoring",
            frame.src
        );
        return None;
    }
    Some(frame.data)
}

/// Error returned to a blocked sender whose session was aborted by the
/// remote.
fn abort_error(raw_reason: u8) -> J1939Error {
    match AbortReason::from_wire(raw_reason) {
        AbortReason::Busy => J1939Error::Busy,
        AbortReason::NoResource => J1939Error::NoResource,
        AbortReason::Incomplete => J1939Error::Incomplete,
        _ => J1939Error::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn dt_frame_layout() {
        let data: Vec<u8> = (0u8..32).collect();
        let first = dt_frame(1, &data);
        assert_eq!(first, [1, 0, 1, 2, 3, 4, 5, 6]);
        let last = dt_frame(5, &data);
        assert_eq!(last, [5, 28, 29, 30, 31, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn ac_request_body_is_pgn_low_byte_first() {
        assert_eq!(AC_REQUEST_BODY, [0x00, 0xEE, 0x00]);
    }

    #[test]
    fn abort_error_mapping() {
        assert_eq!(abort_error(0x01), J1939Error::Busy);
        assert_eq!(abort_error(0x02), J1939Error::NoResource);
        assert_eq!(abort_error(0x03), J1939Error::Timeout);
        assert_eq!(abort_error(0x04), J1939Error::Timeout);
        assert_eq!(abort_error(0x05), J1939Error::Incomplete);
    }
}
