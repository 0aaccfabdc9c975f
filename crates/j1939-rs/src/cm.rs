//! Transport-protocol connection-management frame bodies (SAE J1939/21).
//!
//! Every connection-management message rides on [`crate::pgn::TP_CM`]
//! and is eight bytes: the control byte, four parameter bytes (unused
//! ones filled with 0xFF) and, in bytes 5..7, the PGN of the packeted
//! message, low byte first.

use crate::pgn::{self, Pgn};
use crate::types::{DT_PAYLOAD, NOT_AVAILABLE_8};

/// Control byte values of the connection-management messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmControl {
    Rts = 0x10,
    Cts = 0x11,
    EomAck = 0x13,
    Bam = 0x20,
    Abort = 0xFF,
}

impl TryFrom<u8> for CmControl {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::Rts),
            0x11 => Ok(Self::Cts),
            0x13 => Ok(Self::EomAck),
            0x20 => Ok(Self::Bam),
            0xFF => Ok(Self::Abort),
            other => Err(other),
        }
    }
}

/// Number of data frames needed for a `size`-byte stream.
#[inline]
pub fn packets_for(size: usize) -> u8 {
    size.div_ceil(DT_PAYLOAD) as u8
}

#[inline]
fn pgn_bytes(pgn: Pgn) -> [u8; 3] {
    [
        pgn::pdu_specific(pgn),
        pgn::pdu_format(pgn),
        pgn::data_page(pgn),
    ]
}

/// Reads the packeted-message PGN out of bytes 5..7 of a body.
#[inline]
pub fn embedded_pgn(body: &[u8; 8]) -> Pgn {
    pgn::pgn_from_parts(body[7], body[6], body[5])
}

/// Request to send: announces `size` bytes in `num_packets` frames.
pub fn rts(size: u16, num_packets: u8, pgn: Pgn) -> [u8; 8] {
    let [lo, hi] = size.to_le_bytes();
    let [ps, pf, dp] = pgn_bytes(pgn);
    [
        CmControl::Rts as u8,
        lo,
        hi,
        num_packets,
        NOT_AVAILABLE_8,
        ps,
        pf,
        dp,
    ]
}

/// Clear to send: grants a window of `num_packets` starting at
/// `next_packet` (1-origin).
pub fn cts(num_packets: u8, next_packet: u8, pgn: Pgn) -> [u8; 8] {
    let [ps, pf, dp] = pgn_bytes(pgn);
    [
        CmControl::Cts as u8,
        num_packets,
        next_packet,
        NOT_AVAILABLE_8,
        NOT_AVAILABLE_8,
        ps,
        pf,
        dp,
    ]
}

/// End-of-message acknowledgement echoing the received totals.
pub fn eom_ack(size: u16, num_packets: u8, pgn: Pgn) -> [u8; 8] {
    let [lo, hi] = size.to_le_bytes();
    let [ps, pf, dp] = pgn_bytes(pgn);
    [
        CmControl::EomAck as u8,
        lo,
        hi,
        num_packets,
        NOT_AVAILABLE_8,
        ps,
        pf,
        dp,
    ]
}

/// Broadcast announce message for a `size`-byte stream to the bus.
pub fn bam(size: u16, num_packets: u8, pgn: Pgn) -> [u8; 8] {
    let [lo, hi] = size.to_le_bytes();
    let [ps, pf, dp] = pgn_bytes(pgn);
    [
        CmControl::Bam as u8,
        lo,
        hi,
        num_packets,
        NOT_AVAILABLE_8,
        ps,
        pf,
        dp,
    ]
}

/// Connection abort with the given reason byte.
pub fn abort(reason: u8, pgn: Pgn) -> [u8; 8] {
    let [ps, pf, dp] = pgn_bytes(pgn);
    [
        CmControl::Abort as u8,
        reason,
        NOT_AVAILABLE_8,
        NOT_AVAILABLE_8,
        NOT_AVAILABLE_8,
        ps,
        pf,
        dp,
    ]
}

/// Announced stream size of an RTS, BAM or EOM acknowledgement body
/// (little-endian on the wire).
#[inline]
pub fn body_size(body: &[u8; 8]) -> u16 {
    u16::from_le_bytes([body[1], body[2]])
}
