//! Linux SocketCAN binding for the `j1939-rs` core.
//!
//! Note that Linux has its own J1939 kernel module; this driver exists
//! for hosts where it is unavailable and for exercising the stack
//! against virtual `vcan` interfaces.

#![cfg(target_os = "linux")]

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use log::warn;
use socketcan::{CanFilter, CanFrame, CanSocket, EmbeddedFrame, Id, Socket, SocketOptions};

use j1939_rs::{CanDriver, J1939Error, PgnFilter};

const EFF_MASK: u32 = 0x1FFF_FFFF;

/// [`CanDriver`] over a pair of CAN_RAW sockets bound to one interface.
///
/// Two sockets are used so that a blocked receive never delays an
/// outgoing transport-protocol frame; each half sits behind its own
/// mutex, which also gives the engine the atomic-transmission guarantee
/// the HAL asks for.
pub struct SocketCanDriver {
    tx: Mutex<CanSocket>,
    rx: Mutex<CanSocket>,
    read_timeout: Duration,
}

impl SocketCanDriver {
    /// Opens `interface` (for example `"can0"` or `"vcan0"`).
    pub fn new(interface: &str) -> io::Result<Self> {
        let tx = CanSocket::open(interface)?;
        let rx = CanSocket::open(interface)?;
        Ok(Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            read_timeout: Duration::from_millis(100),
        })
    }

    /// Changes how long [`CanDriver::receive`] blocks before reporting
    /// that nothing is pending.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

/// Maps a J1939 acceptance filter onto a raw `(id, mask)` pair.
///
/// The PGN sits in identifier bits 8..26 and the source address in the
/// low byte; the priority is matched exactly in bits 26..29.
fn raw_filter(filter: &PgnFilter) -> (u32, u32) {
    let id = ((filter.priority as u32) << 26) | (filter.pgn << 8) | filter.addr as u32;
    let mask = (0x7 << 26) | (filter.pgn_mask << 8) | filter.addr_mask as u32;
    (id & EFF_MASK, mask & EFF_MASK)
}

fn raw_id(id: Id) -> u32 {
    match id {
        Id::Extended(id) => id.as_raw(),
        Id::Standard(id) => id.as_raw() as u32,
    }
}

impl CanDriver for SocketCanDriver {
    fn send(&self, id: u32, data: &[u8]) -> Result<(), J1939Error> {
        let ext_id = socketcan::ExtendedId::new(id).ok_or(J1939Error::Args)?;
        let frame = CanFrame::new(ext_id, data).ok_or(J1939Error::Args)?;
        self.tx.lock().unwrap().write_frame(&frame).map_err(|e| {
            warn!("SocketCAN write failed: {e}");
            J1939Error::Io
        })
    }

    fn receive(&self) -> Result<Option<j1939_rs::CanFrame>, J1939Error> {
        let rx = self.rx.lock().unwrap();
        match rx.read_frame_timeout(self.read_timeout) {
            Ok(CanFrame::Data(frame)) => {
                let mut data = [0u8; 8];
                let payload = frame.data();
                let len = payload.len().min(8);
                data[..len].copy_from_slice(&payload[..len]);
                Ok(Some(j1939_rs::CanFrame {
                    id: raw_id(frame.id()),
                    data,
                    len: len as u8,
                }))
            }
            // Remote and error frames are not J1939 traffic.
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => {
                warn!("SocketCAN read failed: {e}");
                Err(J1939Error::Io)
            }
        }
    }

    fn apply_filters(&self, filters: &[PgnFilter]) -> Result<(), J1939Error> {
        let raw: Vec<CanFilter> = filters
            .iter()
            .map(|f| {
                let (id, mask) = raw_filter(f);
                CanFilter::new(id, mask)
            })
            .collect();
        self.rx
            .lock()
            .unwrap()
            .set_filters(raw.as_slice())
            .map_err(|e| {
                warn!("SocketCAN filter setup failed: {e}");
                J1939Error::Io
            })
    }
}
