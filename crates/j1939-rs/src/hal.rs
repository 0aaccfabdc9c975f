//! Hardware abstraction: CAN link, monotonic clock, error taxonomy.

use core::fmt;

use alloc::sync::Arc;

use crate::pgn::Pgn;
use crate::types::Address;

/// Portable, descriptive error type for the J1939 stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum J1939Error {
    /// A parameter is out of range (priority, payload length, duplicate
    /// registration).
    Args,
    /// The data stream exceeds the 1785-byte transport-protocol limit.
    WrongDataLen,
    /// The session table or the dispatch table is full.
    NoResource,
    /// The remote node never engaged (no CTS arrived for our RTS).
    Busy,
    /// A protocol timeout elapsed mid-transfer.
    Timeout,
    /// The end-of-message acknowledgement disagrees with what was sent.
    Incomplete,
    /// The CAN layer reported a failure.
    Io,
}

impl J1939Error {
    /// Stable integer code of this error, matching the taxonomy exposed
    /// to non-Rust callers.
    pub fn code(&self) -> i32 {
        match self {
            Self::Args => 1,
            Self::Timeout => 2,
            Self::Busy => 3,
            Self::Incomplete => 4,
            Self::WrongDataLen => 101,
            Self::NoResource => 102,
            Self::Io => 103,
        }
    }
}

impl fmt::Display for J1939Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Args => write!(f, "Invalid argument"),
            Self::WrongDataLen => write!(f, "Data stream exceeds 1785 bytes"),
            Self::NoResource => write!(f, "Session or dispatch table is full"),
            Self::Busy => write!(f, "Remote node did not engage"),
            Self::Timeout => write!(f, "Protocol timeout elapsed"),
            Self::Incomplete => write!(f, "End-of-message acknowledgement mismatch"),
            Self::Io => write!(f, "Underlying CAN I/O error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for J1939Error {}

/// Connection-abort reason codes carried in byte 1 of an abort frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Node is busy with another connection.
    Busy,
    /// Lacking the necessary resources.
    NoResource,
    /// A timeout occurred.
    Timeout,
    /// CTS received while a data transfer was in progress.
    CtsWhileDt,
    /// Transfer bookkeeping disagrees (bad total at end of message).
    Incomplete,
    /// A reason byte this stack does not define.
    Other(u8),
}

impl AbortReason {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Busy => 0x01,
            Self::NoResource => 0x02,
            Self::Timeout => 0x03,
            Self::CtsWhileDt => 0x04,
            Self::Incomplete => 0x05,
            Self::Other(raw) => raw,
        }
    }

    pub fn from_wire(raw: u8) -> Self {
        match raw {
            0x01 => Self::Busy,
            0x02 => Self::NoResource,
            0x03 => Self::Timeout,
            0x04 => Self::CtsWhileDt,
            0x05 => Self::Incomplete,
            other => Self::Other(other),
        }
    }
}

/// One received CAN 2.0B frame. `id` is the full 29-bit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: [u8; 8],
    pub len: u8,
}

impl CanFrame {
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Acceptance filter entry handed to the CAN layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgnFilter {
    pub pgn: Pgn,
    pub pgn_mask: Pgn,
    pub priority: u8,
    pub addr: Address,
    pub addr_mask: u8,
}

/// Abstraction over the CAN 2.0B link.
///
/// The engine calls these methods from several threads at once, so an
/// implementation must serialise frame transmission internally (a mutex
/// around the socket handle is enough); a single transport-protocol
/// frame must go on the wire atomically. `id` always carries the full
/// 29-bit identifier; setting the extended-frame flag is the driver's
/// concern.
pub trait CanDriver {
    /// Queues one frame for transmission.
    fn send(&self, id: u32, data: &[u8]) -> Result<(), J1939Error>;

    /// Attempts to receive a single frame.
    ///
    /// Returns `Ok(None)` when nothing is pending (poll-style drivers)
    /// or a configured read timeout expired (blocking drivers).
    fn receive(&self) -> Result<Option<CanFrame>, J1939Error>;

    /// Installs acceptance filters. Drivers without filter support keep
    /// this default and accept everything.
    fn apply_filters(&self, _filters: &[PgnFilter]) -> Result<(), J1939Error> {
        Ok(())
    }
}

/// Monotonic millisecond clock plus the cooperative suspension hook.
///
/// `now_ms` may wrap; all timeout arithmetic is modular (see
/// [`crate::time::elapsed`]). `yield_now` is called on every iteration
/// of a wait loop so that a cooperative host can schedule other work; on
/// a preemptive host it should sleep for a tick instead of spinning.
pub trait Clock {
    fn now_ms(&self) -> u32;
    fn yield_now(&self);
}

impl<T: CanDriver + ?Sized> CanDriver for Arc<T> {
    fn send(&self, id: u32, data: &[u8]) -> Result<(), J1939Error> {
        (**self).send(id, data)
    }

    fn receive(&self) -> Result<Option<CanFrame>, J1939Error> {
        (**self).receive()
    }

    fn apply_filters(&self, filters: &[PgnFilter]) -> Result<(), J1939Error> {
        (**self).apply_filters(filters)
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }

    fn yield_now(&self) {
        (**self).yield_now()
    }
}

/// [`Clock`] over the operating-system monotonic clock.
#[cfg(feature = "std")]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }

    fn yield_now(&self) {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}
