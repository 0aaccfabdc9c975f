#![cfg_attr(not(feature = "std"), no_std)]

//! User-space SAE J1939 application and transport layer for CAN 2.0B.
//!
//! The crate splits into a no_std wire layer (identifier codec, ECU
//! NAME, connection-management bodies, the open-addressed map) and the
//! blocking transport engine behind the `std` feature. The engine only
//! touches hardware through the [`CanDriver`] and [`Clock`] traits, so
//! the same core runs against SocketCAN, a vendor SDK or an in-memory
//! bus in tests.

// 'alloc' is used for the fixed-capacity tables and shared sessions.
extern crate alloc;

// --- Wire layer ---
pub mod cm;
pub mod name;
pub mod pgn;
pub mod types;

// --- Foundation ---
pub mod hal;
pub mod hasht;
pub mod time;

// --- Transport engine (needs std for blocking waits) ---
#[cfg(feature = "std")]
pub mod dispatch;
#[cfg(feature = "std")]
pub mod ecu;
#[cfg(feature = "std")]
pub mod session;

// --- Top-level Exports ---
pub use hal::{AbortReason, CanDriver, CanFrame, Clock, J1939Error, PgnFilter};
#[cfg(feature = "std")]
pub use hal::SystemClock;
pub use name::EcuName;
pub use pgn::Pgn;
pub use types::{
    ADDRESS_GLOBAL, ADDRESS_NOT_CLAIMED, ADDRESS_NULL, Address, MAX_DATA_LEN, PRIORITY_DEFAULT,
    PRIORITY_HIGH, PRIORITY_LOW,
};
#[cfg(feature = "std")]
pub use dispatch::PgnCallback;
#[cfg(feature = "std")]
pub use ecu::{Ecu, ErrorCallback, J1939Frame};
#[cfg(feature = "std")]
pub use session::{SessionState, SessionTable};
