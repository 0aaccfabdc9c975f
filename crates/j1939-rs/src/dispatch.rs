//! PGN dispatch: routing received frames to handlers.
//!
//! Handlers are keyed by `pgn | (subcode << 24)`. The subcode is the
//! first payload byte for connection-management frames and zero for
//! everything else, which is how the five TP_CM messages fan out to
//! distinct handlers while ordinary PGNs use a single entry.

use alloc::sync::Arc;
use std::sync::Mutex;

use crate::hal::J1939Error;
use crate::hasht::{HashTable, MapError};
use crate::pgn::{Pgn, TP_CM};
use crate::types::{Address, PGN_POOL_CAPACITY};

/// Application callback for a registered PGN:
/// `(pgn, priority, src, dst, payload)`. Errors propagate to the poll
/// caller.
pub type PgnCallback =
    dyn Fn(Pgn, u8, Address, Address, &[u8]) -> Result<(), J1939Error> + Send + Sync;

/// What to do with a matched frame. The engine bindings route into the
/// transport state machines; `User` carries an application callback.
#[derive(Clone)]
pub(crate) enum Handler {
    TpRts,
    TpCts,
    TpEomAck,
    TpAbort,
    TpBam,
    TpDt,
    User(Arc<PgnCallback>),
}

/// Registration table mapping `(pgn, subcode)` to a handler.
pub(crate) struct DispatchTable {
    table: Mutex<HashTable<Handler>>,
}

#[inline]
fn make_key(pgn: Pgn, subcode: u8) -> u32 {
    pgn | ((subcode as u32) << 24)
}

/// Subcode of a received frame: byte 0 for connection management,
/// zero otherwise.
#[inline]
pub(crate) fn subcode_of(pgn: Pgn, payload: &[u8]) -> u8 {
    if pgn == TP_CM {
        payload.first().copied().unwrap_or(0)
    } else {
        0
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashTable::new(PGN_POOL_CAPACITY)),
        }
    }

    pub fn register(&self, pgn: Pgn, subcode: u8, handler: Handler) -> Result<(), J1939Error> {
        let mut table = self.table.lock().unwrap();
        table
            .insert(make_key(pgn, subcode), handler)
            .map_err(|e| match e {
                MapError::Full => J1939Error::NoResource,
                _ => J1939Error::Args,
            })
    }

    pub fn deregister(&self, pgn: Pgn, subcode: u8) -> Result<(), J1939Error> {
        let mut table = self.table.lock().unwrap();
        table
            .remove(make_key(pgn, subcode))
            .map(|_| ())
            .map_err(|_| J1939Error::Args)
    }

    pub fn clear_all(&self) {
        self.table.lock().unwrap().clear();
    }

    /// Looks up the handler for a decoded frame.
    pub fn lookup(&self, pgn: Pgn, subcode: u8) -> Option<Handler> {
        let table = self.table.lock().unwrap();
        table.get(make_key(pgn, subcode)).cloned()
    }
}
