//! Protocol constants shared across the stack.

/// 8-bit J1939 network address (SA/DA).
pub type Address = u8;

// --- Reserved addresses (SAE J1939/81) ---

/// Global address, used as destination for broadcast traffic.
pub const ADDRESS_GLOBAL: Address = 0xFF;

/// Source address of a node that has not yet claimed an address.
pub const ADDRESS_NOT_CLAIMED: Address = 0xFE;

/// Marks "no destination" on reception of a broadcast (PDU2) PGN.
pub const ADDRESS_NULL: Address = 0xEF;

// --- Priorities ---

/// Highest message priority.
pub const PRIORITY_HIGH: u8 = 0x0;

/// Default message priority.
pub const PRIORITY_DEFAULT: u8 = 0x6;

/// Lowest message priority.
pub const PRIORITY_LOW: u8 = 0x7;

/// True if `p` fits the 3-bit priority field.
#[inline]
pub fn valid_priority(p: u8) -> bool {
    p <= PRIORITY_LOW
}

// --- Payload limits ---

/// CAN bus maximum DLC value.
pub const DLC_MAX: usize = 8;

/// Payload bytes carried by one transport-protocol data frame
/// (the first byte holds the sequence number).
pub const DT_PAYLOAD: usize = DLC_MAX - 1;

/// Maximum length of a multi-packet data stream (255 packets * 7 bytes).
pub const MAX_DATA_LEN: usize = 1785;

// --- "Not available" / "not valid" parameter placeholders (SAE J1939/71) ---

/// Parameter is "not available"; also the fill byte for unused frame bytes.
pub const NOT_AVAILABLE_8: u8 = 0xFF;

/// Parameter is "not available", 16-bit form.
pub const NOT_AVAILABLE_16: u16 = 0xFF00;

/// Parameter is "not valid" or "in error".
pub const NOT_VALID_8: u8 = 0xFE;

/// Parameter is "not valid" or "in error", 16-bit form.
pub const NOT_VALID_16: u16 = 0xFE00;

/// Raw 8-bit parameter values must not exceed this.
pub const PARAM_MAX_8: u8 = 0xFA;

/// Raw 16-bit parameter values must not exceed this.
pub const PARAM_MAX_16: u16 = 0xFAFF;

// --- Timeouts in milliseconds (SAE J1939/21) ---

/// Response time.
pub const TR: u32 = 200;

/// Holding time.
pub const TH: u32 = 500;

/// Maximum gap between data frames on the receiving side.
pub const T1: u32 = 750;

/// Maximum wait for the first data frame after sending CTS.
pub const T2: u32 = 1250;

/// Maximum wait for CTS or EOM acknowledgement on the originating side.
pub const T3: u32 = 1250;

/// Maximum wait after sending the last CTS of a connection.
pub const T4: u32 = 1050;

/// Minimum gap between multi-packet broadcast frames; receivers must
/// tolerate anything in 50..200 ms.
pub const TB: u32 = 50;

/// Upper bound of the broadcast inter-frame tolerance; a BAM receive
/// session is reclaimed when no data frame arrives within this window.
pub const TB_RX_LIMIT: u32 = 200;

/// Pacing period between outgoing transport-protocol data frames.
pub const SEND_PERIOD: u32 = 50;

// --- Table capacities ---

/// Number of concurrent transport-protocol sessions.
pub const MAX_SESSIONS: usize = 16;

/// Capacity of the PGN dispatch table. Open addressing wants head room,
/// so this is sized well above the engine's own six entries.
pub const PGN_POOL_CAPACITY: usize = 32;

// --- NAME field values (SAE J1939/81) ---

/// Industry group codes used in the ECU NAME.
pub mod industry_group {
    pub const GLOBAL: u8 = 0;
    pub const ON_HIGHWAY: u8 = 1;
    pub const AGRICULTURAL: u8 = 2;
    pub const CONSTRUCTION: u8 = 3;
    pub const MARINE: u8 = 4;
    pub const INDUSTRIAL: u8 = 5;
}

/// The node cannot resolve address conflicts (single-address capable).
pub const NO_ADDRESS_CAPABLE: bool = false;

/// The node can resolve address conflicts by picking a new address.
pub const ADDRESS_CAPABLE: bool = true;
