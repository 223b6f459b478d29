//! Wire format of the legacy game-server browser protocol.
//!
//! Datagrams start with a two byte `(kind, flags)` pair followed by the
//! session correlation fields, whose layout depends on the
//! [`AUTHENTICATED_SESSION`](flags::AUTHENTICATED_SESSION) flag. All
//! multi-byte integers are little-endian, matching the native layout of the
//! legacy game client. Strings carry a one byte length prefix and no
//! terminator.

pub mod header;
pub mod kinds;
pub mod packet;

pub use self::{
    header::Header,
    kinds::PacketKind,
    packet::{PacketReader, PacketWriter},
};

/// Typical DSL with PPPoE tops out below the ethernet MTU, and the budget
/// has to absorb tunnelling overhead on top of UDP and IP headers.
pub const MAX_MTU: usize = 1492;
pub const UDP_OVERHEAD: usize = 48;

/// Largest datagram the server will emit.
pub const MAX_PACKET: usize = MAX_MTU - UDP_OVERHEAD;

/// Worst case header size: kind, flags and a 32-bit session, rounded up.
pub const HEADER_RESERVE: usize = 8;

/// Bytes available after the header.
pub const MAX_BODY: usize = MAX_PACKET - HEADER_RESERVE;

/// List responses prefix every packet with index, total and server count.
pub const LIST_PREFIX: usize = 4;

/// Bytes available for server records in a single list response packet.
pub const MAX_LIST_PAYLOAD: usize = MAX_PACKET - HEADER_RESERVE - LIST_PREFIX;

/// A list response never spans more than 254 packets: index 0xFF is the
/// fresh-query sentinel in the request direction.
pub const MAX_LIST_PACKETS: usize = 254;

/// Packet index that marks a list request as a fresh query rather than a
/// resend of an already built packet.
pub const FRESH_QUERY_INDEX: u8 = 0xFF;

/// Server record sizes on the wire.
pub const OLD_STYLE_SERVER_SIZE: usize = 6;
pub const NEW_STYLE_V4_SERVER_SIZE: usize = 7;
pub const NEW_STYLE_V6_SERVER_SIZE: usize = 19;

/// Address family tag used by the extended list format.
pub const ADDRESS_TYPE_V4: u8 = 0;
pub const ADDRESS_TYPE_V6: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Truncated,
    UnknownKind(u8),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated packet"),
            Self::UnknownKind(kind) => write!(f, "unknown packet kind {kind}"),
        }
    }
}

/// Whether every byte of `bytes` is printable ASCII.
///
/// Applied to every length-prefixed string that ends up interned or logged;
/// anything else is treated as a malformed packet.
///
/// ```
/// use master_server_codec::is_printable;
///
/// assert!(is_printable(b"CTF"));
/// assert!(is_printable(b""));
/// assert!(!is_printable(b"CT\x07F"));
/// assert!(!is_printable(b"\xff\xfe"));
/// ```
pub fn is_printable(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| (0x20..=0x7E).contains(b))
}
