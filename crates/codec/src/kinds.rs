use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Packet kinds of the master protocol, with their wire codes.
///
/// Even codes below 30 date back to the original game client; the extended
/// list pair and the challenge were added later for IPv6 capable clients and
/// source-address verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketKind {
    GameTypesRequest = 2,
    GameTypesResponse = 4,
    ListRequest = 6,
    ListResponse = 8,
    GameMasterInfoRequest = 10,
    GameMasterInfoResponse = 12,
    GameHeartbeat = 22,
    InfoRequest = 25,
    InfoResponse = 26,
    ExtendedListRequest = 27,
    ExtendedListResponse = 28,
    Challenge = 30,
}

/// Session flags carried in the second header byte.
pub mod flags {
    /// The client is querying without a master account. Informational.
    pub const OFFLINE_QUERY: u8 = 1;

    /// The client asks for uncompressed strings. Informational.
    pub const NO_STRING_COMPRESS: u8 = 1 << 1;

    /// List responses use the IPv6 capable record format.
    pub const NEW_STYLE_RESPONSE: u8 = 1 << 2;

    /// The header carries a 32-bit authenticated session and no key.
    pub const AUTHENTICATED_SESSION: u8 = 1 << 3;
}
