use crate::{registry::ServerInfo, strings::PooledStr};

/// Region mask layout.
///
/// The top two bits encode the address family of a server record. They are
/// owned by the registry: inbound info responses are stripped of them and the
/// registry re-derives the one matching the sender's address.
pub mod region {
    pub const IPV4: u32 = 1 << 30;
    pub const IPV6: u32 = 1 << 31;
    pub const ADDRESS_MASK: u32 = IPV4 | IPV6;
}

/// A compound list query filter, as parsed from a list request body.
///
/// Zero and empty fields are wildcards; see [`matches`] for the accept
/// conditions of the populated ones.
#[derive(Debug, Default, Clone)]
pub struct ServerFilter {
    pub game_type: String,
    pub mission_type: String,
    pub min_players: u8,
    pub max_players: u8,
    pub regions: u32,
    pub version: u32,
    pub filter_flags: u8,
    pub max_bots: u8,
    pub min_cpu_speed: u16,
    pub buddies: Vec<u32>,
}

/// A game or mission type constraint after pool resolution.
pub enum TypeConstraint {
    /// Empty or "any": no constraint.
    Any,
    /// The server's interned tag must be this pool entry.
    Exact(PooledStr),
    /// The requested tag is not in the pool at all, so nothing can match.
    Missing,
}

impl TypeConstraint {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    fn accepts(&self, tag: &PooledStr) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(handle) => handle == tag,
            Self::Missing => false,
        }
    }
}

/// Whether `info` satisfies every populated field of `filter`.
///
/// The type constraints are resolved against the string pools once per query
/// and passed in, so the per-server work here is all integer compares.
pub fn matches(
    info: &ServerInfo,
    filter: &ServerFilter,
    game_type: &TypeConstraint,
    mission_type: &TypeConstraint,
) -> bool {
    if !game_type.accepts(&info.game_type) || !mission_type.accepts(&info.mission_type) {
        return false;
    }

    if filter.min_players > 0 && info.player_count < filter.min_players {
        return false;
    }

    if filter.max_players > 0 && info.player_count > filter.max_players {
        return false;
    }

    if filter.regions != 0 && info.regions & filter.regions == 0 {
        return false;
    }

    if filter.version > 0 && info.version < filter.version {
        return false;
    }

    if filter.filter_flags != 0 && info.info_flags & filter.filter_flags == 0 {
        return false;
    }

    if filter.max_bots > 0 && info.bot_count > filter.max_bots {
        return false;
    }

    if filter.min_cpu_speed > 0 && info.cpu_speed < filter.min_cpu_speed as u32 {
        return false;
    }

    // A buddy search only matches servers that reported their player GUIDs.
    if !filter.buddies.is_empty()
        && !info
            .player_guids
            .iter()
            .any(|guid| filter.buddies.contains(guid))
    {
        return false;
    }

    true
}

/// Whether `text` asks for a specific type rather than the wildcard.
pub fn is_type_wildcard(text: &str) -> bool {
    text.is_empty() || text.eq_ignore_ascii_case("any")
}
