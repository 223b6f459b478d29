use std::collections::VecDeque;

use ahash::{HashMap, HashMapExt};
use codec::{Header, kinds::flags};
use rand::Rng;

use crate::{address::Address, pages::ResponsePage};

/// Flood control and session policy knobs.
#[derive(Debug, Clone)]
pub struct FloodOptions {
    /// Ticket count at which a peer is banned.
    pub max_tickets: u32,
    /// Tickets are forgiven after this many seconds.
    pub ticket_reset_period: u64,
    /// How long a ban lasts.
    pub ban_duration: u64,
    /// A peer not seen for this long is dropped entirely.
    pub forget_time: u64,
    /// Tickets charged for a malformed or unknown packet.
    pub bad_message_tickets: u32,
    /// Sessions idle for this long are dropped.
    pub session_timeout: u64,
    /// Live sessions per peer, hard capped at 10.
    pub max_sessions_per_peer: usize,
}

impl Default for FloodOptions {
    fn default() -> Self {
        Self {
            max_tickets: 300,
            ticket_reset_period: 60,
            ban_duration: 300,
            forget_time: 900,
            bad_message_tickets: 50,
            session_timeout: 120,
            max_sessions_per_peer: MAX_SESSIONS_PER_PEER,
        }
    }
}

/// Absolute cap on live sessions per peer.
pub const MAX_SESSIONS_PER_PEER: usize = 10;

/// One client conversation: a list query and its paginated result.
#[derive(Debug, Clone)]
pub struct Session {
    /// Peer-chosen 16-bit identifier, echoed for correlation.
    pub session: u16,
    pub flags: u8,
    /// Server-issued token; nonzero once the peer proved it can receive at
    /// its claimed address.
    pub auth_session: u32,
    pub last_used: u64,
    /// Total servers across all pages.
    pub total: u16,
    pub pages: Vec<ResponsePage>,
}

impl Session {
    pub fn new(session: u16, header_flags: u8, now: u64) -> Self {
        Self {
            session,
            flags: header_flags & !flags::AUTHENTICATED_SESSION,
            auth_session: 0,
            last_used: now,
            total: 0,
            pages: Vec::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_session != 0
    }

    pub fn is_new_style(&self) -> bool {
        self.flags & flags::NEW_STYLE_RESPONSE != 0
    }

    pub fn pack_total(&self) -> u8 {
        self.pages.len() as u8
    }
}

/// Reputation and session state for one remote address.
#[derive(Debug)]
pub struct PeerRecord {
    pub addr: Address,
    pub created: u64,
    pub last_seen: u64,
    pub last_ticket_reset: u64,
    /// Zero when not banned.
    pub banned_until: u64,
    pub tickets: u32,
    pub total_bans: u32,
    pub sessions: Vec<Session>,
}

impl PeerRecord {
    fn new(addr: Address, now: u64) -> Self {
        Self {
            addr,
            created: now,
            last_seen: now,
            last_ticket_reset: now,
            banned_until: 0,
            tickets: 0,
            total_bans: 0,
            sessions: Vec::new(),
        }
    }

    pub fn is_banned(&self) -> bool {
        self.banned_until != 0
    }

    /// Charge `delta` tickets. Crossing the threshold bans the peer, resets
    /// the count and destroys every session it holds. Returns whether the
    /// ban was triggered by this call.
    pub fn rep(&mut self, delta: u32, now: u64, opts: &FloodOptions) -> bool {
        self.tickets = self.tickets.saturating_add(delta);
        self.last_seen = now;

        if self.tickets >= opts.max_tickets {
            self.banned_until = now + opts.ban_duration;
            self.tickets = 0;
            self.total_bans += 1;
            self.sessions.clear();
            return true;
        }

        false
    }

    /// Periodic upkeep shared by packet handling and the sweep: forgive old
    /// tickets and lift an expired ban. Lifting the ban refreshes
    /// `last_seen` so the peer is not forgotten in the same breath.
    fn housekeep(&mut self, now: u64, opts: &FloodOptions) {
        if now.saturating_sub(self.last_ticket_reset) >= opts.ticket_reset_period {
            self.tickets = 0;
            self.last_ticket_reset = now;
        }

        if self.banned_until != 0 && self.banned_until <= now {
            self.banned_until = 0;
            self.last_seen = now;
        }
    }

    /// Start a session from a request header. Refused at the session cap.
    pub fn create_session(&mut self, header: &Header, now: u64, cap: usize) -> Option<usize> {
        if self.sessions.len() >= cap {
            return None;
        }

        self.sessions
            .push(Session::new(header.session as u16, header.flags, now));
        Some(self.sessions.len() - 1)
    }

    /// Find the session the peer chose with its 16-bit identifier.
    pub fn find_session(&mut self, session: u16, now: u64) -> Option<usize> {
        let index = self.sessions.iter().position(|s| s.session == session)?;
        self.sessions[index].last_used = now;
        Some(index)
    }

    /// Find a session by the authenticated token the peer is echoing back
    /// in its header session field.
    pub fn find_authenticated(&mut self, auth_session: u32, now: u64) -> Option<usize> {
        let index = self
            .sessions
            .iter()
            .position(|s| s.auth_session == auth_session)?;
        self.sessions[index].last_used = now;
        Some(index)
    }

    /// Promote a session to the challenge handshake: flag it authenticated
    /// and new-style, and assign a nonzero token unique among this peer's
    /// sessions.
    pub fn issue_challenge(&mut self, index: usize) -> u32 {
        let mut token: u32 = rand::rng().random();
        while token == 0 || self.sessions.iter().any(|s| s.auth_session == token) {
            token = token.wrapping_add(1);
        }

        let session = &mut self.sessions[index];
        session.flags |= flags::AUTHENTICATED_SESSION | flags::NEW_STYLE_RESPONSE;
        session.auth_session = token;
        token
    }

    pub fn expire_sessions(&mut self, force_all: bool, now: u64, timeout: u64) {
        self.sessions
            .retain(|s| !force_all && s.last_used + timeout > now);
    }
}

/// What [`PeerTable::check_peer`] learned about the sender.
#[derive(Debug, Clone, Copy)]
pub struct CheckOutcome {
    /// Whether the packet should be processed at all.
    pub allowed: bool,
    /// Whether this very check pushed the peer over the ban threshold.
    pub banned_now: bool,
    pub total_bans: u32,
}

/// Reputation ledger over every remote address that ever sent a packet.
///
/// Shares the rotation-queue sweep cursor design with the registry.
pub struct PeerTable {
    peers: HashMap<Address, PeerRecord>,
    sweep_queue: VecDeque<Address>,
    options: FloodOptions,
}

impl PeerTable {
    pub fn new(mut options: FloodOptions) -> Self {
        options.max_sessions_per_peer = options.max_sessions_per_peer.min(MAX_SESSIONS_PER_PEER);

        Self {
            peers: HashMap::new(),
            sweep_queue: VecDeque::new(),
            options,
        }
    }

    pub fn options(&self) -> &FloodOptions {
        &self.options
    }

    /// Look up (or lazily create) the sender's record, optionally charging
    /// the per-packet ticket, and decide whether the packet may proceed.
    pub fn check_peer(&mut self, addr: &Address, charge_ticket: bool, now: u64) -> CheckOutcome {
        if !self.peers.contains_key(addr) {
            self.peers.insert(*addr, PeerRecord::new(*addr, now));
            self.sweep_queue.push_back(*addr);
        }

        let opts = self.options.clone();
        let Some(record) = self.peers.get_mut(addr) else {
            return CheckOutcome {
                allowed: false,
                banned_now: false,
                total_bans: 0,
            };
        };

        let banned_now = charge_ticket && record.rep(1, now, &opts);
        record.housekeep(now, &opts);

        CheckOutcome {
            allowed: !record.is_banned(),
            banned_now,
            total_bans: record.total_bans,
        }
    }

    /// Charge tickets to an existing peer. Returns whether a ban was
    /// triggered.
    pub fn rep(&mut self, addr: &Address, delta: u32, now: u64) -> bool {
        let opts = self.options.clone();
        match self.peers.get_mut(addr) {
            Some(record) => record.rep(delta, now, &opts),
            None => false,
        }
    }

    /// Charge the bad-message penalty. Returns whether a ban was triggered.
    pub fn punish_bad_message(&mut self, addr: &Address, now: u64) -> bool {
        self.rep(addr, self.options.bad_message_tickets, now)
    }

    pub fn record(&self, addr: &Address) -> Option<&PeerRecord> {
        self.peers.get(addr)
    }

    pub fn record_mut(&mut self, addr: &Address) -> Option<&mut PeerRecord> {
        self.peers.get_mut(addr)
    }

    pub fn session_cap(&self) -> usize {
        self.options.max_sessions_per_peer
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Visit up to `budget` peers: recently seen or banned ones get their
    /// upkeep and session expiry, everyone else is forgotten.
    pub fn sweep(&mut self, budget: usize, now: u64) {
        let opts = self.options.clone();

        for _ in 0..budget.min(self.sweep_queue.len()) {
            let Some(addr) = self.sweep_queue.pop_front() else {
                break;
            };

            let Some(record) = self.peers.get_mut(&addr) else {
                continue;
            };

            let keep =
                record.is_banned() || now.saturating_sub(record.last_seen) < opts.forget_time;

            if keep {
                record.housekeep(now, &opts);
                record.expire_sessions(false, now, opts.session_timeout);
                self.sweep_queue.push_back(addr);
            } else {
                self.peers.remove(&addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use codec::PacketKind;

    use super::*;

    fn addr(last: u8) -> Address {
        Address::from(std::net::SocketAddr::from(([172, 16, 0, last], 9999)))
    }

    fn header(session: u32, header_flags: u8) -> Header {
        Header::new(PacketKind::ListRequest, header_flags, session, 0x77)
    }

    fn table() -> PeerTable {
        PeerTable::new(FloodOptions::default())
    }

    #[test]
    fn bad_messages_ban_on_the_crossing_packet() {
        let mut table = table();
        let peer = addr(1);

        // Five bad packets leave the peer at 255 tickets, still allowed.
        for _ in 0..5 {
            let outcome = table.check_peer(&peer, true, 0);
            assert!(outcome.allowed);
            assert!(!table.punish_bad_message(&peer, 0));
        }

        // The sixth crosses 300 and bans immediately.
        assert!(table.check_peer(&peer, true, 0).allowed);
        assert!(table.punish_bad_message(&peer, 0));

        let outcome = table.check_peer(&peer, true, 1);
        assert!(!outcome.allowed);
        assert_eq!(outcome.total_bans, 1);
    }

    #[test]
    fn ban_destroys_sessions() {
        let mut table = table();
        let peer = addr(1);

        table.check_peer(&peer, true, 0);
        let record = table.record_mut(&peer).unwrap();
        record.create_session(&header(0x1234, 0), 0, 10).unwrap();
        assert_eq!(record.sessions.len(), 1);

        record.rep(1000, 0, &FloodOptions::default());
        assert!(record.sessions.is_empty());
        assert!(record.is_banned());
    }

    #[test]
    fn ban_expires_on_the_next_check() {
        let opts = FloodOptions::default();
        let mut table = table();
        let peer = addr(1);

        table.check_peer(&peer, true, 0);
        table.rep(&peer, opts.max_tickets, 0);
        assert!(!table.check_peer(&peer, true, 10).allowed);

        // First packet after the ban runs out goes through again, and the
        // unban refreshed last_seen.
        let outcome = table.check_peer(&peer, true, opts.ban_duration + 1);
        assert!(outcome.allowed);
        assert_eq!(
            table.record(&peer).unwrap().last_seen,
            opts.ban_duration + 1
        );
    }

    #[test]
    fn tickets_reset_after_the_quiet_period() {
        let opts = FloodOptions::default();
        let mut table = table();
        let peer = addr(1);

        table.check_peer(&peer, true, 0);
        table.rep(&peer, 100, 0);

        table.check_peer(&peer, true, opts.ticket_reset_period);
        assert_eq!(table.record(&peer).unwrap().tickets, 0);
    }

    #[test]
    fn sweep_forgets_idle_peers_but_keeps_banned_ones() {
        let opts = FloodOptions::default();
        let mut table = table();

        table.check_peer(&addr(1), true, 0);
        table.check_peer(&addr(2), true, 0);
        table.rep(&addr(2), opts.max_tickets, 0);

        table.sweep(5, opts.forget_time + 1);
        assert!(table.record(&addr(1)).is_none());
        assert!(table.record(&addr(2)).is_some());

        // Once the ban has run out the next sweep clears it, and the one
        // after can forget the peer.
        table.sweep(5, opts.forget_time + 1);
        assert!(!table.record(&addr(2)).unwrap().is_banned());
        table.sweep(5, 2 * opts.forget_time + 2);
        assert!(table.record(&addr(2)).is_none());
    }

    #[test]
    fn sweep_expires_idle_sessions() {
        let opts = FloodOptions::default();
        let mut table = table();
        let peer = addr(1);

        table.check_peer(&peer, true, 0);
        let record = table.record_mut(&peer).unwrap();
        record.create_session(&header(0x1234, 0), 0, 10).unwrap();

        table.sweep(5, opts.session_timeout - 1);
        assert_eq!(table.record(&peer).unwrap().sessions.len(), 1);

        table.check_peer(&peer, false, opts.session_timeout);
        table.sweep(5, opts.session_timeout);
        assert!(table.record(&peer).unwrap().sessions.is_empty());
    }

    #[test]
    fn session_cap_refuses_creation() {
        let mut table = table();
        let peer = addr(1);

        table.check_peer(&peer, true, 0);
        let record = table.record_mut(&peer).unwrap();

        for n in 0..10u32 {
            assert!(record.create_session(&header(n, 0), 0, 10).is_some());
        }

        assert!(record.create_session(&header(99, 0), 0, 10).is_none());
    }

    #[test]
    fn session_flags_never_keep_the_authenticated_bit() {
        let session = Session::new(7, flags::AUTHENTICATED_SESSION | flags::OFFLINE_QUERY, 0);
        assert_eq!(session.flags, flags::OFFLINE_QUERY);
    }

    #[test]
    fn challenge_tokens_are_nonzero_and_distinct() {
        let mut table = table();
        let peer = addr(1);

        table.check_peer(&peer, true, 0);
        let record = table.record_mut(&peer).unwrap();

        let mut tokens = Vec::new();
        for n in 0..10u32 {
            let index = record.create_session(&header(n, 0), 0, 10).unwrap();
            tokens.push(record.issue_challenge(index));
        }

        for (i, token) in tokens.iter().enumerate() {
            assert_ne!(*token, 0);
            assert!(tokens[i + 1..].iter().all(|other| other != token));
            assert!(record.sessions[i].flags & flags::AUTHENTICATED_SESSION != 0);
            assert!(record.sessions[i].flags & flags::NEW_STYLE_RESPONSE != 0);
        }

        // The token is what find_authenticated matches on.
        assert_eq!(record.find_authenticated(tokens[3], 1), Some(3));
        assert_eq!(record.find_authenticated(0, 1), None);
    }
}
