use std::collections::VecDeque;

use ahash::{HashMap, HashMapExt};
use rand::Rng;

use crate::{
    address::Address,
    filter::{self, ServerFilter, TypeConstraint, region},
    pages::PageBuilder,
    peers::Session,
    strings::{PooledStr, StringPool},
};

/// Everything the registry retains about one game server.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub addr: Address,
    pub game_type: PooledStr,
    pub mission_type: PooledStr,
    /// Region mask; the top two bits encode the address family and are
    /// maintained here, never taken from the sender.
    pub regions: u32,
    pub version: u32,
    pub cpu_speed: u32,
    pub player_count: u8,
    pub max_players: u8,
    pub bot_count: u8,
    pub info_flags: u8,
    /// Player GUIDs as reported by the server. Tribes 2 sends them, most
    /// games do not; empty means absent.
    pub player_guids: Vec<u32>,
    pub last_info_at: u64,
    /// Synthesised record that never expires while testing mode is on.
    pub test_server: bool,
}

/// The fields of an inbound info response, before interning.
#[derive(Debug, Default, Clone)]
pub struct ServerUpdate {
    pub game_type: String,
    pub mission_type: String,
    pub regions: u32,
    pub version: u32,
    pub cpu_speed: u32,
    pub player_count: u8,
    pub max_players: u8,
    pub bot_count: u8,
    pub info_flags: u8,
    pub player_guids: Vec<u32>,
}

/// The live set of announced game servers.
///
/// Keyed by address; a heartbeat only hands out a correlation pair, the
/// record itself is created by the first valid info response from that
/// address. A rotation queue doubles as the sweep cursor so expiry can visit
/// a bounded number of records per housekeeping turn.
pub struct ServerStore {
    servers: HashMap<Address, ServerInfo>,
    sweep_queue: VecDeque<Address>,
    game_types: StringPool,
    mission_types: StringPool,
    heartbeat_timeout: u64,
    testing_mode: bool,
}

impl ServerStore {
    pub fn new(heartbeat_timeout: u64, testing_mode: bool) -> Self {
        Self {
            servers: HashMap::new(),
            sweep_queue: VecDeque::new(),
            game_types: StringPool::new(),
            mission_types: StringPool::new(),
            heartbeat_timeout,
            testing_mode,
        }
    }

    /// Answer a heartbeat with a fresh correlation pair for the info
    /// request that follows. Nothing is stored; identity is the address.
    pub fn heartbeat(&self) -> (u16, u16) {
        let mut rng = rand::rng();
        (rng.random(), rng.random())
    }

    /// Insert or refresh the record at `addr`. Returns whether the record
    /// is new.
    pub fn update(&mut self, addr: Address, update: &ServerUpdate, now: u64) -> bool {
        let game_type = self.game_types.intern(&update.game_type);
        let mission_type = self.mission_types.intern(&update.mission_type);
        let regions = (update.regions & !region::ADDRESS_MASK) | addr.family_bit();

        let previous = if let Some(info) = self.servers.get_mut(&addr) {
            let old_game = std::mem::replace(&mut info.game_type, game_type.clone());
            let old_mission = std::mem::replace(&mut info.mission_type, mission_type.clone());

            info.regions = regions;
            info.version = update.version;
            info.cpu_speed = update.cpu_speed;
            info.player_count = update.player_count;
            info.max_players = update.max_players;
            info.bot_count = update.bot_count;
            info.info_flags = update.info_flags;
            info.player_guids = update.player_guids.clone();
            info.last_info_at = now;

            Some((old_game, old_mission))
        } else {
            None
        };

        match previous {
            Some((old_game, old_mission)) => {
                self.game_types.release(&old_game);
                self.mission_types.release(&old_mission);
                false
            }
            None => {
                self.servers.insert(
                    addr,
                    ServerInfo {
                        addr,
                        game_type,
                        mission_type,
                        regions,
                        version: update.version,
                        cpu_speed: update.cpu_speed,
                        player_count: update.player_count,
                        max_players: update.max_players,
                        bot_count: update.bot_count,
                        info_flags: update.info_flags,
                        player_guids: update.player_guids.clone(),
                        last_info_at: now,
                        test_server: false,
                    },
                );
                self.sweep_queue.push_back(addr);
                true
            }
        }
    }

    /// Evaluate `filter` against every known server and write the paginated
    /// result into `session`.
    pub fn query(&self, session: &mut Session, filter: &ServerFilter) {
        let new_style = session.is_new_style();

        let game_type = self.resolve_game_type(&filter.game_type);
        let mission_type = self.resolve_mission_type(&filter.mission_type);

        let mut builder = PageBuilder::new(new_style);

        // A type that is not in the pool cannot match anything; skip the
        // scan and hand back the empty page.
        if !game_type.is_missing() && !mission_type.is_missing() {
            for info in self.servers.values() {
                if !new_style && info.addr.is_ipv6() {
                    continue;
                }

                if !filter::matches(info, filter, &game_type, &mission_type) {
                    continue;
                }

                if !builder.push(&info.addr) {
                    break;
                }
            }
        }

        let (pages, total, clipped) = builder.finish();
        if clipped {
            log::warn!(
                "list query overflow, clipped to {} packets ({} servers)",
                pages.len(),
                total
            );
        }

        session.total = total;
        session.pages = pages;
    }

    /// Visit up to `budget` records, dropping the ones whose last info
    /// response is older than the heartbeat timeout. The cursor persists
    /// across calls. Returns the dropped addresses.
    pub fn sweep(&mut self, budget: usize, now: u64) -> Vec<Address> {
        let mut removed = Vec::new();

        for _ in 0..budget.min(self.sweep_queue.len()) {
            let Some(addr) = self.sweep_queue.pop_front() else {
                break;
            };

            let expired = match self.servers.get(&addr) {
                Some(info) => {
                    now.saturating_sub(info.last_info_at) > self.heartbeat_timeout
                        && !(self.testing_mode && info.test_server)
                }
                None => continue,
            };

            if expired {
                if let Some(info) = self.servers.remove(&addr) {
                    self.game_types.release(&info.game_type);
                    self.mission_types.release(&info.mission_type);
                    removed.push(addr);
                }
            } else {
                self.sweep_queue.push_back(addr);
            }
        }

        removed
    }

    pub fn count(&self) -> usize {
        self.servers.len()
    }

    pub fn game_types(&self) -> &StringPool {
        &self.game_types
    }

    pub fn mission_types(&self) -> &StringPool {
        &self.mission_types
    }

    /// Seed `count` synthetic servers for testing mode. They are flagged so
    /// the sweep keeps them alive indefinitely.
    pub fn populate_test_servers(&mut self, count: usize, now: u64) {
        for n in 0..count {
            let addr = Address::from(std::net::SocketAddr::from((
                [10, 0, (n >> 8) as u8, n as u8],
                28000,
            )));

            let update = ServerUpdate {
                game_type: "Test".to_string(),
                mission_type: "Deathmatch".to_string(),
                regions: 1,
                version: 1000,
                cpu_speed: 1000,
                player_count: (n % 16) as u8,
                max_players: 16,
                ..ServerUpdate::default()
            };

            self.update(addr, &update, now);
            if let Some(info) = self.servers.get_mut(&addr) {
                info.test_server = true;
            }
        }
    }

    fn resolve_game_type(&self, text: &str) -> TypeConstraint {
        resolve(&self.game_types, text)
    }

    fn resolve_mission_type(&self, text: &str) -> TypeConstraint {
        resolve(&self.mission_types, text)
    }
}

fn resolve(pool: &StringPool, text: &str) -> TypeConstraint {
    if filter::is_type_wildcard(text) {
        TypeConstraint::Any
    } else {
        match pool.lookup(text) {
            Some(handle) => TypeConstraint::Exact(handle),
            None => TypeConstraint::Missing,
        }
    }
}
