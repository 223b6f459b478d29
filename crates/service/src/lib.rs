//! Protocol core of the master server.
//!
//! The registry of announced game servers, the peer reputation table with
//! its sessions, and the router that turns inbound datagrams into outbound
//! ones. The crate owns no sockets: the daemon feeds payloads in through a
//! [`Router`](routing::Router) and sends whatever comes back.

pub mod address;
pub mod filter;
pub mod pages;
pub mod peers;
pub mod registry;
pub mod routing;
pub mod strings;

use std::{sync::Arc, time::Instant};

use parking_lot::Mutex;

use crate::{
    address::Address,
    peers::{FloodOptions, PeerTable},
    registry::ServerStore,
    routing::Router,
};

/// Callbacks for the notable lifecycle events of the service.
///
/// All of them default to no-ops; the daemon installs a logging observer.
pub trait ServiceHandler: Send + Sync {
    /// A game server sent its first valid info response and is now listed.
    #[allow(unused_variables)]
    fn on_server_added(&self, addr: &Address) {}

    /// A server record ran past the heartbeat timeout and was dropped.
    #[allow(unused_variables)]
    fn on_server_expired(&self, addr: &Address) {}

    /// A peer crossed the ticket threshold and was banned.
    #[allow(unused_variables)]
    fn on_peer_banned(&self, addr: &Address, total_bans: u32) {}

    /// A session challenge went out to a client.
    #[allow(unused_variables)]
    fn on_challenge_issued(&self, addr: &Address) {}
}

pub struct ServiceOptions<T> {
    /// Master server name, reported in the info response.
    pub name: String,
    /// Master server region, reported in the info response.
    pub region: String,
    /// Seconds without an info response before a server is delisted.
    pub heartbeat_timeout: u64,
    /// Require the session challenge handshake before answering queries.
    pub challenge_mode: bool,
    /// Keep synthetic test servers alive forever.
    pub testing_mode: bool,
    pub flood: FloodOptions,
    pub handler: T,
}

/// The shared protocol state behind a single writer lock.
///
/// Handlers mutate the registry and the peer table in the same turn, so the
/// two sit behind one lock rather than two.
pub(crate) struct Shared {
    pub(crate) registry: ServerStore,
    pub(crate) peers: PeerTable,
}

pub(crate) struct ServiceInner<T> {
    pub(crate) name: String,
    pub(crate) region: String,
    pub(crate) challenge_mode: bool,
    pub(crate) clock: Clock,
    pub(crate) shared: Mutex<Shared>,
    pub(crate) handler: T,
}

/// Master server service.
pub struct Service<T>(Arc<ServiceInner<T>>);

impl<T> Clone for Service<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Service<T>
where
    T: ServiceHandler,
{
    pub fn new(options: ServiceOptions<T>) -> Self {
        Self(Arc::new(ServiceInner {
            name: options.name,
            region: options.region,
            challenge_mode: options.challenge_mode,
            clock: Clock::default(),
            shared: Mutex::new(Shared {
                registry: ServerStore::new(options.heartbeat_timeout, options.testing_mode),
                peers: PeerTable::new(options.flood),
            }),
            handler: options.handler,
        }))
    }

    /// A router for one transport task. Routers are cheap handles onto the
    /// same shared state.
    pub fn make_router(&self) -> Router<T> {
        Router::new(self.clone())
    }

    /// One housekeeping turn: visit up to `budget` registry records and up
    /// to `budget` peers. Both cursors persist across turns.
    pub fn sweep(&self, budget: usize) {
        let now = self.0.clock.now();
        let mut shared = self.0.shared.lock();

        for addr in shared.registry.sweep(budget, now) {
            self.0.handler.on_server_expired(&addr);
        }

        shared.peers.sweep(budget, now);
    }

    pub fn server_count(&self) -> usize {
        self.0.shared.lock().registry.count()
    }

    pub fn peer_count(&self) -> usize {
        self.0.shared.lock().peers.len()
    }

    /// Seed synthetic servers for testing mode.
    pub fn populate_test_servers(&self, count: usize) {
        let now = self.0.clock.now();
        self.0
            .shared
            .lock()
            .registry
            .populate_test_servers(count, now);
    }

    pub(crate) fn inner(&self) -> &ServiceInner<T> {
        &self.0
    }
}

/// Monotonic seconds since service start. Table operations take the time as
/// a plain argument so tests can drive it directly.
pub(crate) struct Clock(Instant);

impl Default for Clock {
    fn default() -> Self {
        Self(Instant::now())
    }
}

impl Clock {
    pub(crate) fn now(&self) -> u64 {
        self.0.elapsed().as_secs()
    }
}
