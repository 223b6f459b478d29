use service::{ServiceHandler, address::Address};

/// Logs the service lifecycle events.
#[derive(Debug, Default, Clone, Copy)]
pub struct Observer;

impl ServiceHandler for Observer {
    fn on_server_added(&self, addr: &Address) {
        log::info!("server listed: {addr}");
    }

    fn on_server_expired(&self, addr: &Address) {
        log::info!("server delisted: {addr}");
    }

    fn on_peer_banned(&self, addr: &Address, total_bans: u32) {
        log::warn!("peer banned: {addr} (ban #{total_bans})");
    }

    fn on_challenge_issued(&self, addr: &Address) {
        log::debug!("challenge issued to {addr}");
    }
}
