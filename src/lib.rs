pub mod config;
pub mod observer;
pub mod server;
pub mod statistics;

pub use codec;
pub use service;

use std::{fs, path::PathBuf, sync::Arc};

use service::{Service, ServiceOptions};

use crate::{config::Config, observer::Observer, statistics::Statistics};

/// Process id file, written at startup and removed on graceful shutdown.
pub const PID_FILE: &str = "masterd.pid";

/// Synthetic servers seeded in testing mode.
const TEST_SERVER_COUNT: usize = 8;

/// Bring the daemon up and run it to completion.
///
/// Split out of `main` so integration tests and embedders can start the
/// server themselves.
pub async fn server_main(config: Arc<Config>) -> anyhow::Result<()> {
    for warning in &config.warnings {
        log::warn!("{warning}");
    }

    let statistics = Statistics::default();
    let service = Service::new(ServiceOptions {
        name: config.name.clone(),
        region: config.region.clone(),
        heartbeat_timeout: config.heartbeat,
        challenge_mode: config.challenge_mode,
        testing_mode: config.testing_mode,
        flood: config.flood_options(),
        handler: Observer,
    });

    if config.testing_mode {
        service.populate_test_servers(TEST_SERVER_COUNT);
        log::info!("testing mode: seeded {TEST_SERVER_COUNT} synthetic servers");
    }

    let pid = match PidFile::create(PID_FILE) {
        Ok(pid) => Some(pid),
        Err(err) => {
            log::warn!("could not write {PID_FILE}: {err}");
            None
        }
    };

    let result = server::run(&config, service, statistics.clone()).await;
    drop(pid);

    let counts = statistics.snapshot();
    log::info!(
        "shutdown: {} packets in ({} bytes), {} packets out ({} bytes), {} send errors",
        counts.received_pkts,
        counts.received_bytes,
        counts.send_pkts,
        counts.send_bytes,
        counts.error_pkts
    );

    result
}

/// The pid file lives exactly as long as this guard.
struct PidFile(PathBuf);

impl PidFile {
    fn create(path: &str) -> std::io::Result<Self> {
        let path = PathBuf::from(path);
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self(path))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}
