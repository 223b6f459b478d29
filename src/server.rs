use std::{io::ErrorKind, sync::Arc, time::Duration};

use anyhow::Result;
use service::{Service, ServiceHandler, routing::Router};
use tokio::{
    net::UdpSocket,
    signal,
    signal::unix::{SignalKind, signal as unix_signal},
};

use crate::{
    config::Config,
    statistics::{Statistics, Stats},
};

/// Housekeeping budget per tick: at most this many registry records and
/// this many peers are visited.
const SWEEP_BUDGET: usize = 5;
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Bind the configured sockets and run until SIGINT or SIGTERM.
///
/// Every socket gets its own receive task; replies always leave through the
/// socket the request arrived on. A housekeeping task expires servers,
/// sessions, peers and bans in bounded slices.
pub async fn run<T>(config: &Config, service: Service<T>, statistics: Statistics) -> Result<()>
where
    T: ServiceHandler + Send + Sync + 'static,
{
    let mut tasks = Vec::new();

    for addr in config.listen_addrs() {
        match UdpSocket::bind(addr).await {
            Ok(socket) => {
                log::info!("listening on {addr}");
                tasks.push(tokio::spawn(socket_loop(
                    Arc::new(socket),
                    service.make_router(),
                    statistics.clone(),
                )));
            }
            Err(err) => log::warn!("failed to bind {addr}: {err}"),
        }
    }

    if tasks.is_empty() {
        anyhow::bail!("no listen socket could be bound");
    }

    {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                service.sweep(SWEEP_BUDGET);
            }
        }));
    }

    wait_for_shutdown().await?;

    for task in tasks {
        task.abort();
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = unix_signal(SignalKind::terminate())?;
    let mut sighup = unix_signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("SIGINT received, shutting down");
                return Ok(());
            }
            _ = sigterm.recv() => {
                log::info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = sighup.recv() => {
                // Reserved for a future preferences reload.
                log::info!("SIGHUP received and ignored");
            }
        }
    }
}

/// Receive datagrams from one socket and answer them.
async fn socket_loop<T>(socket: Arc<UdpSocket>, router: Router<T>, statistics: Statistics)
where
    T: ServiceHandler,
{
    let mut buf = vec![0u8; 2048];

    loop {
        let (size, source) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                // A remote host rejecting an earlier send surfaces here on
                // some platforms; it says nothing about our socket.
                if err.kind() != ErrorKind::ConnectionReset {
                    log::warn!("udp receive error: {err}");
                }
                continue;
            }
        };

        statistics.report(&[Stats::ReceivedPkts(1), Stats::ReceivedBytes(size as u32)]);
        log::trace!("udp receive: size={size}, source={source}");

        for reply in router.route(&buf[..size], source) {
            match socket.send_to(&reply, source).await {
                Ok(sent) => {
                    statistics.report(&[Stats::SendPkts(1), Stats::SendBytes(sent as u32)]);
                    log::trace!("udp send: size={sent}, target={source}");
                }
                Err(err) => {
                    statistics.report(&[Stats::ErrorPkts(1)]);
                    log::warn!("udp send to {source} failed: {err}");
                }
            }
        }
    }
}
