#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use master_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);

    let mut logger = simple_logger::SimpleLogger::new().with_level(config.level_filter());
    if !config.timestamp {
        logger = logger.without_timestamps();
    }
    logger.init()?;

    master_server::server_main(config).await
}
