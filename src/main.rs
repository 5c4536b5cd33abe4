mod ai;
mod app;
mod classifier;
mod config;
mod db;
mod domain;
mod host;
mod infrastructure;
mod labels;
mod platform;
mod tasks;

use std::time::Duration;

use anyhow::Result;
use infrastructure::{directories, logging, shutdown};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve());
    // stdin is read on a blocking thread that may still be parked in read().
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn serve() -> Result<()> {
    let config = config::load_config()?;
    let paths = directories::ensure_directories(&config.directories)?;
    logging::init_tracing(&config, &paths)?;

    let (shutdown, _) = shutdown::Shutdown::new();
    shutdown::install_signal_handlers(shutdown.clone());

    let app = app::TabGrouperApp::initialize(config, paths, shutdown).await?;
    app.run().await
}
