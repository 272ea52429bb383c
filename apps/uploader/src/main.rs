//! partup uploader entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting partup uploader"
    );

    // Optional explicit config path as the only argument.
    let config_path = std::env::args_os().nth(1).map(std::path::PathBuf::from);
    let config = config::Config::load(config_path)?;
    tracing::info!(
        server = %config.server_host,
        port = config.server_port,
        workers = config.workers,
        proxied = config.use_proxy,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(app::run(config));
    // The stdin reader sits on a blocking thread that never returns on its own.
    rt.shutdown_timeout(std::time::Duration::from_secs(1));
    result?;

    tracing::info!("uploader shut down cleanly");
    Ok(())
}
