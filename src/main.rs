use vitals_relay::{
    arguments::{is_help_requested, print_help},
    config::RelayConfig,
    logger::{self as logger, LogTag},
    webserver,
};

/// Main entry point for the vitals relay
///
/// Startup order matters: configuration and the record store must both be
/// usable before the listening socket is opened. Any failure there exits
/// with status 1.
#[tokio::main]
async fn main() {
    // Initialize logger system
    logger::init();

    // Check for help request first (before any other processing)
    if is_help_requested() {
        print_help();
        std::process::exit(0);
    }

    logger::info(LogTag::System, "🚀 Vitals relay starting up...");

    if let Err(e) = run().await {
        logger::error(LogTag::System, &format!("❌ {:#}", e));
        logger::flush();
        std::process::exit(1);
    }

    logger::info(LogTag::System, "👋 Vitals relay shut down");
    logger::flush();
}

async fn run() -> anyhow::Result<()> {
    let config = RelayConfig::from_env()?;

    logger::info(
        LogTag::Config,
        &format!(
            "Configuration loaded (bind={}:{}, max_connections={}, max_frame_bytes={})",
            config.host, config.port, config.max_connections, config.max_frame_bytes
        ),
    );

    webserver::start_server(config).await?;
    Ok(())
}
