use multibuy::{
    ConfigWalletDirectory, DexScreenerOracle, RpcFetcher, TrackerSupervisor, WebhookNotifier,
    load_config,
};
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

const DEFAULT_SESSION: &str = "default";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting multibuy - multi-wallet buy/sell correlation tracker");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = match load_config(&config_path) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("Failed to load config: {}", e);
            info!("Creating default config file...");
            multibuy::create_default_config(&config_path)?;
            info!(
                "Please edit {} with your RPC endpoint and wallet list",
                config_path
            );
            return Ok(());
        }
    };

    if config.wallets.iter().filter(|w| w.tracked).count() == 0 {
        info!("No tracked wallets configured yet; the tracker will idle until some are added");
    }

    let fetcher = Arc::new(RpcFetcher::new(&config.rpc)?);
    let oracle = Arc::new(DexScreenerOracle::new(fetcher.clone(), config.oracle.ttl)?);

    let (alert_tx, alert_rx) = mpsc::unbounded_channel();
    let notifier = WebhookNotifier::new(&config.notify)?;
    let delivery = tokio::spawn(notifier.run(alert_rx));

    let directory = Arc::new(ConfigWalletDirectory::new(config.wallets.clone()));
    let supervisor = TrackerSupervisor::new(
        fetcher,
        oracle,
        config.clone(),
        directory,
        alert_tx,
    );

    supervisor.start(DEFAULT_SESSION).await;
    info!(
        "Tracking {} wallet(s), windows {:?}, threshold {}. Press Ctrl+C to stop.",
        config.wallets.iter().filter(|w| w.tracked).count(),
        config.detection.windows,
        config.detection.threshold
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    supervisor.stop_all().await;
    delivery.abort();

    info!("Shutting down...");
    Ok(())
}
