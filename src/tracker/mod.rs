use crate::classify::TransactionClassifier;
use crate::config::TrackerConfig;
use crate::correlate::CorrelationEngine;
use crate::cursor::CursorStore;
use crate::error::TrackerResult;
use crate::notify::Alert;
use crate::oracle::AssetInfoSource;
use crate::rpc::RpcFetcher;
use crate::store::EventStore;
use crate::types::Wallet;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Source of the wallet list for a session, read fresh every polling cycle
/// so live edits take effect without invalidation.
pub trait WalletDirectory: Send + Sync {
    fn list_tracked_wallets(&self, session: &str) -> Vec<Wallet>;
}

/// Directory backed by the `[[wallets]]` config table; every session sees
/// the same list.
pub struct ConfigWalletDirectory {
    wallets: Vec<Wallet>,
}

impl ConfigWalletDirectory {
    pub fn new(wallets: Vec<Wallet>) -> Self {
        Self { wallets }
    }
}

impl WalletDirectory for ConfigWalletDirectory {
    fn list_tracked_wallets(&self, _session: &str) -> Vec<Wallet> {
        self.wallets.iter().filter(|w| w.tracked).cloned().collect()
    }
}

struct SessionTasks {
    poll: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

/// Owns the per-session task pair: a polling loop that turns wallet activity
/// into classified events, and a monitor loop that runs correlation cycles.
///
/// `start` is idempotent per session; `stop` cancels both tasks and waits
/// for them to terminate, so a fast stop/start can never leave two trackers
/// for the same session running at once. The fetcher (and its admission
/// gate) is shared across sessions; everything else is per-session.
pub struct TrackerSupervisor<O: AssetInfoSource> {
    fetcher: Arc<RpcFetcher>,
    oracle: Arc<O>,
    config: Arc<TrackerConfig>,
    directory: Arc<dyn WalletDirectory>,
    alerts: mpsc::UnboundedSender<Alert>,
    sessions: Mutex<HashMap<String, SessionTasks>>,
}

impl<O: AssetInfoSource> TrackerSupervisor<O> {
    pub fn new(
        fetcher: Arc<RpcFetcher>,
        oracle: Arc<O>,
        config: Arc<TrackerConfig>,
        directory: Arc<dyn WalletDirectory>,
        alerts: mpsc::UnboundedSender<Alert>,
    ) -> Self {
        Self {
            fetcher,
            oracle,
            config,
            directory,
            alerts,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the polling and monitor loops for a session. No-op if the
    /// session is already running.
    pub async fn start(&self, session: &str) {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session) {
            info!("Tracker already running for session {}", session);
            return;
        }

        info!("Starting tracker for session {}", session);
        let store = Arc::new(StdMutex::new(EventStore::new()));

        let poll = tokio::spawn(polling_loop(PollContext {
            session: session.to_string(),
            fetcher: self.fetcher.clone(),
            oracle: self.oracle.clone(),
            config: self.config.clone(),
            directory: self.directory.clone(),
            store: store.clone(),
        }));

        let engine = CorrelationEngine::new(
            store,
            self.oracle.clone(),
            self.config.detection.clone(),
            session,
            self.alerts.clone(),
        );
        let monitor_interval = self.config.poll.monitor_interval;
        let monitor = tokio::spawn(async move {
            let mut engine = engine;
            loop {
                engine.run_cycle(Utc::now()).await;
                sleep(monitor_interval).await;
            }
        });

        sessions.insert(session.to_string(), SessionTasks { poll, monitor });
    }

    /// Cancel both session tasks and wait for them to actually terminate.
    /// Safe to call when nothing is running; stale bookkeeping is cleared
    /// either way.
    pub async fn stop(&self, session: &str) {
        let tasks = self.sessions.lock().await.remove(session);
        let Some(tasks) = tasks else {
            info!("No active tracker for session {}", session);
            return;
        };

        tasks.poll.abort();
        tasks.monitor.abort();
        let _ = tasks.poll.await;
        let _ = tasks.monitor.await;
        info!("Tracker stopped for session {}", session);
    }

    pub async fn stop_all(&self) {
        let sessions: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for session in sessions {
            self.stop(&session).await;
        }
    }

    pub async fn is_running(&self, session: &str) -> bool {
        self.sessions.lock().await.contains_key(session)
    }
}

struct PollContext<O: AssetInfoSource> {
    session: String,
    fetcher: Arc<RpcFetcher>,
    oracle: Arc<O>,
    config: Arc<TrackerConfig>,
    directory: Arc<dyn WalletDirectory>,
    store: Arc<StdMutex<EventStore>>,
}

/// Per-session polling loop: fan out over tracked wallets each cycle,
/// bounded by the per-session semaphore. Failures for one wallet never
/// abort the cycle for the others.
async fn polling_loop<O: AssetInfoSource>(ctx: PollContext<O>) {
    let cursors = Arc::new(StdMutex::new(CursorStore::new(
        ctx.config.poll.backfill_on_start,
    )));
    let classifier = Arc::new(TransactionClassifier::new(
        ctx.config.detection.max_lookback,
    ));

    loop {
        let wallets = ctx.directory.list_tracked_wallets(&ctx.session);
        if wallets.is_empty() {
            sleep(ctx.config.poll.poll_interval).await;
            continue;
        }

        let cycle_started = Instant::now();
        let gate = Arc::new(Semaphore::new(ctx.config.poll.wallet_concurrency));
        let wallet_count = wallets.len();

        let units = wallets.into_iter().map(|wallet| {
            let gate = gate.clone();
            let fetcher = ctx.fetcher.clone();
            let oracle = ctx.oracle.clone();
            let config = ctx.config.clone();
            let cursors = cursors.clone();
            let classifier = classifier.clone();
            let store = ctx.store.clone();
            async move {
                let Ok(_permit) = gate.acquire().await else {
                    return;
                };
                let outcome = process_wallet(
                    &wallet, &fetcher, &oracle, &classifier, &cursors, &store, &config,
                )
                .await;
                match outcome {
                    Ok(()) => {}
                    Err(e) if e.is_throttled() => {
                        warn!(
                            "Rate limited for {}, backing off {:?}",
                            wallet.name,
                            fetcher.throttle_cooldown()
                        );
                        sleep(fetcher.throttle_cooldown()).await;
                    }
                    Err(e) => {
                        warn!("Skipping {} this cycle: {}", wallet.name, e);
                    }
                }
            }
        });
        futures::future::join_all(units).await;

        debug!(
            "Scan cycle for session {}: {} wallet(s) in {:.1}s",
            ctx.session,
            wallet_count,
            cycle_started.elapsed().as_secs_f64()
        );
        sleep(ctx.config.poll.poll_interval).await;
    }
}

/// One wallet's unit of work: list signatures, diff against the cursor,
/// fetch and classify each new transaction, append events, commit cursor.
async fn process_wallet<O: AssetInfoSource>(
    wallet: &Wallet,
    fetcher: &RpcFetcher,
    oracle: &Arc<O>,
    classifier: &TransactionClassifier,
    cursors: &StdMutex<CursorStore>,
    store: &StdMutex<EventStore>,
    config: &TrackerConfig,
) -> TrackerResult<()> {
    let entries = fetcher
        .signatures_for_address(&wallet.address, config.poll.signature_limit)
        .await?;
    if entries.is_empty() {
        return Ok(());
    }

    let observed: Vec<String> = entries.into_iter().map(|e| e.signature).collect();
    let (new_signatures, had_cursor) = {
        let cursors = cursors.lock().unwrap();
        (cursors.diff(&wallet.address, &observed), cursors.has_cursor(&wallet.address))
    };

    if !new_signatures.is_empty() {
        if had_cursor {
            info!(
                "Found {} new transaction(s) for {}",
                new_signatures.len(),
                wallet.name
            );
        } else {
            info!(
                "Backfilling {} transaction(s) for {}",
                new_signatures.len(),
                wallet.name
            );
        }
    }

    for signature in &new_signatures {
        match fetcher.transaction(signature).await {
            Ok(Some(tx)) => {
                for mut event in classifier.classify(wallet, &tx, Utc::now()) {
                    // Best-effort cap snapshot; absence is not an error
                    event.cap_snapshot = oracle
                        .asset_info(&event.asset)
                        .await
                        .map(|i| i.market_cap)
                        .filter(|c| *c > 0.0);
                    let (side, asset) = (event.side, event.asset.clone());
                    if store.lock().unwrap().append(event) {
                        info!("{} event: {} -> {}", side, wallet.name, asset);
                    }
                }
            }
            Ok(None) => {
                debug!("No record for signature {} yet", signature);
            }
            Err(e) if e.is_throttled() => {
                warn!(
                    "Rate limited fetching {} for {}, backing off",
                    signature, wallet.name
                );
                sleep(fetcher.throttle_cooldown()).await;
            }
            Err(e) => {
                warn!("Failed to fetch {} for {}: {}", signature, wallet.name, e);
            }
        }
        // Stay polite to the upstream between a wallet's work items
        sleep(config.poll.wallet_spacing).await;
    }

    cursors.lock().unwrap().commit(&wallet.address, &observed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DetectionConfig, NotifyConfig, OracleConfig, PollConfig, RpcConfig,
    };
    use crate::types::TokenInfo;
    use std::time::Duration;

    struct NullOracle;

    impl AssetInfoSource for NullOracle {
        async fn asset_info(&self, _asset: &str) -> Option<TokenInfo> {
            None
        }
    }

    fn test_config() -> Arc<TrackerConfig> {
        Arc::new(TrackerConfig {
            rpc: RpcConfig {
                endpoint: "http://localhost:1".to_string(),
                concurrency: 2,
                pace_delay: Duration::ZERO,
                pace_jitter: Duration::ZERO,
                throttle_cooldown: Duration::from_millis(10),
                request_timeout: Duration::from_secs(1),
            },
            poll: PollConfig {
                poll_interval: Duration::from_millis(20),
                monitor_interval: Duration::from_millis(20),
                wallet_concurrency: 2,
                wallet_spacing: Duration::ZERO,
                signature_limit: 10,
                backfill_on_start: 0,
            },
            detection: DetectionConfig {
                windows: vec![Duration::from_secs(60)],
                threshold: 3,
                prealert_enabled: true,
                prealert_threshold: 2,
                updates_enabled: true,
                min_market_cap: 75_000.0,
                max_market_cap: None,
                max_lookback: Duration::from_secs(3600),
            },
            oracle: OracleConfig {
                ttl: Duration::from_secs(60),
            },
            notify: NotifyConfig {
                webhook_url: None,
                dedupe_ttl: Duration::from_secs(60),
            },
            wallets: Vec::new(),
        })
    }

    fn supervisor() -> TrackerSupervisor<NullOracle> {
        let config = test_config();
        let fetcher = Arc::new(RpcFetcher::new(&config.rpc).unwrap());
        let (tx, _rx) = mpsc::unbounded_channel();
        TrackerSupervisor::new(
            fetcher,
            Arc::new(NullOracle),
            config,
            Arc::new(ConfigWalletDirectory::new(Vec::new())),
            tx,
        )
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let sup = supervisor();
        sup.start("chat-1").await;
        sup.start("chat-1").await;
        assert!(sup.is_running("chat-1").await);
        assert_eq!(sup.sessions.lock().await.len(), 1);
        sup.stop("chat-1").await;
    }

    #[tokio::test]
    async fn test_stop_waits_and_clears() {
        let sup = supervisor();
        sup.start("chat-1").await;
        assert!(sup.is_running("chat-1").await);

        sup.stop("chat-1").await;
        assert!(!sup.is_running("chat-1").await);

        // Stopping again is a safe no-op
        sup.stop("chat-1").await;
        assert!(!sup.is_running("chat-1").await);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let sup = supervisor();
        sup.start("chat-1").await;
        sup.start("chat-2").await;
        sup.stop("chat-1").await;
        assert!(!sup.is_running("chat-1").await);
        assert!(sup.is_running("chat-2").await);
        sup.stop_all().await;
        assert!(!sup.is_running("chat-2").await);
    }

    #[tokio::test]
    async fn test_fast_stop_start_cycle() {
        let sup = supervisor();
        for _ in 0..3 {
            sup.start("chat-1").await;
            sup.stop("chat-1").await;
        }
        assert!(!sup.is_running("chat-1").await);
    }

    #[test]
    fn test_directory_filters_untracked() {
        let mut paused = Wallet::new("addr2", "paused");
        paused.tracked = false;
        let dir = ConfigWalletDirectory::new(vec![Wallet::new("addr1", "active"), paused]);

        let listed = dir.list_tracked_wallets("any");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "active");
    }
}
