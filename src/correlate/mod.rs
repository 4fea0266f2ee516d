use crate::config::DetectionConfig;
use crate::notify::{Alert, AlertKind};
use crate::oracle::AssetInfoSource;
use crate::store::{AssetBucket, EventStore};
use crate::types::{ClassifiedEvent, Side, TokenInfo};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-side notification progress for one asset. Monotonic: once a window
/// fires, the side only ever emits updates for strictly new wallets.
#[derive(Debug, Default)]
struct SideState {
    notified_wallets: HashSet<String>,
    fired_windows: HashSet<u64>,
    prealert_fired: bool,
}

#[derive(Debug, Default)]
struct AssetState {
    buy: SideState,
    sell: SideState,
}

impl AssetState {
    fn side_mut(&mut self, side: Side) -> &mut SideState {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }
}

/// The multi-window threshold detector.
///
/// Each cycle scans every asset bucket per side in strict order:
/// pre-alert, then initial detection, then updates. Initial detection uses
/// the smallest qualifying window ("earliest window wins"); updates compare
/// the whole lookback set against already-notified wallets. Notification
/// state lives exactly as long as the asset's bucket, so a recurrence after
/// full expiry starts from scratch.
pub struct CorrelationEngine<O: AssetInfoSource> {
    store: Arc<Mutex<EventStore>>,
    oracle: Arc<O>,
    detection: DetectionConfig,
    session: String,
    alerts: mpsc::UnboundedSender<Alert>,
    states: HashMap<String, AssetState>,
}

impl<O: AssetInfoSource> CorrelationEngine<O> {
    pub fn new(
        store: Arc<Mutex<EventStore>>,
        oracle: Arc<O>,
        detection: DetectionConfig,
        session: impl Into<String>,
        alerts: mpsc::UnboundedSender<Alert>,
    ) -> Self {
        Self {
            store,
            oracle,
            detection,
            session: session.into(),
            alerts,
            states: HashMap::new(),
        }
    }

    /// One monitor cycle: scan everything, then sweep retention and drop
    /// state for buckets that disappeared. The store lock is only held while
    /// snapshotting and sweeping, never across an await.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) {
        let snapshot = self.store.lock().unwrap().snapshot();

        for (asset, bucket) in snapshot {
            for side in [Side::Buy, Side::Sell] {
                self.scan_side(&asset, &bucket, side, now).await;
            }
        }

        let removed = self
            .store
            .lock()
            .unwrap()
            .sweep(now, self.detection.max_lookback);
        for asset in removed {
            self.states.remove(&asset);
        }
    }

    async fn scan_side(&mut self, asset: &str, bucket: &AssetBucket, side: Side, now: DateTime<Utc>) {
        let lookback_set = within(bucket.side(side), now, self.detection.max_lookback);
        if lookback_set.is_empty() {
            return;
        }

        // State is taken out for the duration of the scan so oracle calls can
        // await without holding a borrow into the map.
        let mut state = self.states.remove(asset).unwrap_or_default();
        let side_state = state.side_mut(side);

        self.prealert_step(asset, bucket, side, side_state, now).await;
        self.initial_step(asset, bucket, side, side_state, now).await;
        self.update_step(asset, side, side_state, &lookback_set).await;

        self.states.insert(asset.to_string(), state);
    }

    /// Single-shot early signal at the lower threshold. Bypasses the cap
    /// gate by design; only runs while nothing has fired for this side.
    async fn prealert_step(
        &self,
        asset: &str,
        bucket: &AssetBucket,
        side: Side,
        state: &mut SideState,
        now: DateTime<Utc>,
    ) {
        if !self.detection.prealert_enabled || !state.fired_windows.is_empty() || state.prealert_fired
        {
            return;
        }

        for &window in &self.detection.windows {
            let participants = within(bucket.side(side), now, window);
            if unique_wallets(&participants).len() >= self.detection.prealert_threshold {
                let token = self.token_info(asset).await;
                self.emit(Alert {
                    session: self.session.clone(),
                    kind: AlertKind::PreAlert,
                    side,
                    token,
                    window: Some(window),
                    participants,
                });
                state.prealert_fired = true;
                break;
            }
        }
    }

    /// Earliest window meeting the main threshold wins; larger windows are
    /// not considered once a smaller one qualifies in the same cycle. A cap
    /// gate rejection suppresses the alert without marking the window, so
    /// the same window may still fire on a later cycle.
    async fn initial_step(
        &self,
        asset: &str,
        bucket: &AssetBucket,
        side: Side,
        state: &mut SideState,
        now: DateTime<Utc>,
    ) {
        if !state.fired_windows.is_empty() {
            return;
        }

        for &window in &self.detection.windows {
            let participants = within(bucket.side(side), now, window);
            let wallets = unique_wallets(&participants);
            debug!(
                "window scan: asset={} side={} window={}s unique={}",
                asset,
                side,
                window.as_secs(),
                wallets.len()
            );
            if wallets.len() < self.detection.threshold {
                continue;
            }

            let token = self.token_info(asset).await;
            if self.detection.cap_ok(token.market_cap) {
                self.emit(Alert {
                    session: self.session.clone(),
                    kind: AlertKind::Initial,
                    side,
                    token,
                    window: Some(window),
                    participants,
                });
                state.fired_windows.insert(window.as_secs());
                state.notified_wallets.extend(wallets);
            } else {
                debug!(
                    "cap gate deferred initial {} alert for {} (cap {})",
                    side, asset, token.market_cap
                );
            }
            break;
        }
    }

    /// After an initial alert: any lookback wallet not yet acknowledged is
    /// new. A cap gate failure leaves them unacknowledged for next cycle.
    async fn update_step(
        &self,
        asset: &str,
        side: Side,
        state: &mut SideState,
        lookback_set: &[ClassifiedEvent],
    ) {
        if !self.detection.updates_enabled || state.fired_windows.is_empty() {
            return;
        }

        let new_wallets: HashSet<String> = unique_wallets(lookback_set)
            .difference(&state.notified_wallets)
            .cloned()
            .collect();
        if new_wallets.is_empty() {
            return;
        }

        let token = self.token_info(asset).await;
        if !self.detection.cap_ok(token.market_cap) {
            debug!(
                "cap gate deferred {} update for {} (cap {})",
                side, asset, token.market_cap
            );
            return;
        }

        let participants: Vec<ClassifiedEvent> = lookback_set
            .iter()
            .filter(|e| new_wallets.contains(&e.wallet))
            .cloned()
            .collect();
        self.emit(Alert {
            session: self.session.clone(),
            kind: AlertKind::Update,
            side,
            token,
            window: None,
            participants,
        });
        state.notified_wallets.extend(new_wallets);
    }

    async fn token_info(&self, asset: &str) -> TokenInfo {
        match self.oracle.asset_info(asset).await {
            Some(info) => info,
            None => TokenInfo {
                market_cap: 0.0,
                symbol: "N/A".to_string(),
                address: asset.to_string(),
                pair_address: None,
            },
        }
    }

    fn emit(&self, alert: Alert) {
        if self.alerts.send(alert).is_err() {
            warn!("Alert channel closed, dropping notification");
        }
    }
}

fn within(events: &[ClassifiedEvent], now: DateTime<Utc>, window: Duration) -> Vec<ClassifiedEvent> {
    events
        .iter()
        .filter(|e| e.is_within(now, window))
        .cloned()
        .collect()
}

fn unique_wallets(events: &[ClassifiedEvent]) -> HashSet<String> {
    events.iter().map(|e| e.wallet.clone()).collect()
}
