use crate::types::{ClassifiedEvent, Side};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Buy and sell events for one asset. Within a bucket each wallet appears at
/// most once per side; the first event wins and later same-side events from
/// the same wallet are dropped, not merged.
#[derive(Debug, Clone, Default)]
pub struct AssetBucket {
    pub buys: Vec<ClassifiedEvent>,
    pub sells: Vec<ClassifiedEvent>,
}

impl AssetBucket {
    pub fn side(&self, side: Side) -> &[ClassifiedEvent] {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<ClassifiedEvent> {
        match side {
            Side::Buy => &mut self.buys,
            Side::Sell => &mut self.sells,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buys.is_empty() && self.sells.is_empty()
    }
}

/// Classified events keyed by asset, retained up to the lookback horizon.
/// Appended to by the polling loop, scanned and swept by the monitor loop.
#[derive(Debug, Default)]
pub struct EventStore {
    buckets: HashMap<String, AssetBucket>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event unless the wallet already has one on that side for
    /// the asset. Returns whether the event was inserted.
    pub fn append(&mut self, event: ClassifiedEvent) -> bool {
        let bucket = self.buckets.entry(event.asset.clone()).or_default();
        let side = bucket.side_mut(event.side);
        if side.iter().any(|e| e.wallet == event.wallet) {
            return false;
        }
        debug!(
            "append: {} {} {} ({:.3} SOL)",
            event.wallet_name, event.side, event.asset, event.sol_amount
        );
        side.push(event);
        true
    }

    /// Events for one asset/side whose time falls within `[now - window, now]`.
    pub fn windowed(
        &self,
        asset: &str,
        side: Side,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Vec<ClassifiedEvent> {
        let Some(bucket) = self.buckets.get(asset) else {
            return Vec::new();
        };
        bucket
            .side(side)
            .iter()
            .filter(|e| e.is_within(now, window))
            .cloned()
            .collect()
    }

    /// Drop events older than the lookback horizon and remove buckets left
    /// empty on both sides. Returns the removed asset keys so correlation
    /// state can be dropped with them.
    pub fn sweep(&mut self, now: DateTime<Utc>, max_lookback: Duration) -> Vec<String> {
        let horizon = max_lookback.as_secs() as i64;
        let mut removed = Vec::new();
        self.buckets.retain(|asset, bucket| {
            let live =
                |e: &ClassifiedEvent| now.signed_duration_since(e.occurred_at).num_seconds() <= horizon;
            bucket.buys.retain(live);
            bucket.sells.retain(live);
            if bucket.is_empty() {
                removed.push(asset.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            debug!("Swept {} expired asset bucket(s)", removed.len());
        }
        removed
    }

    /// Snapshot of all buckets, taken so the caller can release the store
    /// lock before doing any slow work.
    pub fn snapshot(&self) -> Vec<(String, AssetBucket)> {
        self.buckets
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
