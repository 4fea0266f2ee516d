use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Per-wallet bookmark of already-processed transaction signatures.
///
/// The store always holds exactly the most recent observed batch for each
/// wallet; committing replaces the batch rather than growing a union, which
/// bounds memory and naturally expires old signatures. A signature recorded
/// as seen is never handed out for replay again.
#[derive(Debug, Default)]
pub struct CursorStore {
    seen: HashMap<String, HashSet<String>>,
    backfill_on_start: usize,
}

impl CursorStore {
    pub fn new(backfill_on_start: usize) -> Self {
        Self {
            seen: HashMap::new(),
            backfill_on_start,
        }
    }

    /// Diff an observed batch (newest first, as the upstream returns it)
    /// against the stored cursor. Returns the signatures to replay,
    /// oldest first, so balance-delta processing stays temporally monotonic.
    ///
    /// First observation: with a zero backfill count the whole batch is the
    /// baseline and nothing is returned; otherwise the newest N are replayed
    /// so a cold start still exercises the pipeline.
    pub fn diff(&self, wallet: &str, observed_newest_first: &[String]) -> Vec<String> {
        match self.seen.get(wallet) {
            None => {
                let take = self.backfill_on_start.min(observed_newest_first.len());
                let mut new: Vec<String> = observed_newest_first[..take].to_vec();
                new.reverse();
                if !new.is_empty() {
                    debug!("Backfilling {} signature(s) for {}", new.len(), wallet);
                }
                new
            }
            Some(seen) => {
                let mut new: Vec<String> = observed_newest_first
                    .iter()
                    .filter(|sig| !seen.contains(*sig))
                    .cloned()
                    .collect();
                new.reverse();
                new
            }
        }
    }

    /// Replace the stored cursor with the full observed batch. Called after
    /// a batch was processed or its processing was attempted.
    pub fn commit(&mut self, wallet: &str, observed: &[String]) {
        self.seen
            .insert(wallet.to_string(), observed.iter().cloned().collect());
    }

    /// Whether a wallet has been observed at least once.
    pub fn has_cursor(&self, wallet: &str) -> bool {
        self.seen.contains_key(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sigs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_observation_is_baseline() {
        let mut store = CursorStore::new(0);
        let observed = sigs(&["c", "b", "a"]);
        assert!(store.diff("w1", &observed).is_empty());
        store.commit("w1", &observed);
        assert!(store.has_cursor("w1"));
    }

    #[test]
    fn test_backfill_replays_newest_oldest_first() {
        let store = CursorStore::new(2);
        let observed = sigs(&["c", "b", "a"]);
        // Newest two, flipped for replay order
        assert_eq!(store.diff("w1", &observed), sigs(&["b", "c"]));
    }

    #[test]
    fn test_diff_returns_only_new_oldest_first() {
        let mut store = CursorStore::new(0);
        store.commit("w1", &sigs(&["c", "b", "a"]));

        let observed = sigs(&["e", "d", "c", "b"]);
        assert_eq!(store.diff("w1", &observed), sigs(&["d", "e"]));
    }

    #[test]
    fn test_diff_is_idempotent() {
        let mut store = CursorStore::new(0);
        store.commit("w1", &sigs(&["b", "a"]));

        let observed = sigs(&["c", "b", "a"]);
        assert_eq!(store.diff("w1", &observed), sigs(&["c"]));
        store.commit("w1", &observed);
        // Same batch again, nothing new the second time
        assert!(store.diff("w1", &observed).is_empty());
    }

    #[test]
    fn test_commit_replaces_not_merges() {
        let mut store = CursorStore::new(0);
        store.commit("w1", &sigs(&["b", "a"]));
        store.commit("w1", &sigs(&["d", "c"]));

        // "a" fell out of the batch window; if it reappears it is new again
        let observed = sigs(&["d", "c", "a"]);
        assert_eq!(store.diff("w1", &observed), sigs(&["a"]));
    }

    #[test]
    fn test_wallets_are_independent() {
        let mut store = CursorStore::new(0);
        store.commit("w1", &sigs(&["a"]));
        assert!(!store.has_cursor("w2"));
        assert!(store.diff("w2", &sigs(&["a"])).is_empty());
    }
}
