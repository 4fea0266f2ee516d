use crate::rpc::ParsedTransaction;
use crate::types::{ClassifiedEvent, Side, Wallet};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Wrapped SOL; its balance moves mirror the native delta and never count
/// as a traded asset.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// USDC
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// USDT
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

const DENY_LIST: [&str; 3] = [WSOL_MINT, USDC_MINT, USDT_MINT];

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Turns a parsed transaction into zero or more Buy/Sell events for one
/// tracked wallet.
///
/// A buy is SOL out beyond the noise threshold paired with a token balance
/// increase; a sell is the mirror image. A transaction routed through an
/// intermediate hop can move more than one non-native asset, so every
/// qualifying mint yields its own event.
pub struct TransactionClassifier {
    /// SOL moves below this are treated as fee dust, not trades
    noise_threshold_sol: f64,
    max_lookback_secs: i64,
}

impl TransactionClassifier {
    pub fn new(max_lookback: Duration) -> Self {
        Self {
            noise_threshold_sol: 0.001,
            max_lookback_secs: max_lookback.as_secs() as i64,
        }
    }

    /// Classify a transaction for a wallet. Returns an empty vec for
    /// anything that is not a trade: fee-only activity, transfers of denied
    /// assets, stale transactions, or records missing the needed metadata.
    pub fn classify(
        &self,
        wallet: &Wallet,
        tx: &ParsedTransaction,
        now: DateTime<Utc>,
    ) -> Vec<ClassifiedEvent> {
        let Some(block_time) = tx.block_time else {
            return Vec::new();
        };
        let Some(occurred_at) = DateTime::<Utc>::from_timestamp(block_time, 0) else {
            return Vec::new();
        };

        // Too old to matter for any detection window; discard before storing
        let age = now.signed_duration_since(occurred_at);
        if age.num_seconds() > self.max_lookback_secs {
            debug!("Discarding stale transaction for {} ({}s old)", wallet.name, age.num_seconds());
            return Vec::new();
        }

        let Some(meta) = tx.meta.as_ref() else {
            return Vec::new();
        };

        let sol_delta = match tx.account_index(&wallet.address) {
            Some(idx) if idx < meta.pre_balances.len() && idx < meta.post_balances.len() => {
                (meta.post_balances[idx] as i64 - meta.pre_balances[idx] as i64) as f64
                    / LAMPORTS_PER_SOL
            }
            _ => return Vec::new(),
        };

        if sol_delta.abs() <= self.noise_threshold_sol {
            return Vec::new();
        }

        let changes = self.asset_deltas(wallet, meta);

        let side = if sol_delta < 0.0 { Side::Buy } else { Side::Sell };
        let mut events = Vec::new();
        for (mint, change) in changes {
            let qualifies = match side {
                Side::Buy => change > 0.0,
                Side::Sell => change < 0.0,
            };
            if !qualifies || DENY_LIST.contains(&mint.as_str()) {
                continue;
            }
            events.push(ClassifiedEvent {
                asset: mint,
                wallet: wallet.address.clone(),
                wallet_name: wallet.name.clone(),
                side,
                sol_amount: sol_delta.abs(),
                occurred_at,
                cap_snapshot: None,
            });
        }
        events
    }

    /// Per-mint balance deltas restricted to entries owned by the wallet:
    /// post amounts added, pre amounts subtracted.
    fn asset_deltas(&self, wallet: &Wallet, meta: &crate::rpc::types::TxMeta) -> HashMap<String, f64> {
        let mut changes: HashMap<String, f64> = HashMap::new();
        for entry in meta.pre_token_balances.iter().flatten() {
            if entry.owner.as_deref() == Some(wallet.address.as_str()) {
                *changes.entry(entry.mint.clone()).or_default() -=
                    entry.ui_token_amount.ui_value();
            }
        }
        for entry in meta.post_token_balances.iter().flatten() {
            if entry.owner.as_deref() == Some(wallet.address.as_str()) {
                *changes.entry(entry.mint.clone()).or_default() +=
                    entry.ui_token_amount.ui_value();
            }
        }
        changes
    }
}
