use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A wallet under observation. The address is treated as an opaque base58
/// identifier; nothing in the core ever signs or derives from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Base58 wallet address
    pub address: String,

    /// Human-readable label shown in alerts
    pub name: String,

    /// Whether the polling loop should include this wallet
    pub tracked: bool,
}

impl Wallet {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            tracked: true,
        }
    }

    /// Shortened form for alert output, e.g. `AbCd...WxYz`
    pub fn short_address(&self) -> String {
        short_address(&self.address)
    }
}

/// Direction of a classified event relative to the wallet's SOL balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// SOL left the wallet, a token balance rose
    Buy,
    /// SOL entered the wallet, a token balance fell
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// A single wallet's buy or sell of one token, produced by the classifier
/// and stored by the event store. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// Token mint address
    pub asset: String,

    /// Wallet that moved
    pub wallet: String,

    /// Display name of the wallet at classification time
    pub wallet_name: String,

    pub side: Side,

    /// SOL moved, absolute value
    pub sol_amount: f64,

    /// Block time of the transaction
    pub occurred_at: DateTime<Utc>,

    /// Market cap at classification time, if the oracle had one
    pub cap_snapshot: Option<f64>,
}

impl ClassifiedEvent {
    /// Whether this event falls within `[now - window, now]`. Inclusive on
    /// both ends; events timestamped after `now` do not count.
    pub fn is_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let age = now.signed_duration_since(self.occurred_at).num_seconds();
        (0..=window.as_secs() as i64).contains(&age)
    }
}

/// Token metadata returned by the price/market-cap oracle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenInfo {
    pub market_cap: f64,
    pub symbol: String,
    pub address: String,
    pub pair_address: Option<String>,
}

impl TokenInfo {
    /// Dexscreener link, preferring the pair address when known
    pub fn dexscreener_url(&self) -> String {
        let addr = self
            .pair_address
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.address);
        format!("https://dexscreener.com/solana/{}", addr)
    }
}

/// Shorten a base58 address for display.
pub fn short_address(address: &str) -> String {
    if address.len() > 8 {
        format!("{}...{}", &address[..4], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}
