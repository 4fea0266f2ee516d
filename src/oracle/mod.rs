use crate::error::TrackerResult;
use crate::rpc::RpcFetcher;
use crate::types::TokenInfo;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Price/market-cap lookup capability. Failures degrade to `None`, which the
/// cap gate treats as "unknown, fails the band check"; nothing downstream
/// may crash because a price provider is down.
pub trait AssetInfoSource: Send + Sync + 'static {
    fn asset_info(&self, asset: &str) -> impl Future<Output = Option<TokenInfo>> + Send;
}

#[derive(Debug, Deserialize)]
struct DexResponse {
    pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexPair {
    base_token: Option<DexBaseToken>,
    pair_address: Option<String>,
    market_cap: Option<f64>,
    fdv: Option<f64>,
    price_usd: Option<String>,
    liquidity: Option<DexLiquidity>,
}

#[derive(Debug, Deserialize)]
struct DexBaseToken {
    symbol: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DexLiquidity {
    usd: Option<f64>,
}

impl DexPair {
    /// Deepest pools first; fdv breaks ties between equally shallow listings.
    fn score(&self) -> (f64, f64) {
        let liq = self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
        let fdv = self.fdv.unwrap_or(0.0);
        (liq, fdv)
    }
}

fn pick_best_pair(mut pairs: Vec<DexPair>) -> Option<DexPair> {
    pairs.sort_by(|a, b| {
        let (al, af) = a.score();
        let (bl, bf) = b.score();
        bl.total_cmp(&al).then(bf.total_cmp(&af))
    });
    pairs.into_iter().next()
}

/// Dexscreener-backed oracle with a TTL cache and a fallback chain:
/// Dexscreener market cap, then fdv, then price x supply, then Jupiter
/// price x supply. Zero caps are never cached so a token that lists later
/// is not stuck invisible for a TTL.
pub struct DexScreenerOracle {
    client: reqwest::Client,
    fetcher: Arc<RpcFetcher>,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, TokenInfo)>>,
}

impl DexScreenerOracle {
    pub fn new(fetcher: Arc<RpcFetcher>, ttl: Duration) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("multibuy/0.1")
            .build()?;
        Ok(Self {
            client,
            fetcher,
            ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, asset: &str) -> Option<TokenInfo> {
        let cache = self.cache.lock().unwrap();
        cache.get(asset).and_then(|(at, info)| {
            (at.elapsed() < self.ttl && info.market_cap > 0.0).then(|| info.clone())
        })
    }

    fn store(&self, asset: &str, info: &TokenInfo) {
        if info.market_cap > 0.0 {
            self.cache
                .lock()
                .unwrap()
                .insert(asset.to_string(), (Instant::now(), info.clone()));
        }
    }

    async fn fetch_dex(&self, url: &str) -> Option<DexResponse> {
        let response = self.client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            debug!("Dexscreener {} -> {}", url, response.status());
            return None;
        }
        response.json::<DexResponse>().await.ok()
    }

    async fn jupiter_price(&self, mint: &str) -> f64 {
        let url = format!("https://price.jup.ag/v4/price?ids={}", mint);
        let Some(response) = self.client.get(&url).send().await.ok() else {
            return 0.0;
        };
        if !response.status().is_success() {
            return 0.0;
        }
        let Ok(body) = response.json::<serde_json::Value>().await else {
            return 0.0;
        };
        body.get("data")
            .and_then(|d| d.get(mint))
            .and_then(|t| t.get("price"))
            .and_then(|p| p.as_f64())
            .unwrap_or(0.0)
    }

    async fn lookup(&self, asset: &str) -> Option<TokenInfo> {
        // Provider chain: tokens endpoint, chain-qualified tokens, pairs
        let urls = [
            format!("https://api.dexscreener.com/latest/dex/tokens/{}", asset),
            format!(
                "https://api.dexscreener.com/latest/dex/tokens/solana/{}",
                asset
            ),
            format!(
                "https://api.dexscreener.com/latest/dex/pairs/solana/{}",
                asset
            ),
        ];

        let mut best = None;
        for url in &urls {
            if let Some(response) = self.fetch_dex(url).await {
                if let Some(pair) = pick_best_pair(response.pairs.unwrap_or_default()) {
                    best = Some(pair);
                    break;
                }
            }
        }

        let mut info = TokenInfo {
            market_cap: 0.0,
            symbol: "N/A".to_string(),
            address: asset.to_string(),
            pair_address: None,
        };
        let mut price_usd = 0.0;

        if let Some(pair) = best {
            if let Some(base) = pair.base_token.as_ref() {
                if let Some(symbol) = base.symbol.clone() {
                    info.symbol = symbol;
                }
                if let Some(address) = base.address.clone() {
                    info.address = address;
                }
            }
            info.pair_address = pair.pair_address.clone();
            price_usd = pair
                .price_usd
                .as_deref()
                .and_then(|p| p.parse().ok())
                .unwrap_or(0.0);
            info.market_cap = pair.market_cap.unwrap_or(0.0);
            if info.market_cap <= 0.0 {
                info.market_cap = pair.fdv.unwrap_or(0.0);
            }
        }

        // No listed cap: derive from price times supply, trying Jupiter as a
        // final price source
        if info.market_cap <= 0.0 {
            if price_usd <= 0.0 {
                price_usd = self.jupiter_price(&info.address).await;
            }
            if price_usd > 0.0 {
                let supply = self
                    .fetcher
                    .token_supply(&info.address)
                    .await
                    .unwrap_or(0.0);
                if supply > 0.0 {
                    info.market_cap = price_usd * supply;
                    debug!(
                        "Derived market cap for {}: price {} x supply {}",
                        asset, price_usd, supply
                    );
                }
            }
        }

        Some(info)
    }
}

impl AssetInfoSource for DexScreenerOracle {
    async fn asset_info(&self, asset: &str) -> Option<TokenInfo> {
        if let Some(info) = self.cached(asset) {
            return Some(info);
        }
        let info = self.lookup(asset).await?;
        self.store(asset, &info);
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(liq: f64, fdv: f64, symbol: &str) -> DexPair {
        DexPair {
            base_token: Some(DexBaseToken {
                symbol: Some(symbol.to_string()),
                address: Some("mint".to_string()),
            }),
            pair_address: None,
            market_cap: None,
            fdv: Some(fdv),
            price_usd: None,
            liquidity: Some(DexLiquidity { usd: Some(liq) }),
        }
    }

    #[test]
    fn test_best_pair_prefers_liquidity_then_fdv() {
        let best = pick_best_pair(vec![
            pair(100.0, 1_000_000.0, "shallow"),
            pair(50_000.0, 10.0, "deep"),
        ])
        .unwrap();
        assert_eq!(best.base_token.unwrap().symbol.unwrap(), "deep");

        let best = pick_best_pair(vec![
            pair(100.0, 10.0, "small-fdv"),
            pair(100.0, 99.0, "big-fdv"),
        ])
        .unwrap();
        assert_eq!(best.base_token.unwrap().symbol.unwrap(), "big-fdv");
    }

    #[test]
    fn test_empty_pairs_yield_none() {
        assert!(pick_best_pair(Vec::new()).is_none());
    }
}
