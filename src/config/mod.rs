use crate::error::{TrackerError, TrackerResult};
use crate::types::Wallet;
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
struct RawConfig {
    rpc: RawRpcConfig,
    tracker: Option<RawTrackerSection>,
    detection: Option<RawDetectionConfig>,
    oracle: Option<RawOracleConfig>,
    notify: Option<RawNotifyConfig>,
    wallets: Option<Vec<RawWallet>>,
}

#[derive(Debug, Deserialize)]
struct RawRpcConfig {
    endpoint: String,
    concurrency: Option<usize>,
    pace_delay_ms: Option<u64>,
    pace_jitter_ms: Option<u64>,
    throttle_cooldown_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawTrackerSection {
    poll_interval_secs: Option<u64>,
    monitor_interval_secs: Option<u64>,
    wallet_concurrency: Option<usize>,
    wallet_spacing_ms: Option<u64>,
    signature_limit: Option<usize>,
    backfill_on_start: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawDetectionConfig {
    windows: Option<Vec<String>>,
    threshold: Option<usize>,
    prealert_enabled: Option<bool>,
    prealert_threshold: Option<usize>,
    updates_enabled: Option<bool>,
    min_market_cap: Option<f64>,
    max_market_cap: Option<f64>,
    max_lookback_minutes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawOracleConfig {
    ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawNotifyConfig {
    webhook_url: Option<String>,
    dedupe_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawWallet {
    address: String,
    name: Option<String>,
    tracked: Option<bool>,
}

/// Fetcher pacing and admission settings.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub endpoint: String,
    pub concurrency: usize,
    pub pace_delay: Duration,
    pub pace_jitter: Duration,
    pub throttle_cooldown: Duration,
    pub request_timeout: Duration,
}

/// Polling and monitor loop settings.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub poll_interval: Duration,
    pub monitor_interval: Duration,
    pub wallet_concurrency: usize,
    pub wallet_spacing: Duration,
    pub signature_limit: usize,
    pub backfill_on_start: usize,
}

/// Correlation thresholds and windows. Windows are ascending and deduplicated.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub windows: Vec<Duration>,
    pub threshold: usize,
    pub prealert_enabled: bool,
    pub prealert_threshold: usize,
    pub updates_enabled: bool,
    pub min_market_cap: f64,
    pub max_market_cap: Option<f64>,
    pub max_lookback: Duration,
}

impl DetectionConfig {
    /// Market-cap band check applied to initial and update alerts.
    pub fn cap_ok(&self, market_cap: f64) -> bool {
        if market_cap < self.min_market_cap {
            return false;
        }
        if let Some(max) = self.max_market_cap {
            if market_cap > max {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub dedupe_ttl: Duration,
}

/// Fully validated application configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub rpc: RpcConfig,
    pub poll: PollConfig,
    pub detection: DetectionConfig,
    pub oracle: OracleConfig,
    pub notify: NotifyConfig,
    pub wallets: Vec<Wallet>,
}

/// Parse a detection window spec: `"90s"`, `"5m"`, or a bare number meaning
/// minutes (backward-compatible with the env-style configuration).
pub fn parse_window(spec: &str) -> TrackerResult<Duration> {
    let s = spec.trim().to_lowercase();
    let (digits, scale) = if let Some(rest) = s.strip_suffix('s') {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60u64)
    } else {
        (s.as_str(), 60u64)
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| TrackerError::Config(format!("Invalid window spec: {}", spec)))?;
    Ok(Duration::from_secs(n.max(1) * scale))
}

fn parse_windows(specs: &[String]) -> TrackerResult<Vec<Duration>> {
    let mut windows = Vec::new();
    for spec in specs {
        windows.push(parse_window(spec)?);
    }
    windows.sort();
    windows.dedup();
    if windows.is_empty() {
        return Err(TrackerError::Config(
            "At least one detection window is required".to_string(),
        ));
    }
    Ok(windows)
}

fn validate_address(address: &str) -> TrackerResult<()> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| TrackerError::Config(format!("Invalid wallet address {}: {}", address, e)))?;
    if bytes.len() != 32 {
        return Err(TrackerError::Config(format!(
            "Invalid wallet address {}: expected 32 bytes, got {}",
            address,
            bytes.len()
        )));
    }
    Ok(())
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> TrackerResult<TrackerConfig> {
    info!("Loading configuration from {:?}", path.as_ref());

    let config = Config::builder()
        .add_source(File::from(path.as_ref()))
        .build()
        .map_err(|e| TrackerError::Config(format!("Failed to load config: {}", e)))?;

    let raw: RawConfig = config
        .try_deserialize()
        .map_err(|e| TrackerError::Config(format!("Failed to parse config: {}", e)))?;

    resolve(raw)
}

fn resolve(raw: RawConfig) -> TrackerResult<TrackerConfig> {
    url::Url::parse(&raw.rpc.endpoint)
        .map_err(|e| TrackerError::Config(format!("Invalid RPC endpoint: {}", e)))?;
    if !raw.rpc.endpoint.starts_with("http://") && !raw.rpc.endpoint.starts_with("https://") {
        return Err(TrackerError::Config(
            "RPC endpoint must start with http:// or https://".to_string(),
        ));
    }

    let rpc = RpcConfig {
        endpoint: raw.rpc.endpoint,
        concurrency: raw.rpc.concurrency.unwrap_or(2).max(1),
        pace_delay: Duration::from_millis(raw.rpc.pace_delay_ms.unwrap_or(600)),
        pace_jitter: Duration::from_millis(raw.rpc.pace_jitter_ms.unwrap_or(200)),
        throttle_cooldown: Duration::from_secs(raw.rpc.throttle_cooldown_secs.unwrap_or(5)),
        request_timeout: Duration::from_secs(raw.rpc.request_timeout_secs.unwrap_or(30)),
    };

    let tracker = raw.tracker.unwrap_or(RawTrackerSection {
        poll_interval_secs: None,
        monitor_interval_secs: None,
        wallet_concurrency: None,
        wallet_spacing_ms: None,
        signature_limit: None,
        backfill_on_start: None,
    });
    let poll = PollConfig {
        poll_interval: Duration::from_secs(tracker.poll_interval_secs.unwrap_or(10).max(1)),
        monitor_interval: Duration::from_secs(tracker.monitor_interval_secs.unwrap_or(5).max(1)),
        wallet_concurrency: tracker.wallet_concurrency.unwrap_or(6).max(1),
        wallet_spacing: Duration::from_millis(tracker.wallet_spacing_ms.unwrap_or(100)),
        signature_limit: tracker.signature_limit.unwrap_or(10).clamp(1, 1000),
        backfill_on_start: tracker.backfill_on_start.unwrap_or(0),
    };

    let det = raw.detection.unwrap_or(RawDetectionConfig {
        windows: None,
        threshold: None,
        prealert_enabled: None,
        prealert_threshold: None,
        updates_enabled: None,
        min_market_cap: None,
        max_market_cap: None,
        max_lookback_minutes: None,
    });
    let default_windows: Vec<String> = ["1", "5", "10", "30", "60"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let windows = parse_windows(&det.windows.unwrap_or(default_windows))?;

    let threshold = det.threshold.unwrap_or(3);
    if threshold < 2 {
        return Err(TrackerError::Config(
            "Detection threshold must be at least 2".to_string(),
        ));
    }
    let prealert_threshold = det.prealert_threshold.unwrap_or(2);
    if prealert_threshold >= threshold {
        return Err(TrackerError::Config(format!(
            "Pre-alert threshold ({}) must be strictly below the main threshold ({})",
            prealert_threshold, threshold
        )));
    }

    // Lookback defaults to the largest window, floored at 6 hours
    let largest_window_min = windows.last().map(|w| w.as_secs().div_ceil(60)).unwrap_or(0);
    let lookback_min = det
        .max_lookback_minutes
        .unwrap_or_else(|| largest_window_min.max(360));
    let max_lookback = Duration::from_secs(lookback_min.max(largest_window_min) * 60);

    let detection = DetectionConfig {
        windows,
        threshold,
        prealert_enabled: det.prealert_enabled.unwrap_or(true),
        prealert_threshold,
        updates_enabled: det.updates_enabled.unwrap_or(true),
        min_market_cap: det.min_market_cap.unwrap_or(75_000.0),
        max_market_cap: det.max_market_cap,
        max_lookback,
    };

    let oracle = OracleConfig {
        ttl: Duration::from_secs(raw.oracle.and_then(|o| o.ttl_secs).unwrap_or(60)),
    };

    let notify_raw = raw.notify.unwrap_or(RawNotifyConfig {
        webhook_url: None,
        dedupe_ttl_secs: None,
    });
    if let Some(url) = notify_raw.webhook_url.as_deref() {
        url::Url::parse(url)
            .map_err(|e| TrackerError::Config(format!("Invalid webhook URL: {}", e)))?;
    }
    let notify = NotifyConfig {
        webhook_url: notify_raw.webhook_url,
        dedupe_ttl: Duration::from_secs(notify_raw.dedupe_ttl_secs.unwrap_or(60)),
    };

    let mut wallets = Vec::new();
    for w in raw.wallets.unwrap_or_default() {
        validate_address(&w.address)?;
        wallets.push(Wallet {
            name: w.name.unwrap_or_else(|| crate::types::short_address(&w.address)),
            address: w.address,
            tracked: w.tracked.unwrap_or(true),
        });
    }

    info!(
        "Configuration loaded: {} wallets, windows {:?}, threshold {}",
        wallets.len(),
        detection.windows,
        detection.threshold
    );

    Ok(TrackerConfig {
        rpc,
        poll,
        detection,
        oracle,
        notify,
        wallets,
    })
}

/// Create a default configuration file
pub fn create_default_config<P: AsRef<Path>>(path: P) -> TrackerResult<()> {
    let default_config = r#"[rpc]
# JSON-RPC endpoint for the upstream chain data source
endpoint = "https://api.mainnet-beta.solana.com"

# Global in-flight request ceiling shared by all sessions
concurrency = 2

# Pacing after each call, plus bounded random jitter
pace_delay_ms = 600
pace_jitter_ms = 200

# How long to back off after a 429
throttle_cooldown_secs = 5

request_timeout_secs = 30

[tracker]
poll_interval_secs = 10
monitor_interval_secs = 5
wallet_concurrency = 6
wallet_spacing_ms = 100
signature_limit = 10

# Newest N signatures treated as new on first poll (0 = baseline only)
backfill_on_start = 0

[detection]
# Detection windows: "90s", "5m", or bare numbers meaning minutes
windows = ["1", "5", "10", "30", "60"]
threshold = 3
prealert_enabled = true
prealert_threshold = 2
updates_enabled = true
min_market_cap = 75000.0
# max_market_cap = 5000000.0
# max_lookback_minutes = 360

[oracle]
ttl_secs = 60

[notify]
# webhook_url = "https://discord.com/api/webhooks/..."
dedupe_ttl_secs = 60

# [[wallets]]
# address = "YOUR_WALLET_ADDRESS_HERE"
# name = "trader-1"
# tracked = true
"#;

    std::fs::write(path.as_ref(), default_config)
        .map_err(|e| TrackerError::Config(format!("Failed to write config file: {}", e)))?;

    info!("Created default config file at {:?}", path.as_ref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_detection(det: RawDetectionConfig) -> RawConfig {
        RawConfig {
            rpc: RawRpcConfig {
                endpoint: "https://api.mainnet-beta.solana.com".to_string(),
                concurrency: None,
                pace_delay_ms: None,
                pace_jitter_ms: None,
                throttle_cooldown_secs: None,
                request_timeout_secs: None,
            },
            tracker: None,
            detection: Some(det),
            oracle: None,
            notify: None,
            wallets: None,
        }
    }

    #[test]
    fn test_parse_window_suffixes() {
        assert_eq!(parse_window("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_window("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_window("1").unwrap(), Duration::from_secs(60));
        assert!(parse_window("abc").is_err());
    }

    #[test]
    fn test_windows_sorted_and_deduped() {
        let specs = vec!["10".to_string(), "60s".to_string(), "1".to_string()];
        let windows = parse_windows(&specs).unwrap();
        assert_eq!(
            windows,
            vec![Duration::from_secs(60), Duration::from_secs(600)]
        );
    }

    #[test]
    fn test_prealert_must_be_below_threshold() {
        let raw = raw_with_detection(RawDetectionConfig {
            windows: None,
            threshold: Some(3),
            prealert_enabled: None,
            prealert_threshold: Some(3),
            updates_enabled: None,
            min_market_cap: None,
            max_market_cap: None,
            max_lookback_minutes: None,
        });
        assert!(resolve(raw).is_err());
    }

    #[test]
    fn test_lookback_covers_largest_window() {
        let raw = raw_with_detection(RawDetectionConfig {
            windows: Some(vec!["720".to_string()]),
            threshold: None,
            prealert_enabled: None,
            prealert_threshold: None,
            updates_enabled: None,
            min_market_cap: None,
            max_market_cap: None,
            max_lookback_minutes: Some(60),
        });
        let cfg = resolve(raw).unwrap();
        // Sweeping must never outrun the largest detection window
        assert!(cfg.detection.max_lookback >= Duration::from_secs(720 * 60));
    }

    #[test]
    fn test_cap_band() {
        let det = DetectionConfig {
            windows: vec![Duration::from_secs(60)],
            threshold: 3,
            prealert_enabled: true,
            prealert_threshold: 2,
            updates_enabled: true,
            min_market_cap: 75_000.0,
            max_market_cap: Some(1_000_000.0),
            max_lookback: Duration::from_secs(3600),
        };
        assert!(!det.cap_ok(0.0));
        assert!(!det.cap_ok(50_000.0));
        assert!(det.cap_ok(100_000.0));
        assert!(!det.cap_ok(2_000_000.0));
    }

    #[test]
    fn test_invalid_wallet_address_rejected() {
        assert!(validate_address("not-base58!").is_err());
        assert!(validate_address("abc").is_err());
        assert!(validate_address("11111111111111111111111111111111").is_ok());
    }
}
