use crate::config::NotifyConfig;
use crate::error::TrackerResult;
use crate::types::{ClassifiedEvent, Side, TokenInfo, short_address};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Early cap-gate-exempt signal at the lower threshold
    PreAlert,
    /// First time a window meets the main threshold for a side
    Initial,
    /// New wallets joined after the initial alert
    Update,
}

/// A rendered-on-demand notification emitted by the correlation engine.
/// Delivery is fire-and-forget; the engine never waits on it.
#[derive(Debug, Clone)]
pub struct Alert {
    pub session: String,
    pub kind: AlertKind,
    pub side: Side,
    pub token: TokenInfo,
    /// The detection window that fired; updates carry no window
    pub window: Option<Duration>,
    pub participants: Vec<ClassifiedEvent>,
}

impl Alert {
    pub fn title(&self) -> String {
        match (self.kind, self.side) {
            (AlertKind::PreAlert, Side::Buy) => "⚡ Buy Pre-Alert".to_string(),
            (AlertKind::PreAlert, Side::Sell) => "⚡ Sell Pre-Alert".to_string(),
            (AlertKind::Initial, Side::Buy) => "🔥 Multi-Buy Alert 🔥".to_string(),
            (AlertKind::Initial, Side::Sell) => "🚨 Multi-Sell Alert 🚨".to_string(),
            (AlertKind::Update, Side::Buy) => "📈 Multibuy Update 📈".to_string(),
            (AlertKind::Update, Side::Sell) => "📉 Multisell Update 📉".to_string(),
        }
    }

    pub fn dedupe_key(&self) -> String {
        format!("{}|{}|{}", self.session, self.title(), self.token.address)
    }

    /// Plain-text body: window, type, token, links, market cap, per-window
    /// cap stats, then the participant list.
    pub fn render(&self) -> String {
        let mut lines = vec![self.title()];

        if let Some(window) = self.window {
            lines.push(format!("⏱ Window: {}", format_window_label(window)));
        }
        lines.push(format!(
            "🔖 Type: {}",
            match self.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            }
        ));
        lines.push(format!(
            "Token: ${} {}",
            self.token.symbol, self.token.address
        ));
        lines.push(format!("🔗 {}", self.token.dexscreener_url()));
        lines.push(format!(
            "💰 Market Cap: {}",
            format_usd(self.token.market_cap)
        ));

        if let Some(stats) = cap_stats(&self.participants) {
            let label = match self.side {
                Side::Buy => "Entry caps",
                Side::Sell => "Exit caps",
            };
            lines.push(format!(
                "📊 {}: min {} · avg {} · max {}",
                label,
                format_usd(stats.0),
                format_usd(stats.1),
                format_usd(stats.2)
            ));
        }

        let participant_label = match self.side {
            Side::Buy => "Buyers",
            Side::Sell => "Sellers",
        };
        lines.push(format!("👛 {}:", participant_label));
        for p in &self.participants {
            lines.push(format!(
                "– {} ({}): {:.2} SOL",
                p.wallet_name,
                short_address(&p.wallet),
                p.sol_amount
            ));
        }

        lines.join("\n")
    }
}

/// `≤45s`, `≤5m`, `≤2m30s`
pub fn format_window_label(window: Duration) -> String {
    let secs = window.as_secs();
    if secs < 60 {
        return format!("≤{}s", secs);
    }
    let (m, s) = (secs / 60, secs % 60);
    if s == 0 {
        format!("≤{}m", m)
    } else {
        format!("≤{}m{}s", m, s)
    }
}

fn format_usd(value: f64) -> String {
    let whole = value.max(0.0).round() as u64;
    let digits = whole.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    format!("${}", out)
}

/// (min, avg, max) over the participants' cap snapshots, ignoring absent ones.
fn cap_stats(participants: &[ClassifiedEvent]) -> Option<(f64, f64, f64)> {
    let caps: Vec<f64> = participants
        .iter()
        .filter_map(|p| p.cap_snapshot)
        .filter(|c| *c > 0.0)
        .collect();
    if caps.is_empty() {
        return None;
    }
    let min = caps.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = caps.iter().cloned().fold(0.0_f64, f64::max);
    let avg = caps.iter().sum::<f64>() / caps.len() as f64;
    Some((min, avg, max))
}

/// Consumes the alert channel: logs every alert and, when a webhook is
/// configured, forwards it best-effort with a TTL dedupe so restarts or
/// overlapping sessions do not spam the same alert.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    dedupe_ttl: Duration,
    dedupe: HashMap<String, Instant>,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
            dedupe_ttl: config.dedupe_ttl,
            dedupe: HashMap::new(),
        })
    }

    pub async fn run(mut self, mut alerts: mpsc::UnboundedReceiver<Alert>) {
        while let Some(alert) = alerts.recv().await {
            let text = alert.render();
            info!("[{}] {}", alert.session, text.replace('\n', " | "));

            if self.webhook_url.is_none() {
                continue;
            }
            if !self.should_send(&alert.dedupe_key()) {
                continue;
            }
            if let Err(e) = self.post(&alert, &text).await {
                error!("Webhook delivery failed: {}", e);
            }
        }
        info!("Alert channel closed, notifier exiting");
    }

    /// TTL dedupe; also prunes expired entries so the map stays small.
    fn should_send(&mut self, key: &str) -> bool {
        let ttl = self.dedupe_ttl;
        self.dedupe.retain(|_, at| at.elapsed() < ttl);
        if self.dedupe.contains_key(key) {
            return false;
        }
        self.dedupe.insert(key.to_string(), Instant::now());
        true
    }

    async fn post(&self, alert: &Alert, text: &str) -> TrackerResult<()> {
        let url = self.webhook_url.as_deref().unwrap_or_default();
        let color = match alert.side {
            Side::Buy => 0x00C853,
            Side::Sell => 0xD50000,
        };
        let description: String = text
            .lines()
            .skip(1)
            .collect::<Vec<_>>()
            .join("\n")
            .chars()
            .take(4000)
            .collect();
        let payload = json!({
            "embeds": [{
                "title": alert.title(),
                "description": description,
                "color": color,
                "url": alert.token.dexscreener_url(),
            }]
        });

        let response = self.client.post(url).json(&payload).send().await?;
        if response.status().as_u16() >= 400 {
            // Some webhook targets reject embeds; fall back to plain content
            warn!(
                "Webhook rejected embed ({}), retrying as content",
                response.status()
            );
            self.client
                .post(url)
                .json(&json!({ "content": text }))
                .send()
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn participant(name: &str, cap: Option<f64>) -> ClassifiedEvent {
        ClassifiedEvent {
            asset: "mintX".to_string(),
            wallet: "DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK".to_string(),
            wallet_name: name.to_string(),
            side: Side::Buy,
            sol_amount: 1.5,
            occurred_at: Utc::now(),
            cap_snapshot: cap,
        }
    }

    fn alert(kind: AlertKind) -> Alert {
        Alert {
            session: "default".to_string(),
            kind,
            side: Side::Buy,
            token: TokenInfo {
                market_cap: 123_456.0,
                symbol: "TOK".to_string(),
                address: "mintX".to_string(),
                pair_address: None,
            },
            window: Some(Duration::from_secs(300)),
            participants: vec![participant("alice", Some(100_000.0))],
        }
    }

    #[test]
    fn test_window_labels() {
        assert_eq!(format_window_label(Duration::from_secs(45)), "≤45s");
        assert_eq!(format_window_label(Duration::from_secs(300)), "≤5m");
        assert_eq!(format_window_label(Duration::from_secs(150)), "≤2m30s");
    }

    #[test]
    fn test_usd_grouping() {
        assert_eq!(format_usd(0.0), "$0");
        assert_eq!(format_usd(75_000.0), "$75,000");
        assert_eq!(format_usd(1_234_567.4), "$1,234,567");
    }

    #[test]
    fn test_render_lists_participants() {
        let rendered = alert(AlertKind::Initial).render();
        assert!(rendered.contains("Multi-Buy Alert"));
        assert!(rendered.contains("≤5m"));
        assert!(rendered.contains("$TOK"));
        assert!(rendered.contains("alice (DYw8...NSKK): 1.50 SOL"));
        assert!(rendered.contains("Market Cap: $123,456"));
    }

    #[test]
    fn test_cap_stats_skip_absent_snapshots() {
        let participants = vec![
            participant("a", Some(50_000.0)),
            participant("b", None),
            participant("c", Some(150_000.0)),
        ];
        let (min, avg, max) = cap_stats(&participants).unwrap();
        assert_eq!(min, 50_000.0);
        assert_eq!(avg, 100_000.0);
        assert_eq!(max, 150_000.0);

        assert!(cap_stats(&[participant("a", None)]).is_none());
    }

    #[test]
    fn test_dedupe_suppresses_repeat_within_ttl() {
        let mut notifier = WebhookNotifier {
            client: reqwest::Client::new(),
            webhook_url: Some("https://example.com/hook".to_string()),
            dedupe_ttl: Duration::from_secs(60),
            dedupe: HashMap::new(),
        };
        let key = alert(AlertKind::Initial).dedupe_key();
        assert!(notifier.should_send(&key));
        assert!(!notifier.should_send(&key));
        // Different alert kinds have distinct keys
        assert!(notifier.should_send(&alert(AlertKind::Update).dedupe_key()));
    }
}
