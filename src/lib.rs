pub mod classify;
pub mod config;
pub mod correlate;
pub mod cursor;
pub mod error;
pub mod notify;
pub mod oracle;
pub mod rpc;
pub mod store;
pub mod tracker;
pub mod types;

pub use config::{TrackerConfig, create_default_config, load_config};
pub use correlate::CorrelationEngine;
pub use error::{TrackerError, TrackerResult};
pub use notify::{Alert, AlertKind, WebhookNotifier};
pub use oracle::{AssetInfoSource, DexScreenerOracle};
pub use rpc::RpcFetcher;
pub use store::EventStore;
pub use tracker::{ConfigWalletDirectory, TrackerSupervisor, WalletDirectory};
pub use types::{ClassifiedEvent, Side, TokenInfo, Wallet};
