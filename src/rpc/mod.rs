pub mod fetcher;
pub mod types;

pub use fetcher::{RpcFetcher, RpcRequest};
pub use types::{ParsedTransaction, SignatureEntry};
