use serde::Deserialize;
use serde_json::Value;

/// One entry from `getSignaturesForAddress` (newest first).
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureEntry {
    pub signature: String,

    #[serde(rename = "blockTime")]
    pub block_time: Option<i64>,

    /// Present when the transaction failed on-chain
    #[serde(default)]
    pub err: Option<Value>,
}

/// Subset of the jsonParsed `getTransaction` envelope the classifier needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTransaction {
    pub block_time: Option<i64>,
    pub meta: Option<TxMeta>,
    pub transaction: TxEnvelope,
}

impl ParsedTransaction {
    /// Index of an address within the transaction's account keys, used to
    /// read its lamport pre/post balances.
    pub fn account_index(&self, address: &str) -> Option<usize> {
        self.transaction
            .message
            .account_keys
            .iter()
            .position(|k| k.pubkey() == address)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxEnvelope {
    pub message: TxMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxMessage {
    #[serde(rename = "accountKeys", default)]
    pub account_keys: Vec<AccountKey>,
}

/// Account keys arrive either as plain strings or as parsed objects,
/// depending on the encoding the node answered with.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AccountKey {
    Parsed { pubkey: String },
    Plain(String),
}

impl AccountKey {
    pub fn pubkey(&self) -> &str {
        match self {
            AccountKey::Parsed { pubkey } => pubkey,
            AccountKey::Plain(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxMeta {
    /// Lamport balances per account key, before the transaction
    #[serde(default)]
    pub pre_balances: Vec<u64>,

    /// Lamport balances per account key, after the transaction
    #[serde(default)]
    pub post_balances: Vec<u64>,

    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalanceEntry>>,

    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalanceEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceEntry {
    pub mint: String,

    #[serde(default)]
    pub owner: Option<String>,

    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    #[serde(default)]
    pub ui_amount: Option<f64>,

    #[serde(default)]
    pub ui_amount_string: Option<String>,

    pub amount: String,

    pub decimals: u8,
}

impl UiTokenAmount {
    /// Human-scale token amount. Prefers the string form (full precision),
    /// then the float, then the raw amount scaled by decimals.
    pub fn ui_value(&self) -> f64 {
        if let Some(s) = &self.ui_amount_string {
            if let Ok(v) = s.parse::<f64>() {
                return v;
            }
        }
        if let Some(v) = self.ui_amount {
            return v;
        }
        match self.amount.parse::<f64>() {
            Ok(raw) => raw / 10_f64.powi(self.decimals as i32),
            Err(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_jsonparsed_transaction() {
        let value = json!({
            "blockTime": 1_700_000_000,
            "meta": {
                "preBalances": [5_000_000_000u64, 0],
                "postBalances": [3_000_000_000u64, 0],
                "preTokenBalances": [],
                "postTokenBalances": [{
                    "mint": "MintAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
                    "owner": "WalletAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
                    "uiTokenAmount": {
                        "uiAmount": 12.5,
                        "uiAmountString": "12.5",
                        "amount": "12500000",
                        "decimals": 6
                    }
                }]
            },
            "transaction": {
                "message": {
                    "accountKeys": [
                        {"pubkey": "WalletAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"},
                        "SomeOtherKey"
                    ]
                }
            }
        });

        let tx: ParsedTransaction = serde_json::from_value(value).unwrap();
        assert_eq!(tx.block_time, Some(1_700_000_000));
        assert_eq!(
            tx.account_index("WalletAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            Some(0)
        );
        assert_eq!(tx.account_index("SomeOtherKey"), Some(1));
        assert_eq!(tx.account_index("missing"), None);

        let meta = tx.meta.unwrap();
        let post = meta.post_token_balances.unwrap();
        assert_eq!(post[0].ui_token_amount.ui_value(), 12.5);
    }

    #[test]
    fn test_ui_value_preference_order() {
        let amt = UiTokenAmount {
            ui_amount: Some(1.0),
            ui_amount_string: Some("2.5".to_string()),
            amount: "999".to_string(),
            decimals: 0,
        };
        assert_eq!(amt.ui_value(), 2.5);

        let amt = UiTokenAmount {
            ui_amount: None,
            ui_amount_string: None,
            amount: "12500000".to_string(),
            decimals: 6,
        };
        assert!((amt.ui_value() - 12.5).abs() < f64::EPSILON);
    }
}
