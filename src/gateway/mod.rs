//! Market Data Gateway - the boundary between the trackers and the outside world
//!
//! Both trackers only ever talk to market data through [`MarketDataGateway`].
//! Every call can fail or time out; callers treat a failure as "no data for
//! this item this cycle".

pub mod live;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use live::LiveGateway;

/// Gateway failure
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no data for {0}")]
    NoData(String),
}

impl GatewayError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Rpc(_) => "rpc",
            GatewayError::Http(_) => "http",
            GatewayError::Malformed(_) => "malformed",
            GatewayError::NoData(_) => "no_data",
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Direction of a swap from the trader's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Buy,
    Sell,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Buy => "buy",
            TransactionKind::Sell => "sell",
        }
    }
}

/// Token balance change for one owner inside a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenDelta {
    pub mint: String,
    pub owner: String,
    pub delta: f64,
}

/// A chain transaction as delivered by the gateway, before whale enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    pub sender: String,
    pub block: u64,
    pub timestamp: DateTime<Utc>,
    /// Value moved by the sender, in the network's native unit
    pub value: f64,
    pub token_deltas: Vec<TokenDelta>,
}

/// What the gateway can tell about a transaction that touched a DEX pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapDetails {
    pub token_address: String,
    pub kind: TransactionKind,
    /// Estimated percent price move attributable to the transaction
    pub price_impact: f64,
}

/// Request/response market data source consumed by the trackers.
///
/// Price and volume series are ordered oldest first. Volume series and
/// transaction values share the network's native unit; current liquidity and
/// market cap share a quote unit so their ratio is meaningful.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    async fn get_tracked_tokens(&self) -> GatewayResult<Vec<String>>;

    async fn get_token_price(&self, token: &str) -> GatewayResult<Option<f64>>;

    async fn get_recent_price_series(&self, token: &str) -> GatewayResult<Vec<f64>>;

    async fn get_recent_volume_series(&self, token: &str) -> GatewayResult<Vec<f64>>;

    async fn get_liquidity_change_series(&self, token: &str) -> GatewayResult<Vec<f64>>;

    async fn get_current_liquidity(&self, token: &str) -> GatewayResult<f64>;

    /// Market cap, 0 when unknown
    async fn get_market_cap(&self, token: &str) -> GatewayResult<f64>;

    async fn get_latest_block(&self) -> GatewayResult<u64>;

    async fn get_recent_transactions(&self, block: u64) -> GatewayResult<Vec<RawTransaction>>;

    async fn get_token_balance(&self, token: &str, wallet: &str) -> GatewayResult<f64>;

    async fn is_contract_address(&self, address: &str) -> GatewayResult<bool>;

    /// Classify a raw transaction; `None` when it is not a swap of a known token
    async fn inspect_transaction(&self, tx: &RawTransaction) -> GatewayResult<Option<SwapDetails>>;
}
