//! DexScreener API client for pair price, volume and liquidity snapshots

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::gateway::{GatewayError, GatewayResult};

/// Wrapped SOL, the quote asset every sampled pair must use
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DexScreenerResponse {
    #[serde(rename = "schemaVersion", default)]
    pub schema_version: String,
    pub pairs: Option<Vec<TokenPair>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "dexId")]
    pub dex_id: String,
    #[serde(rename = "pairAddress")]
    pub pair_address: String,
    #[serde(rename = "baseToken")]
    pub base_token: PairToken,
    #[serde(rename = "quoteToken")]
    pub quote_token: PairToken,
    #[serde(rename = "priceNative")]
    pub price_native: Option<String>,
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    pub volume: Option<Volume>,
    pub liquidity: Option<Liquidity>,
    pub fdv: Option<f64>,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairToken {
    pub address: String,
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Volume {
    #[serde(default)]
    pub m5: f64,
    #[serde(default)]
    pub h1: f64,
    #[serde(default)]
    pub h6: f64,
    #[serde(default)]
    pub h24: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Liquidity {
    #[serde(default)]
    pub usd: f64,
    #[serde(default)]
    pub base: f64,
    #[serde(default)]
    pub quote: f64,
}

impl TokenPair {
    pub fn price_native(&self) -> Option<f64> {
        self.price_native.as_deref()?.parse().ok()
    }

    pub fn price_usd(&self) -> Option<f64> {
        self.price_usd.as_deref()?.parse().ok()
    }

    pub fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().map(|l| l.usd).unwrap_or(0.0)
    }

    /// Market cap, falling back to FDV, 0 when neither is reported
    pub fn market_cap_usd(&self) -> f64 {
        self.market_cap.or(self.fdv).unwrap_or(0.0)
    }
}

pub struct DexScreenerClient {
    client: Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// All pairs quoting the token on Solana
    pub async fn get_pairs(&self, mint: &str) -> GatewayResult<Vec<TokenPair>> {
        let url = format!("{}/{}", self.base_url, mint);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(url.clone())
            } else {
                GatewayError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(GatewayError::Malformed(format!(
                "DexScreener returned status {} for {}",
                response.status(),
                mint
            )));
        }

        let body: DexScreenerResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        let pairs: Vec<TokenPair> = body
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.chain_id == "solana")
            .collect();

        debug!(target: "GATEWAY", "DexScreener: {} pairs for {}", pairs.len(), mint);
        Ok(pairs)
    }

    /// The most liquid SOL-quoted pair where the token is the base asset
    pub async fn get_primary_pair(&self, mint: &str) -> GatewayResult<TokenPair> {
        select_primary_pair(self.get_pairs(mint).await?, mint)
            .ok_or_else(|| GatewayError::NoData(mint.to_string()))
    }
}

pub(crate) fn select_primary_pair(pairs: Vec<TokenPair>, mint: &str) -> Option<TokenPair> {
    pairs
        .into_iter()
        .filter(|p| p.base_token.address == mint && p.quote_token.address == WSOL_MINT)
        .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
}
