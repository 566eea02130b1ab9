//! Live gateway backed by Solana RPC and DexScreener
//!
//! Chain data (blocks, balances, account kinds) comes straight from RPC.
//! Market series are built locally by sampling DexScreener for every tracked
//! token on a fixed interval.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::{
    GatewayError, GatewayResult, MarketDataGateway, RawTransaction, SwapDetails, TokenDelta,
    TransactionKind,
};
use crate::config::Config;
use crate::utils::dexscreener::{DexScreenerClient, TokenPair, WSOL_MINT};
use crate::utils::history::BoundedHistory;
use crate::utils::solana::SolanaService;

/// One DexScreener observation of a token's primary pair
#[derive(Debug, Clone, Serialize)]
pub struct MarketSample {
    pub timestamp: DateTime<Utc>,
    /// Price in SOL
    pub price_native: f64,
    /// Trailing 5 minute volume converted to SOL
    pub volume_native: f64,
    pub liquidity_usd: f64,
    pub market_cap_usd: f64,
    /// SOL per USD at sample time, 0 when the pair has no USD price
    pub native_per_usd: f64,
}

impl MarketSample {
    fn from_pair(pair: &TokenPair) -> Option<Self> {
        let price_native = pair.price_native()?;
        let native_per_usd = match pair.price_usd() {
            Some(usd) if usd > 0.0 => price_native / usd,
            _ => 0.0,
        };
        let volume_usd = pair.volume.as_ref().map(|v| v.m5).unwrap_or(0.0);

        Some(Self {
            timestamp: Utc::now(),
            price_native,
            volume_native: volume_usd * native_per_usd,
            liquidity_usd: pair.liquidity_usd(),
            market_cap_usd: pair.market_cap_usd(),
            native_per_usd,
        })
    }

    /// Pool liquidity expressed in SOL
    fn liquidity_native(&self) -> f64 {
        self.liquidity_usd * self.native_per_usd
    }
}

/// Upper bound on cached account-kind lookups
const CONTRACT_CACHE_CAPACITY: usize = 10_000;

/// Market data gateway over the live network
pub struct LiveGateway {
    solana: Arc<SolanaService>,
    dexscreener: Arc<DexScreenerClient>,
    series: Arc<DashMap<String, BoundedHistory<MarketSample>>>,
    tracked: Arc<RwLock<Vec<String>>>,
    /// Tokens from configuration, never pruned
    configured: Arc<HashSet<String>>,
    /// Last whale swap or price read per discovered token
    last_seen: Arc<DashMap<String, DateTime<Utc>>>,
    contracts: Arc<DashMap<String, bool>>,
    series_len: usize,
    sample_interval: Duration,
    discovery_ttl: chrono::Duration,
    is_running: Arc<AtomicBool>,
}

impl LiveGateway {
    pub fn new(config: &Config, solana: Arc<SolanaService>) -> GatewayResult<Self> {
        let dexscreener = DexScreenerClient::new(
            &config.dexscreener_url,
            Duration::from_secs(config.rpc_timeout_secs),
        )?;

        Ok(Self {
            solana,
            dexscreener: Arc::new(dexscreener),
            series: Arc::new(DashMap::new()),
            tracked: Arc::new(RwLock::new(config.tracked_tokens.clone())),
            configured: Arc::new(config.tracked_tokens.iter().cloned().collect()),
            last_seen: Arc::new(DashMap::new()),
            contracts: Arc::new(DashMap::new()),
            series_len: config.market_series_len,
            sample_interval: Duration::from_secs(config.market_sample_interval_secs.max(1)),
            discovery_ttl: chrono::Duration::seconds(config.max_transaction_age_secs),
            is_running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start the background market sampler
    pub async fn start_sampling(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            target: "GATEWAY",
            "Sampling {} tracked tokens every {:?}",
            self.tracked.read().len(),
            self.sample_interval
        );

        let gateway = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(gateway.sample_interval);
            while gateway.is_running.load(Ordering::SeqCst) {
                ticker.tick().await;

                let pruned = gateway.prune_discovered(Utc::now());
                if pruned > 0 {
                    info!(target: "GATEWAY", "Stopped sampling {} idle tokens", pruned);
                }

                let tokens = gateway.tracked.read().clone();
                for token in tokens {
                    if let Err(e) = gateway.sample_token(&token).await {
                        debug!(target: "GATEWAY", "Sample failed for {}: {}", token, e);
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        info!(target: "GATEWAY", "Market sampler stopped");
    }

    /// Mark a discovered token as still in use
    fn touch(&self, token: &str) {
        if !self.configured.contains(token) {
            self.last_seen.insert(token.to_string(), Utc::now());
        }
    }

    fn cache_contract(&self, address: &str, executable: bool) {
        if self.contracts.len() >= CONTRACT_CACHE_CAPACITY {
            self.contracts.clear();
        }
        self.contracts.insert(address.to_string(), executable);
    }

    /// Drop discovered tokens with no whale swap or price read inside the
    /// discovery window, together with their series. Returns how many went.
    pub fn prune_discovered(&self, now: DateTime<Utc>) -> usize {
        let idle: Vec<String> = self
            .tracked
            .read()
            .iter()
            .filter(|token| !self.configured.contains(token.as_str()))
            .filter(|token| match self.last_seen.get(token.as_str()) {
                Some(seen) => now - *seen > self.discovery_ttl,
                None => true,
            })
            .cloned()
            .collect();

        if idle.is_empty() {
            return 0;
        }

        self.tracked.write().retain(|token| !idle.contains(token));
        for token in &idle {
            self.series.remove(token);
            self.last_seen.remove(token);
        }

        idle.len()
    }

    /// Add a token to the sampled set
    pub fn track(&self, token: &str) {
        let mut tracked = self.tracked.write();
        if !tracked.iter().any(|t| t == token) {
            tracked.push(token.to_string());
            info!(target: "GATEWAY", "Now tracking {}", SolanaService::shorten_address(token, 4));
        }
        drop(tracked);
        self.touch(token);
    }

    async fn sample_token(&self, token: &str) -> GatewayResult<MarketSample> {
        let pair = self.dexscreener.get_primary_pair(token).await?;
        let sample = MarketSample::from_pair(&pair)
            .ok_or_else(|| GatewayError::Malformed(format!("pair without price for {}", token)))?;

        self.series
            .entry(token.to_string())
            .or_insert_with(|| BoundedHistory::new(self.series_len))
            .push(sample.clone());

        Ok(sample)
    }

    fn latest_sample(&self, token: &str) -> Option<MarketSample> {
        self.series.get(token).and_then(|s| s.last().cloned())
    }

    fn series_of<F>(&self, token: &str, f: F) -> Vec<f64>
    where
        F: Fn(&MarketSample) -> f64,
    {
        self.series
            .get(token)
            .map(|s| s.iter().map(&f).collect())
            .unwrap_or_default()
    }
}

impl Clone for LiveGateway {
    fn clone(&self) -> Self {
        Self {
            solana: self.solana.clone(),
            dexscreener: self.dexscreener.clone(),
            series: self.series.clone(),
            tracked: self.tracked.clone(),
            configured: self.configured.clone(),
            last_seen: self.last_seen.clone(),
            contracts: self.contracts.clone(),
            series_len: self.series_len,
            sample_interval: self.sample_interval,
            discovery_ttl: self.discovery_ttl,
            is_running: self.is_running.clone(),
        }
    }
}

#[async_trait]
impl MarketDataGateway for LiveGateway {
    async fn get_tracked_tokens(&self) -> GatewayResult<Vec<String>> {
        Ok(self.tracked.read().clone())
    }

    async fn get_token_price(&self, token: &str) -> GatewayResult<Option<f64>> {
        // Active pumps read this every cycle, which keeps their token sampled
        self.touch(token);
        Ok(self.latest_sample(token).map(|s| s.price_native))
    }

    async fn get_recent_price_series(&self, token: &str) -> GatewayResult<Vec<f64>> {
        Ok(self.series_of(token, |s| s.price_native))
    }

    async fn get_recent_volume_series(&self, token: &str) -> GatewayResult<Vec<f64>> {
        Ok(self.series_of(token, |s| s.volume_native))
    }

    async fn get_liquidity_change_series(&self, token: &str) -> GatewayResult<Vec<f64>> {
        Ok(successive_changes(&self.series_of(token, |s| s.liquidity_usd)))
    }

    async fn get_current_liquidity(&self, token: &str) -> GatewayResult<f64> {
        self.latest_sample(token)
            .map(|s| s.liquidity_usd)
            .ok_or_else(|| GatewayError::NoData(token.to_string()))
    }

    async fn get_market_cap(&self, token: &str) -> GatewayResult<f64> {
        Ok(self.latest_sample(token).map(|s| s.market_cap_usd).unwrap_or(0.0))
    }

    async fn get_latest_block(&self) -> GatewayResult<u64> {
        self.solana
            .get_slot()
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))
    }

    async fn get_recent_transactions(&self, block: u64) -> GatewayResult<Vec<RawTransaction>> {
        self.solana
            .get_block_transactions(block)
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))
    }

    async fn get_token_balance(&self, token: &str, wallet: &str) -> GatewayResult<f64> {
        self.solana
            .get_token_balance(token, wallet)
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))
    }

    async fn is_contract_address(&self, address: &str) -> GatewayResult<bool> {
        if let Some(known) = self.contracts.get(address) {
            return Ok(*known);
        }

        let executable = self
            .solana
            .is_executable(address)
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))?;
        self.cache_contract(address, executable);
        Ok(executable)
    }

    async fn inspect_transaction(&self, tx: &RawTransaction) -> GatewayResult<Option<SwapDetails>> {
        let Some(leg) = swap_leg(tx) else {
            return Ok(None);
        };

        let sample = match self.latest_sample(&leg.mint) {
            Some(sample) => sample,
            None => match self.sample_token(&leg.mint).await {
                Ok(sample) => sample,
                // Not listed on any DEX pair we can see
                Err(GatewayError::NoData(_)) => return Ok(None),
                Err(e) => return Err(e),
            },
        };

        self.track(&leg.mint);

        let kind = if leg.delta > 0.0 {
            TransactionKind::Buy
        } else {
            TransactionKind::Sell
        };

        if sample.native_per_usd <= 0.0 {
            warn!(target: "GATEWAY", "No USD price for {}, impact unknown", leg.mint);
        }

        Ok(Some(SwapDetails {
            token_address: leg.mint.clone(),
            kind,
            price_impact: price_impact(tx.value, sample.liquidity_native()),
        }))
    }
}

/// The sender's largest non-SOL token movement in the transaction
fn swap_leg(tx: &RawTransaction) -> Option<&TokenDelta> {
    tx.token_deltas
        .iter()
        .filter(|d| d.owner == tx.sender && d.mint != WSOL_MINT)
        .max_by(|a, b| a.delta.abs().total_cmp(&b.delta.abs()))
}

/// Percent of pool liquidity moved by a trade of `value` SOL
fn price_impact(value: f64, liquidity_native: f64) -> f64 {
    if liquidity_native > 0.0 {
        value / liquidity_native * 100.0
    } else {
        0.0
    }
}

fn successive_changes(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}
