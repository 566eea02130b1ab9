//! Whale Tracker - Retains large transactions per token and derives whale sentiment

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::gateway::{
    GatewayError, GatewayResult, MarketDataGateway, RawTransaction, TransactionKind,
};
use crate::utils::history::BoundedHistory;
use crate::utils::{MetricsService, SolanaService};

/// Pressure above which sentiment leaves neutral
const SENTIMENT_THRESHOLD: f64 = 0.7;

/// A qualified whale transaction, immutable once stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleTransaction {
    pub token_address: String,
    pub wallet_address: String,
    pub transaction_hash: String,
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub kind: TransactionKind,
    pub price_impact: f64,
    pub is_contract_origin: bool,
}

/// Reduced view of a transaction returned by activity queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleActivity {
    pub kind: TransactionKind,
    pub amount: f64,
    pub price_impact: f64,
    pub timestamp: DateTime<Utc>,
    pub is_contract_origin: bool,
}

impl From<&WhaleTransaction> for WhaleActivity {
    fn from(tx: &WhaleTransaction) -> Self {
        Self {
            kind: tx.kind,
            amount: tx.amount,
            price_impact: tx.price_impact,
            timestamp: tx.timestamp,
            is_contract_origin: tx.is_contract_origin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleSentiment {
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub buy_pressure: f64,
    pub sell_pressure: f64,
    /// Mean seconds from a wallet's buy to its next sell
    pub holding_time: f64,
}

/// Whale tracker thresholds
#[derive(Debug, Clone)]
pub struct WhaleThresholds {
    pub min_whale_amount: f64,
    pub max_transaction_age: chrono::Duration,
    pub price_impact_threshold: f64,
    pub activity_window: chrono::Duration,
    pub max_transactions_per_token: usize,
    pub max_blocks_per_scan: u64,
    pub scan_interval: Duration,
}

impl WhaleThresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_whale_amount: config.min_whale_amount,
            max_transaction_age: chrono::Duration::seconds(config.max_transaction_age_secs),
            price_impact_threshold: config.price_impact_threshold,
            max_blocks_per_scan: config.max_blocks_per_scan,
            scan_interval: Duration::from_secs(config.scan_interval_secs.max(1)),
            ..Self::default()
        }
    }
}

impl Default for WhaleThresholds {
    fn default() -> Self {
        Self {
            min_whale_amount: 100.0,
            max_transaction_age: chrono::Duration::hours(24),
            price_impact_threshold: 2.0,
            activity_window: chrono::Duration::hours(1),
            max_transactions_per_token: 1000,
            max_blocks_per_scan: 25,
            scan_interval: Duration::from_secs(10),
        }
    }
}

/// Current balances keyed by token, then wallet. Only positive balances are kept.
#[derive(Debug, Clone, Default)]
pub struct WhalePositionBook {
    positions: HashMap<String, HashMap<String, f64>>,
}

impl WhalePositionBook {
    pub fn set(&mut self, token: &str, wallet: &str, balance: f64) {
        if balance > 0.0 {
            self.positions
                .entry(token.to_string())
                .or_default()
                .insert(wallet.to_string(), balance);
        } else if let Some(wallets) = self.positions.get_mut(token) {
            wallets.remove(wallet);
            if wallets.is_empty() {
                self.positions.remove(token);
            }
        }
    }

    pub fn balance(&self, token: &str, wallet: &str) -> Option<f64> {
        self.positions.get(token)?.get(wallet).copied()
    }

    pub fn positions_for(&self, token: &str) -> HashMap<String, f64> {
        self.positions.get(token).cloned().unwrap_or_default()
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &str) -> bool,
    {
        for (token, wallets) in self.positions.iter_mut() {
            wallets.retain(|wallet, _| keep(token.as_str(), wallet.as_str()));
        }
        self.positions.retain(|_, wallets| !wallets.is_empty());
    }

    /// Number of open (token, wallet) positions
    pub fn len(&self) -> usize {
        self.positions.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Whale tracker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhaleTrackerStats {
    pub transactions_processed: u64,
    pub whale_transactions: u64,
    pub high_impact_transactions: u64,
    pub scan_errors: u64,
    pub tokens_tracked: usize,
    pub active_wallets: usize,
    pub open_positions: usize,
    pub last_scanned_block: Option<u64>,
    pub is_running: bool,
}

/// Whale Tracker module
pub struct WhaleTracker {
    gateway: Arc<dyn MarketDataGateway>,
    metrics: Arc<MetricsService>,

    is_running: Arc<AtomicBool>,
    thresholds: Arc<RwLock<WhaleThresholds>>,
    transactions: Arc<DashMap<String, BoundedHistory<WhaleTransaction>>>,
    positions: Arc<RwLock<WhalePositionBook>>,
    active_wallets: Arc<RwLock<HashSet<String>>>,
    last_scanned_block: Arc<RwLock<Option<u64>>>,

    transactions_processed: Arc<AtomicU64>,
    whale_transactions: Arc<AtomicU64>,
    high_impact_transactions: Arc<AtomicU64>,
    scan_errors: Arc<AtomicU64>,
}

impl WhaleTracker {
    /// Create a new whale tracker
    pub fn new(
        config: &Config,
        gateway: Arc<dyn MarketDataGateway>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        Self::with_thresholds(WhaleThresholds::from_config(config), gateway, metrics)
    }

    pub fn with_thresholds(
        thresholds: WhaleThresholds,
        gateway: Arc<dyn MarketDataGateway>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        Self {
            gateway,
            metrics,
            is_running: Arc::new(AtomicBool::new(false)),
            thresholds: Arc::new(RwLock::new(thresholds)),
            transactions: Arc::new(DashMap::new()),
            positions: Arc::new(RwLock::new(WhalePositionBook::default())),
            active_wallets: Arc::new(RwLock::new(HashSet::new())),
            last_scanned_block: Arc::new(RwLock::new(None)),
            transactions_processed: Arc::new(AtomicU64::new(0)),
            whale_transactions: Arc::new(AtomicU64::new(0)),
            high_impact_transactions: Arc::new(AtomicU64::new(0)),
            scan_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the whale tracker
    pub async fn start(&self) -> Result<()> {
        if self.is_running.load(Ordering::SeqCst) {
            warn!(target: "WHALE_TRACKER", "Already running");
            return Ok(());
        }

        self.is_running.store(true, Ordering::SeqCst);
        self.metrics.set_module_status("whale_tracker", true);

        let scan_interval = self.thresholds.read().scan_interval;
        info!(
            target: "WHALE_TRACKER",
            "🐋 Starting Whale Tracker (scan every {:?}, min {:.1} SOL)",
            scan_interval,
            self.thresholds.read().min_whale_amount
        );

        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(scan_interval);

            while tracker.is_running.load(Ordering::SeqCst) {
                ticker.tick().await;
                tracker.run_cycle().await;
            }
        });

        Ok(())
    }

    /// Stop the whale tracker
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.set_module_status("whale_tracker", false);
        info!(target: "WHALE_TRACKER", "🐋 Whale Tracker stopping...");
    }

    /// One scan → positions → cleanup pass
    async fn run_cycle(&self) {
        let started = Instant::now();

        match self.scan_new_transactions().await {
            Ok(recorded) if recorded > 0 => {
                debug!(target: "WHALE_TRACKER", "Recorded {} whale transactions", recorded);
            }
            Ok(_) => {}
            Err(e) => {
                error!(target: "WHALE_TRACKER", "Scan skipped: {}", e);
            }
        }

        self.update_whale_positions().await;
        self.cleanup_old_data();

        self.metrics
            .observe_cycle("whale_tracker", started.elapsed().as_secs_f64());
    }

    fn note_gateway_error(&self, operation: &str, e: &GatewayError) {
        self.metrics.record_gateway_error(operation, e.kind());
        debug!(target: "WHALE_TRACKER", "{} failed: {}", operation, e);
    }

    /// Scan blocks since the last cursor and record whale-sized swaps.
    ///
    /// Only a failure to read the latest block aborts the cycle; block and
    /// per-transaction failures skip that item.
    pub async fn scan_new_transactions(&self) -> GatewayResult<usize> {
        let latest = match self.gateway.get_latest_block().await {
            Ok(block) => block,
            Err(e) => {
                self.note_gateway_error("latest_block", &e);
                self.scan_errors.fetch_add(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (min_whale_amount, max_blocks) = {
            let thresholds = self.thresholds.read();
            (thresholds.min_whale_amount, thresholds.max_blocks_per_scan.max(1))
        };

        let last_scanned = *self.last_scanned_block.read();
        let first_block = match last_scanned {
            Some(last) if last >= latest => return Ok(0),
            Some(last) => (last + 1).max(latest.saturating_sub(max_blocks - 1)),
            None => latest,
        };

        if let Some(last) = last_scanned {
            if first_block > last + 1 {
                warn!(
                    target: "WHALE_TRACKER",
                    "Skipping blocks {}..{} to stay within {} per scan",
                    last + 1,
                    first_block,
                    max_blocks
                );
            }
        }

        let mut recorded = 0;
        for block in first_block..=latest {
            let raw = match self.gateway.get_recent_transactions(block).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.note_gateway_error("transactions", &e);
                    self.scan_errors.fetch_add(1, Ordering::SeqCst);
                    warn!(target: "WHALE_TRACKER", "Block {} skipped: {}", block, e);
                    continue;
                }
            };

            for tx in raw {
                self.transactions_processed.fetch_add(1, Ordering::SeqCst);
                if !(tx.value >= min_whale_amount) {
                    continue;
                }

                match self.enrich(&tx).await {
                    Ok(Some(whale_tx)) => {
                        if self.record_transaction(whale_tx) {
                            recorded += 1;
                        }
                    }
                    Ok(None) => {}
                    Err((operation, e)) => self.note_gateway_error(operation, &e),
                }
            }
        }

        *self.last_scanned_block.write() = Some(latest);
        Ok(recorded)
    }

    async fn enrich(
        &self,
        tx: &RawTransaction,
    ) -> Result<Option<WhaleTransaction>, (&'static str, GatewayError)> {
        let swap = match self.gateway.inspect_transaction(tx).await {
            Ok(Some(swap)) => swap,
            Ok(None) => return Ok(None),
            Err(e) => return Err(("inspect", e)),
        };

        let is_contract_origin = self
            .gateway
            .is_contract_address(&tx.sender)
            .await
            .map_err(|e| ("is_contract", e))?;

        Ok(Some(WhaleTransaction {
            token_address: swap.token_address,
            wallet_address: tx.sender.clone(),
            transaction_hash: tx.hash.clone(),
            timestamp: tx.timestamp,
            amount: tx.value,
            kind: swap.kind,
            price_impact: swap.price_impact,
            is_contract_origin,
        }))
    }

    /// Store a transaction if it qualifies as whale-sized and is not already known
    pub(crate) fn record_transaction(&self, tx: WhaleTransaction) -> bool {
        let (min_whale_amount, impact_threshold, capacity) = {
            let thresholds = self.thresholds.read();
            (
                thresholds.min_whale_amount,
                thresholds.price_impact_threshold,
                thresholds.max_transactions_per_token,
            )
        };

        if !(tx.amount >= min_whale_amount) {
            return false;
        }

        let mut history = self
            .transactions
            .entry(tx.token_address.clone())
            .or_insert_with(|| BoundedHistory::new(capacity));

        if history
            .iter()
            .any(|known| known.transaction_hash == tx.transaction_hash)
        {
            return false;
        }

        if tx.price_impact >= impact_threshold {
            self.high_impact_transactions.fetch_add(1, Ordering::SeqCst);
            self.metrics.high_impact_transactions.inc();
            warn!(
                target: "WHALE_TRACKER",
                "⚠️ High impact {} of {:.2} SOL on {} by {} ({:.2}%)",
                tx.kind.as_str(),
                tx.amount,
                SolanaService::shorten_address(&tx.token_address, 4),
                SolanaService::shorten_address(&tx.wallet_address, 4),
                tx.price_impact
            );
        }

        self.metrics
            .record_whale_transaction(tx.kind.as_str(), tx.amount);
        self.active_wallets.write().insert(tx.wallet_address.clone());
        self.whale_transactions.fetch_add(1, Ordering::SeqCst);

        debug!(
            target: "WHALE_TRACKER",
            "🐋 {} {:.2} SOL of {}",
            tx.kind.as_str(),
            tx.amount,
            SolanaService::shorten_address(&tx.token_address, 4)
        );

        history.push(tx);
        true
    }

    /// Every (token, wallet) pair present in the transaction history
    fn tracked_pairs(&self) -> HashSet<(String, String)> {
        self.transactions
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|tx| (tx.token_address.clone(), tx.wallet_address.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Re-query balances for all tracked pairs and swap in the new position book
    pub async fn update_whale_positions(&self) {
        let pairs = self.tracked_pairs();
        let previous = self.positions.read().clone();
        let mut book = WhalePositionBook::default();

        for (token, wallet) in &pairs {
            match self.gateway.get_token_balance(token, wallet).await {
                Ok(balance) => book.set(token, wallet, balance),
                Err(e) => {
                    self.note_gateway_error("token_balance", &e);
                    if let Some(balance) = previous.balance(token, wallet) {
                        book.set(token, wallet, balance);
                    }
                }
            }
        }

        self.metrics.whale_positions.set(book.len() as f64);
        *self.positions.write() = book;
    }

    /// Drop expired transactions, empty tokens, and wallets with nothing left
    pub fn cleanup_old_data(&self) {
        let now = Utc::now();
        let max_age = self.thresholds.read().max_transaction_age;

        self.transactions.retain(|_, history| {
            history.retain(|tx| now - tx.timestamp <= max_age);
            !history.is_empty()
        });

        let pairs = self.tracked_pairs();
        let wallets: HashSet<String> = pairs.iter().map(|(_, wallet)| wallet.clone()).collect();

        let open_positions = {
            let mut positions = self.positions.write();
            positions.retain(|token, wallet| pairs.contains(&(token.to_string(), wallet.to_string())));
            positions.len()
        };

        self.metrics.whale_wallets.set(wallets.len() as f64);
        self.metrics.whale_tokens.set(self.transactions.len() as f64);
        self.metrics.whale_positions.set(open_positions as f64);
        *self.active_wallets.write() = wallets;
    }

    /// Transactions for `token` inside the activity window, oldest first
    fn recent_transactions(&self, token: &str) -> Vec<WhaleTransaction> {
        let window = self.thresholds.read().activity_window;
        let now = Utc::now();

        self.transactions
            .get(token)
            .map(|history| {
                history
                    .iter()
                    .filter(|tx| now - tx.timestamp <= window)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whale activity on `token` over the last hour
    pub fn get_recent_activity(&self, token: &str) -> Vec<WhaleActivity> {
        self.recent_transactions(token)
            .iter()
            .map(WhaleActivity::from)
            .collect()
    }

    pub fn get_whale_sentiment(&self, token: &str) -> WhaleSentiment {
        let recent = self.recent_transactions(token);

        let (buy_volume, sell_volume) =
            recent
                .iter()
                .fold((0.0, 0.0), |(buy, sell), tx| match tx.kind {
                    TransactionKind::Buy => (buy + tx.amount, sell),
                    TransactionKind::Sell => (buy, sell + tx.amount),
                });

        let total_volume = buy_volume + sell_volume;
        let (buy_pressure, sell_pressure) = if total_volume > 0.0 {
            (buy_volume / total_volume, sell_volume / total_volume)
        } else {
            (0.0, 0.0)
        };

        let (sentiment, confidence) = if buy_pressure > SENTIMENT_THRESHOLD {
            (Sentiment::Bullish, buy_pressure)
        } else if sell_pressure > SENTIMENT_THRESHOLD {
            (Sentiment::Bearish, sell_pressure)
        } else {
            (Sentiment::Neutral, buy_pressure.max(sell_pressure))
        };

        WhaleSentiment {
            sentiment,
            confidence,
            buy_pressure,
            sell_pressure,
            holding_time: mean_holding_time(&recent),
        }
    }

    /// Current whale balances for `token`
    pub fn get_positions(&self, token: &str) -> HashMap<String, f64> {
        self.positions.read().positions_for(token)
    }

    pub fn active_wallets(&self) -> Vec<String> {
        let mut wallets: Vec<String> = self.active_wallets.read().iter().cloned().collect();
        wallets.sort();
        wallets
    }

    /// Get tracker statistics
    pub fn get_stats(&self) -> WhaleTrackerStats {
        WhaleTrackerStats {
            transactions_processed: self.transactions_processed.load(Ordering::SeqCst),
            whale_transactions: self.whale_transactions.load(Ordering::SeqCst),
            high_impact_transactions: self.high_impact_transactions.load(Ordering::SeqCst),
            scan_errors: self.scan_errors.load(Ordering::SeqCst),
            tokens_tracked: self.transactions.len(),
            active_wallets: self.active_wallets.read().len(),
            open_positions: self.positions.read().len(),
            last_scanned_block: *self.last_scanned_block.read(),
            is_running: self.is_running.load(Ordering::SeqCst),
        }
    }

    /// Check if running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

/// Mean seconds between each wallet's buy and that wallet's next sell.
/// Buys never followed by a sell are left out; 0 when no pair exists.
fn mean_holding_time(transactions: &[WhaleTransaction]) -> f64 {
    let mut by_wallet: HashMap<&str, Vec<&WhaleTransaction>> = HashMap::new();
    for tx in transactions {
        by_wallet.entry(tx.wallet_address.as_str()).or_default().push(tx);
    }

    let mut holds = Vec::new();
    for txs in by_wallet.values_mut() {
        txs.sort_by_key(|tx| tx.timestamp);
        for (i, buy) in txs.iter().enumerate() {
            if buy.kind != TransactionKind::Buy {
                continue;
            }
            if let Some(sell) = txs[i + 1..]
                .iter()
                .find(|tx| tx.kind == TransactionKind::Sell)
            {
                holds.push((sell.timestamp - buy.timestamp).num_milliseconds() as f64 / 1000.0);
            }
        }
    }

    if holds.is_empty() {
        0.0
    } else {
        holds.iter().sum::<f64>() / holds.len() as f64
    }
}

impl Clone for WhaleTracker {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            metrics: Arc::clone(&self.metrics),
            is_running: Arc::clone(&self.is_running),
            thresholds: Arc::clone(&self.thresholds),
            transactions: Arc::clone(&self.transactions),
            positions: Arc::clone(&self.positions),
            active_wallets: Arc::clone(&self.active_wallets),
            last_scanned_block: Arc::clone(&self.last_scanned_block),
            transactions_processed: Arc::clone(&self.transactions_processed),
            whale_transactions: Arc::clone(&self.whale_transactions),
            high_impact_transactions: Arc::clone(&self.high_impact_transactions),
            scan_errors: Arc::clone(&self.scan_errors),
        }
    }
}
