//! Pump Monitor - Detects pumps, scores their health, and signals exits
//!
//! Each token moves through absent → active → (exited | evicted). Records are
//! replaced whole on every refresh so readers never see a half-updated entry.

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::gateway::{GatewayError, GatewayResult, MarketDataGateway, TransactionKind};
use crate::modules::scoring::{self, ScoreWeights};
use crate::modules::whale_tracker::{WhaleActivity, WhaleTracker};
use crate::utils::history::BoundedHistory;
use crate::utils::{MetricsService, SolanaService};

/// Absorbs rounding so a rise of exactly the threshold qualifies
const DETECTION_TOLERANCE: f64 = 1e-9;

/// Live state of one tracked pump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpRecord {
    pub token_address: String,
    pub start_time: DateTime<Utc>,
    pub start_price: f64,
    pub current_price: f64,
    pub peak_price: f64,
    pub volume_profile: Vec<f64>,
    pub whale_activity: Vec<WhaleActivity>,
    pub liquidity_changes: Vec<f64>,
    pub momentum_score: f64,
    pub sustainability_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl PumpRecord {
    pub fn profit_percent(&self) -> f64 {
        percent_over(self.start_price, self.current_price)
    }

    pub fn peak_profit_percent(&self) -> f64 {
        percent_over(self.start_price, self.peak_price)
    }
}

fn percent_over(base: f64, value: f64) -> f64 {
    if base > 0.0 {
        (value / base - 1.0) * 100.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    MomentumLost,
    SustainabilityLost,
    PriceRetracement,
    VolumeCollapse,
    HealthUnknown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::MomentumLost => "momentum_lost",
            ExitReason::SustainabilityLost => "sustainability_lost",
            ExitReason::PriceRetracement => "price_retracement",
            ExitReason::VolumeCollapse => "volume_collapse",
            ExitReason::HealthUnknown => "health_unknown",
        }
    }
}

/// Why a detected candidate was not opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientVolumeIncrease,
    LowLiquidity,
    WhaleDominated,
    DataUnavailable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InsufficientVolumeIncrease => "insufficient_volume_increase",
            RejectReason::LowLiquidity => "low_liquidity",
            RejectReason::WhaleDominated => "whale_dominated",
            RejectReason::DataUnavailable => "data_unavailable",
        }
    }
}

/// Health of a record could not be assessed
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("non-finite score for {0}")]
    NonFiniteScore(String),

    #[error("invalid price anchors for {0}")]
    InvalidPrice(String),

    #[error("no usable volume profile for {0}")]
    EmptyVolumeProfile(String),
}

/// A concluded pump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpHistoryEntry {
    pub token_address: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_price: f64,
    pub exit_price: f64,
    pub realized_profit_percent: f64,
    pub peak_profit_percent: f64,
    pub duration_secs: i64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSignal {
    pub token_address: String,
    pub reason: ExitReason,
    pub realized_profit_percent: f64,
    pub peak_profit_percent: f64,
    pub emitted_at: DateTime<Utc>,
}

/// Outbound events for strategies, alerts and the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PumpEvent {
    Detected {
        token_address: String,
        price_change_percent: f64,
        start_price: f64,
        momentum_score: f64,
        sustainability_score: f64,
    },
    Exit(ExitSignal),
}

/// Pump monitor thresholds
#[derive(Debug, Clone)]
pub struct PumpThresholds {
    /// Percent rise over the price window that makes a candidate
    pub min_pump_threshold: f64,
    pub volume_window: usize,
    /// Fractional volume rise over the window (1.0 = +100%)
    pub min_volume_increase: f64,
    pub momentum_threshold: f64,
    pub sustainability_threshold: f64,
    pub whale_impact_threshold: f64,
    pub min_liquidity_ratio: f64,
    pub max_retracement: f64,
    pub max_volume_drop: f64,
    pub max_pump_age: chrono::Duration,
    pub history_capacity: usize,
    pub update_interval: Duration,
    pub weights: ScoreWeights,
}

impl PumpThresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_pump_threshold: config.min_pump_threshold,
            volume_window: config.volume_window,
            momentum_threshold: config.momentum_threshold,
            sustainability_threshold: config.sustainability_threshold,
            whale_impact_threshold: config.whale_impact_threshold,
            min_liquidity_ratio: config.min_liquidity_ratio,
            weights: ScoreWeights::from_config(config),
            ..Self::default()
        }
    }
}

impl Default for PumpThresholds {
    fn default() -> Self {
        Self {
            min_pump_threshold: 20.0,
            volume_window: 12,
            min_volume_increase: 1.0,
            momentum_threshold: 0.7,
            sustainability_threshold: 0.6,
            whale_impact_threshold: 0.3,
            min_liquidity_ratio: 0.1,
            max_retracement: 0.2,
            max_volume_drop: 0.5,
            max_pump_age: chrono::Duration::hours(24),
            history_capacity: 1000,
            update_interval: Duration::from_secs(1),
            weights: ScoreWeights::default(),
        }
    }
}

/// Pump monitor statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpMonitorStats {
    pub pumps_detected: u64,
    pub pumps_rejected: u64,
    pub pumps_exited: u64,
    pub pumps_evicted: u64,
    pub active_pumps: usize,
    pub history_len: usize,
    pub is_running: bool,
}

/// Where the last pump on a token ended
#[derive(Debug, Clone, Copy)]
struct ExitMark {
    price: f64,
    at: DateTime<Utc>,
}

/// Market data gathered while validating a candidate
struct Candidate {
    volumes: Vec<f64>,
    whale_activity: Vec<WhaleActivity>,
    liquidity_changes: Vec<f64>,
}

/// Pump Monitor module
pub struct PumpMonitor {
    gateway: Arc<dyn MarketDataGateway>,
    whales: Arc<WhaleTracker>,
    metrics: Arc<MetricsService>,

    is_running: Arc<AtomicBool>,
    thresholds: Arc<RwLock<PumpThresholds>>,
    active_pumps: Arc<DashMap<String, PumpRecord>>,
    history: Arc<RwLock<BoundedHistory<PumpHistoryEntry>>>,
    recent_exits: Arc<DashMap<String, ExitMark>>,
    event_sender: broadcast::Sender<PumpEvent>,

    pumps_detected: Arc<AtomicU64>,
    pumps_rejected: Arc<AtomicU64>,
    pumps_exited: Arc<AtomicU64>,
    pumps_evicted: Arc<AtomicU64>,
}

impl PumpMonitor {
    /// Create a new pump monitor
    pub fn new(
        config: &Config,
        gateway: Arc<dyn MarketDataGateway>,
        whales: Arc<WhaleTracker>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        Self::with_thresholds(PumpThresholds::from_config(config), gateway, whales, metrics)
    }

    pub fn with_thresholds(
        thresholds: PumpThresholds,
        gateway: Arc<dyn MarketDataGateway>,
        whales: Arc<WhaleTracker>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(1000);
        let history = BoundedHistory::new(thresholds.history_capacity);

        Self {
            gateway,
            whales,
            metrics,
            is_running: Arc::new(AtomicBool::new(false)),
            thresholds: Arc::new(RwLock::new(thresholds)),
            active_pumps: Arc::new(DashMap::new()),
            history: Arc::new(RwLock::new(history)),
            recent_exits: Arc::new(DashMap::new()),
            event_sender,
            pumps_detected: Arc::new(AtomicU64::new(0)),
            pumps_rejected: Arc::new(AtomicU64::new(0)),
            pumps_exited: Arc::new(AtomicU64::new(0)),
            pumps_evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to detection and exit events
    pub fn subscribe_events(&self) -> broadcast::Receiver<PumpEvent> {
        self.event_sender.subscribe()
    }

    /// Start the pump monitor
    pub async fn start(&self) -> Result<()> {
        if self.is_running.load(Ordering::SeqCst) {
            warn!(target: "PUMP_MONITOR", "Already running");
            return Ok(());
        }

        self.is_running.store(true, Ordering::SeqCst);
        self.metrics.set_module_status("pump_monitor", true);

        let (update_interval, min_pump_threshold) = {
            let thresholds = self.thresholds.read();
            (thresholds.update_interval, thresholds.min_pump_threshold)
        };

        info!(
            target: "PUMP_MONITOR",
            "🚀 Starting Pump Monitor (threshold {:.1}%)",
            min_pump_threshold
        );

        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(update_interval);

            while monitor.is_running.load(Ordering::SeqCst) {
                ticker.tick().await;
                monitor.run_cycle().await;
            }
        });

        Ok(())
    }

    /// Stop the pump monitor
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.set_module_status("pump_monitor", false);
        info!(target: "PUMP_MONITOR", "🚀 Pump Monitor stopping...");
    }

    /// One update → detect → cleanup pass
    async fn run_cycle(&self) {
        let started = Instant::now();

        self.update_active_pumps().await;

        if let Err(e) = self.detect_new_pumps().await {
            error!(target: "PUMP_MONITOR", "Detection skipped: {}", e);
        }

        self.cleanup_inactive_pumps();

        self.metrics
            .observe_cycle("pump_monitor", started.elapsed().as_secs_f64());
    }

    fn note_gateway_error(&self, operation: &str, token: &str, e: &GatewayError) {
        self.metrics.record_gateway_error(operation, e.kind());
        debug!(
            target: "PUMP_MONITOR",
            "{} failed for {}: {}",
            operation,
            SolanaService::shorten_address(token, 4),
            e
        );
    }

    // ============================================
    // DETECTION
    // ============================================

    /// Open records for tokens whose price window rose past the threshold and
    /// that pass validation. Returns the number of new records.
    pub async fn detect_new_pumps(&self) -> GatewayResult<usize> {
        let tokens = match self.gateway.get_tracked_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.metrics.record_gateway_error("tracked_tokens", e.kind());
                return Err(e);
            }
        };

        let min_pump_threshold = self.thresholds.read().min_pump_threshold;
        let mut opened = 0;

        for token in tokens {
            if self.active_pumps.contains_key(&token) {
                continue;
            }

            let prices = match self.gateway.get_recent_price_series(&token).await {
                Ok(prices) => prices,
                Err(e) => {
                    self.note_gateway_error("price_series", &token, &e);
                    continue;
                }
            };

            let exit_price = self.recent_exits.get(&token).map(|mark| mark.price);
            let Some((start_price, change)) = detection_window(&prices, exit_price) else {
                continue;
            };
            if !is_pump_candidate(change, min_pump_threshold) {
                continue;
            }

            match self.assess_candidate(&token).await {
                Ok(candidate) => {
                    if self.open_pump(&token, start_price, &prices, change, candidate) {
                        opened += 1;
                    }
                }
                Err(reason) => {
                    self.pumps_rejected.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_rejection(reason.as_str());
                    info!(
                        target: "PUMP_MONITOR",
                        "Rejected {} (+{:.1}%): {}",
                        SolanaService::shorten_address(&token, 4),
                        change,
                        reason.as_str()
                    );
                }
            }
        }

        Ok(opened)
    }

    /// Whether a candidate passes the anti-manipulation checks
    pub async fn validate_pump(&self, token: &str) -> bool {
        self.assess_candidate(token).await.is_ok()
    }

    /// Run the validation checks, failing closed on any gateway error
    async fn assess_candidate(&self, token: &str) -> Result<Candidate, RejectReason> {
        let (window, min_increase, min_ratio, whale_limit) = {
            let thresholds = self.thresholds.read();
            (
                thresholds.volume_window.max(2),
                thresholds.min_volume_increase,
                thresholds.min_liquidity_ratio,
                thresholds.whale_impact_threshold,
            )
        };

        let volumes = match self.gateway.get_recent_volume_series(token).await {
            Ok(volumes) => tail(volumes, window),
            Err(e) => {
                self.note_gateway_error("volume_series", token, &e);
                return Err(RejectReason::DataUnavailable);
            }
        };

        match volume_increase(&volumes) {
            Some(increase) if increase >= min_increase => {}
            _ => return Err(RejectReason::InsufficientVolumeIncrease),
        }

        let market_cap = match self.gateway.get_market_cap(token).await {
            Ok(market_cap) => market_cap,
            Err(e) => {
                self.note_gateway_error("market_cap", token, &e);
                return Err(RejectReason::DataUnavailable);
            }
        };

        if market_cap > 0.0 {
            let liquidity = match self.gateway.get_current_liquidity(token).await {
                Ok(liquidity) => liquidity,
                Err(e) => {
                    self.note_gateway_error("liquidity", token, &e);
                    return Err(RejectReason::DataUnavailable);
                }
            };
            if !(liquidity / market_cap >= min_ratio) {
                return Err(RejectReason::LowLiquidity);
            }
        }

        let whale_activity = self.whales.get_recent_activity(token);
        if whale_buy_share(&whale_activity, &volumes) > whale_limit {
            return Err(RejectReason::WhaleDominated);
        }

        let liquidity_changes = match self.gateway.get_liquidity_change_series(token).await {
            Ok(changes) => changes,
            Err(e) => {
                self.note_gateway_error("liquidity_changes", token, &e);
                return Err(RejectReason::DataUnavailable);
            }
        };

        Ok(Candidate {
            volumes,
            whale_activity,
            liquidity_changes,
        })
    }

    /// Insert a new record unless one already exists for the token
    fn open_pump(
        &self,
        token: &str,
        start_price: f64,
        prices: &[f64],
        change: f64,
        candidate: Candidate,
    ) -> bool {
        let Some(&current_price) = prices.last() else {
            return false;
        };

        let weights = self.thresholds.read().weights;
        let momentum_score =
            scoring::momentum_score(start_price, current_price, &candidate.volumes, &weights);
        let sustainability_score = scoring::sustainability_score(
            &candidate.whale_activity,
            &candidate.liquidity_changes,
            &candidate.volumes,
            &weights,
        );

        let now = Utc::now();
        let record = PumpRecord {
            token_address: token.to_string(),
            start_time: now,
            start_price,
            current_price,
            peak_price: current_price,
            volume_profile: candidate.volumes,
            whale_activity: candidate.whale_activity,
            liquidity_changes: candidate.liquidity_changes,
            momentum_score,
            sustainability_score,
            last_updated: now,
        };

        match self.active_pumps.entry(token.to_string()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }

        self.pumps_detected.fetch_add(1, Ordering::SeqCst);
        self.metrics.pumps_detected.inc();
        self.metrics
            .set_pump_scores(token, momentum_score, sustainability_score);
        self.metrics.active_pumps.set(self.active_pumps.len() as f64);

        info!(
            target: "PUMP_MONITOR",
            "🚀 Pump detected: {} +{:.1}% (momentum {:.2}, sustainability {:.2})",
            SolanaService::shorten_address(token, 4),
            change,
            momentum_score,
            sustainability_score
        );

        let _ = self.event_sender.send(PumpEvent::Detected {
            token_address: token.to_string(),
            price_change_percent: change,
            start_price,
            momentum_score,
            sustainability_score,
        });

        true
    }

    // ============================================
    // ACTIVE PUMPS
    // ============================================

    /// Refresh every active record and emit exits where warranted.
    /// A record whose refresh fails keeps its previous state this cycle.
    pub async fn update_active_pumps(&self) {
        let tokens: Vec<String> = self
            .active_pumps
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for token in tokens {
            let Some(existing) = self.active_pumps.get(&token).map(|r| r.value().clone()) else {
                continue;
            };

            let updated = match self.refresh_record(&existing).await {
                Ok(updated) => updated,
                Err((operation, e)) => {
                    self.note_gateway_error(operation, &token, &e);
                    continue;
                }
            };

            self.metrics.set_pump_scores(
                &token,
                updated.momentum_score,
                updated.sustainability_score,
            );

            let exit = self.exit_reason(&updated);

            match self.active_pumps.get_mut(&token) {
                Some(mut slot) => *slot = updated,
                None => continue,
            }

            if let Some(reason) = exit {
                self.exit_pump(&token, reason);
            }
        }
    }

    async fn refresh_record(
        &self,
        record: &PumpRecord,
    ) -> Result<PumpRecord, (&'static str, GatewayError)> {
        let token = record.token_address.as_str();
        let (window, weights) = {
            let thresholds = self.thresholds.read();
            (thresholds.volume_window.max(2), thresholds.weights)
        };

        let current_price = self
            .gateway
            .get_token_price(token)
            .await
            .map_err(|e| ("token_price", e))?
            .ok_or_else(|| ("token_price", GatewayError::NoData(token.to_string())))?;

        let volume_profile = tail(
            self.gateway
                .get_recent_volume_series(token)
                .await
                .map_err(|e| ("volume_series", e))?,
            window,
        );

        let liquidity_changes = self
            .gateway
            .get_liquidity_change_series(token)
            .await
            .map_err(|e| ("liquidity_changes", e))?;

        let whale_activity = self.whales.get_recent_activity(token);

        let momentum_score =
            scoring::momentum_score(record.start_price, current_price, &volume_profile, &weights);
        let sustainability_score = scoring::sustainability_score(
            &whale_activity,
            &liquidity_changes,
            &volume_profile,
            &weights,
        );

        Ok(PumpRecord {
            current_price,
            peak_price: record.peak_price.max(current_price),
            volume_profile,
            whale_activity,
            liquidity_changes,
            momentum_score,
            sustainability_score,
            last_updated: Utc::now(),
            ..record.clone()
        })
    }

    /// Exit decision for a record; an unassessable record always exits
    pub fn exit_reason(&self, record: &PumpRecord) -> Option<ExitReason> {
        let thresholds = self.thresholds.read().clone();
        match evaluate_exit(record, &thresholds) {
            Ok(reason) => reason,
            Err(e) => {
                warn!(target: "PUMP_MONITOR", "Exiting on unassessable health: {}", e);
                Some(ExitReason::HealthUnknown)
            }
        }
    }

    pub fn should_exit(&self, record: &PumpRecord) -> bool {
        self.exit_reason(record).is_some()
    }

    /// Move a record to history and emit its exit signal.
    /// Returns `None` when the token had no active record.
    fn exit_pump(&self, token: &str, reason: ExitReason) -> Option<PumpHistoryEntry> {
        let (_, record) = self.active_pumps.remove(token)?;
        let now = Utc::now();

        let entry = PumpHistoryEntry {
            token_address: record.token_address.clone(),
            start_time: record.start_time,
            end_time: now,
            start_price: record.start_price,
            exit_price: record.current_price,
            realized_profit_percent: record.profit_percent(),
            peak_profit_percent: record.peak_profit_percent(),
            duration_secs: (now - record.start_time).num_seconds(),
            exit_reason: reason,
        };

        self.history.write().push(entry.clone());
        self.recent_exits.insert(
            token.to_string(),
            ExitMark {
                price: record.current_price,
                at: now,
            },
        );

        self.pumps_exited.fetch_add(1, Ordering::SeqCst);
        self.metrics.record_exit(reason.as_str());
        self.metrics.clear_pump_scores(token);
        self.metrics.active_pumps.set(self.active_pumps.len() as f64);

        info!(
            target: "PUMP_MONITOR",
            "🛑 Exit {}: {} (realized {:+.1}%, peak {:+.1}%)",
            SolanaService::shorten_address(token, 4),
            reason.as_str(),
            entry.realized_profit_percent,
            entry.peak_profit_percent
        );

        let _ = self.event_sender.send(PumpEvent::Exit(ExitSignal {
            token_address: entry.token_address.clone(),
            reason,
            realized_profit_percent: entry.realized_profit_percent,
            peak_profit_percent: entry.peak_profit_percent,
            emitted_at: now,
        }));

        Some(entry)
    }

    /// Evict records older than the max pump age, without history
    pub fn cleanup_inactive_pumps(&self) -> usize {
        let now = Utc::now();
        let max_age = self.thresholds.read().max_pump_age;

        self.recent_exits.retain(|_, mark| now - mark.at <= max_age);

        let stale: Vec<String> = self
            .active_pumps
            .iter()
            .filter(|entry| now - entry.value().start_time > max_age)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for token in stale {
            if self.active_pumps.remove(&token).is_some() {
                evicted += 1;
                self.pumps_evicted.fetch_add(1, Ordering::SeqCst);
                self.metrics.pumps_evicted.inc();
                self.metrics.clear_pump_scores(&token);
                info!(
                    target: "PUMP_MONITOR",
                    "Evicted stale pump {}",
                    SolanaService::shorten_address(&token, 4)
                );
            }
        }

        self.metrics.active_pumps.set(self.active_pumps.len() as f64);
        evicted
    }

    // ============================================
    // READ VIEWS
    // ============================================

    /// Snapshot of every active pump
    pub fn get_active_pumps(&self) -> Vec<PumpRecord> {
        let mut pumps: Vec<PumpRecord> = self
            .active_pumps
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        pumps.sort_by(|a, b| a.token_address.cmp(&b.token_address));
        pumps
    }

    pub fn get_pump(&self, token: &str) -> Option<PumpRecord> {
        self.active_pumps.get(token).map(|r| r.value().clone())
    }

    /// Concluded pumps, newest first
    pub fn get_history(&self, limit: usize) -> Vec<PumpHistoryEntry> {
        self.history.read().newest(limit)
    }

    /// Get monitor statistics
    pub fn get_stats(&self) -> PumpMonitorStats {
        PumpMonitorStats {
            pumps_detected: self.pumps_detected.load(Ordering::SeqCst),
            pumps_rejected: self.pumps_rejected.load(Ordering::SeqCst),
            pumps_exited: self.pumps_exited.load(Ordering::SeqCst),
            pumps_evicted: self.pumps_evicted.load(Ordering::SeqCst),
            active_pumps: self.active_pumps.len(),
            history_len: self.history.read().len(),
            is_running: self.is_running.load(Ordering::SeqCst),
        }
    }

    /// Check if running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

impl Clone for PumpMonitor {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            whales: Arc::clone(&self.whales),
            metrics: Arc::clone(&self.metrics),
            is_running: Arc::clone(&self.is_running),
            thresholds: Arc::clone(&self.thresholds),
            active_pumps: Arc::clone(&self.active_pumps),
            history: Arc::clone(&self.history),
            recent_exits: Arc::clone(&self.recent_exits),
            event_sender: self.event_sender.clone(),
            pumps_detected: Arc::clone(&self.pumps_detected),
            pumps_rejected: Arc::clone(&self.pumps_rejected),
            pumps_exited: Arc::clone(&self.pumps_exited),
            pumps_evicted: Arc::clone(&self.pumps_evicted),
        }
    }
}

/// Percent change from the first to the last sample; needs 2 samples and a positive base
pub fn price_change_percent(prices: &[f64]) -> Option<f64> {
    if prices.len() < 2 {
        return None;
    }
    let first = prices[0];
    let last = prices[prices.len() - 1];
    if !(first > 0.0) || !last.is_finite() {
        return None;
    }
    Some((last / first - 1.0) * 100.0)
}

/// Start price and percent rise of the detection window. After an exit the
/// rise is measured from the exit price when that is higher than the window
/// start, so the move that already ran is not detected twice.
pub fn detection_window(prices: &[f64], exit_price: Option<f64>) -> Option<(f64, f64)> {
    let change = price_change_percent(prices)?;
    let first = prices[0];
    let last = prices[prices.len() - 1];

    match exit_price {
        Some(exit) if exit > first => Some((exit, (last / exit - 1.0) * 100.0)),
        _ => Some((first, change)),
    }
}

pub fn is_pump_candidate(price_change_percent: f64, min_pump_threshold: f64) -> bool {
    price_change_percent + DETECTION_TOLERANCE >= min_pump_threshold
}

/// `last / first - 1` over the window, `None` without a usable base
pub fn volume_increase(volumes: &[f64]) -> Option<f64> {
    if volumes.len() < 2 {
        return None;
    }
    let first = volumes[0];
    let last = volumes[volumes.len() - 1];
    if first > 0.0 {
        Some(last / first - 1.0)
    } else {
        None
    }
}

/// Whale buy volume as a share of the sampled market volume
fn whale_buy_share(activity: &[WhaleActivity], volumes: &[f64]) -> f64 {
    let whale_buys: f64 = activity
        .iter()
        .filter(|a| a.kind == TransactionKind::Buy)
        .map(|a| a.amount)
        .sum();
    let total: f64 = volumes.iter().sum();

    if total > 0.0 {
        whale_buys / total
    } else if whale_buys > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

fn tail(mut values: Vec<f64>, n: usize) -> Vec<f64> {
    if values.len() > n {
        values.drain(..values.len() - n);
    }
    values
}

/// Exit checks in priority order: momentum, sustainability, retracement, volume
pub fn evaluate_exit(
    record: &PumpRecord,
    thresholds: &PumpThresholds,
) -> Result<Option<ExitReason>, ScoreError> {
    let token = &record.token_address;

    if !record.momentum_score.is_finite() || !record.sustainability_score.is_finite() {
        return Err(ScoreError::NonFiniteScore(token.clone()));
    }
    if record.momentum_score < thresholds.momentum_threshold {
        return Ok(Some(ExitReason::MomentumLost));
    }
    if record.sustainability_score < thresholds.sustainability_threshold {
        return Ok(Some(ExitReason::SustainabilityLost));
    }

    if !(record.peak_price > 0.0) || !record.current_price.is_finite() {
        return Err(ScoreError::InvalidPrice(token.clone()));
    }
    let retracement = (record.peak_price - record.current_price) / record.peak_price;
    if retracement > thresholds.max_retracement {
        return Ok(Some(ExitReason::PriceRetracement));
    }

    let last_volume = record
        .volume_profile
        .last()
        .copied()
        .ok_or_else(|| ScoreError::EmptyVolumeProfile(token.clone()))?;
    let peak_volume = record
        .volume_profile
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !(peak_volume > 0.0) || !last_volume.is_finite() {
        return Err(ScoreError::EmptyVolumeProfile(token.clone()));
    }
    if last_volume / peak_volume - 1.0 < -thresholds.max_volume_drop {
        return Ok(Some(ExitReason::VolumeCollapse));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;
    use crate::modules::whale_tracker::tests::whale_tx;
    use crate::modules::whale_tracker::WhaleThresholds;

    struct Harness {
        gateway: Arc<MockGateway>,
        whales: Arc<WhaleTracker>,
        monitor: PumpMonitor,
    }

    fn harness_with(thresholds: PumpThresholds) -> Harness {
        let gateway = Arc::new(MockGateway::new());
        let metrics = Arc::new(MetricsService::new().unwrap());
        let whales = Arc::new(WhaleTracker::with_thresholds(
            WhaleThresholds::default(),
            gateway.clone(),
            metrics.clone(),
        ));
        let monitor =
            PumpMonitor::with_thresholds(thresholds, gateway.clone(), whales.clone(), metrics);
        Harness {
            gateway,
            whales,
            monitor,
        }
    }

    fn harness() -> Harness {
        harness_with(PumpThresholds::default())
    }

    /// Thresholds under which no record ever exits on its scores
    fn never_exit() -> PumpThresholds {
        PumpThresholds {
            momentum_threshold: 0.0,
            sustainability_threshold: 0.0,
            max_retracement: 1.0,
            max_volume_drop: 1.0,
            ..PumpThresholds::default()
        }
    }

    /// 30% rise, 150% volume rise, liquidity ratio 0.5, whale buy share 0.1
    fn script_pump(h: &Harness, token: &str) {
        h.gateway.track(token);
        h.gateway.set_prices(token, vec![100.0, 100.0, 130.0]);
        h.gateway.set_volumes(token, vec![1000.0, 2500.0]);
        h.gateway.set_liquidity(token, 50_000.0, 100_000.0);
        h.gateway
            .set_liquidity_changes(token, vec![500.0, 520.0, 510.0]);
        h.whales
            .record_transaction(whale_tx(token, "whale", "h1", TransactionKind::Buy, 350.0, 5));
    }

    fn record(token: &str, hours_ago: i64) -> PumpRecord {
        let start_time = Utc::now() - chrono::Duration::hours(hours_ago);
        PumpRecord {
            token_address: token.to_string(),
            start_time,
            start_price: 100.0,
            current_price: 140.0,
            peak_price: 150.0,
            volume_profile: vec![1000.0, 2500.0, 2400.0],
            whale_activity: Vec::new(),
            liquidity_changes: Vec::new(),
            momentum_score: 0.9,
            sustainability_score: 0.8,
            last_updated: start_time,
        }
    }

    #[tokio::test]
    async fn test_detects_and_validates_organic_pump() {
        let h = harness();
        script_pump(&h, "MINT");
        let mut events = h.monitor.subscribe_events();

        assert!(h.monitor.validate_pump("MINT").await);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 1);

        let pump = h.monitor.get_pump("MINT").unwrap();
        assert_eq!(pump.start_price, 100.0);
        assert_eq!(pump.current_price, 130.0);
        assert_eq!(pump.peak_price, 130.0);
        assert_eq!(pump.volume_profile, vec![1000.0, 2500.0]);
        assert_eq!(pump.whale_activity.len(), 1);
        assert!((0.0..=1.0).contains(&pump.momentum_score));
        assert!((0.0..=1.0).contains(&pump.sustainability_score));

        match events.try_recv().unwrap() {
            PumpEvent::Detected {
                token_address,
                price_change_percent,
                ..
            } => {
                assert_eq!(token_address, "MINT");
                assert!((price_change_percent - 30.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_whale_dominated_pump_is_rejected() {
        let h = harness();
        script_pump(&h, "MINT");
        h.whales
            .record_transaction(whale_tx("MINT", "whale2", "h2", TransactionKind::Buy, 2800.0, 3));

        assert!(!h.monitor.validate_pump("MINT").await);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 0);
        assert!(h.monitor.get_active_pumps().is_empty());
        assert_eq!(h.monitor.get_stats().pumps_rejected, 1);
    }

    #[tokio::test]
    async fn test_detection_is_idempotent() {
        let h = harness();
        script_pump(&h, "MINT");

        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 1);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 0);
        assert_eq!(h.monitor.get_active_pumps().len(), 1);
        assert_eq!(h.monitor.get_stats().pumps_detected, 1);
    }

    #[tokio::test]
    async fn test_exact_threshold_rise_is_detected() {
        let h = harness();
        script_pump(&h, "MINT");
        h.gateway.set_prices("MINT", vec![100.0, 120.0]);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 1);

        script_pump(&h, "SHY");
        h.gateway.set_prices("SHY", vec![100.0, 119.99]);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 0);
        assert!(h.monitor.get_pump("SHY").is_none());
    }

    #[test]
    fn test_detection_boundary() {
        let exact = price_change_percent(&[1.0, 1.2]).unwrap();
        assert!(is_pump_candidate(exact, 20.0));
        assert!(!is_pump_candidate(20.0 - 1e-6, 20.0));
        assert!(price_change_percent(&[0.0, 1.0]).is_none());
        assert!(price_change_percent(&[1.0]).is_none());
    }

    #[tokio::test]
    async fn test_insufficient_volume_increase_is_rejected() {
        let h = harness();
        script_pump(&h, "MINT");
        h.gateway.set_volumes("MINT", vec![1000.0, 1500.0]);

        assert!(!h.monitor.validate_pump("MINT").await);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_volume_window_uses_most_recent_samples() {
        let h = harness_with(PumpThresholds {
            volume_window: 2,
            ..PumpThresholds::default()
        });
        script_pump(&h, "MINT");
        h.gateway.set_volumes("MINT", vec![5000.0, 1000.0, 2500.0]);
        assert!(h.monitor.validate_pump("MINT").await);

        let wide = harness_with(PumpThresholds {
            volume_window: 3,
            ..PumpThresholds::default()
        });
        script_pump(&wide, "MINT");
        wide.gateway.set_volumes("MINT", vec![5000.0, 1000.0, 2500.0]);
        assert!(!wide.monitor.validate_pump("MINT").await);
    }

    #[tokio::test]
    async fn test_low_liquidity_is_rejected() {
        let h = harness();
        script_pump(&h, "MINT");
        h.gateway.set_liquidity("MINT", 5_000.0, 100_000.0);
        assert!(!h.monitor.validate_pump("MINT").await);

        // Unknown market cap skips the ratio check entirely
        let h = harness();
        script_pump(&h, "MINT");
        h.gateway.set_liquidity("MINT", 0.0, 0.0);
        assert!(h.monitor.validate_pump("MINT").await);
    }

    #[tokio::test]
    async fn test_validation_fails_closed_on_gateway_error() {
        let h = harness();
        script_pump(&h, "MINT");
        h.gateway.fail("market_cap");

        assert!(!h.monitor.validate_pump("MINT").await);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 0);

        h.gateway.recover("market_cap");
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tracked_tokens_failure_skips_detection() {
        let h = harness();
        script_pump(&h, "MINT");
        h.gateway.fail("tracked_tokens");
        assert!(h.monitor.detect_new_pumps().await.is_err());
        assert!(h.monitor.get_active_pumps().is_empty());

        let text = h.monitor.metrics.get_metrics().unwrap();
        assert!(text.contains(
            "pumpwatch_gateway_errors_total{kind=\"timeout\",operation=\"tracked_tokens\"} 1"
        ));
    }

    #[tokio::test]
    async fn test_low_momentum_always_exits() {
        let h = harness();
        let mut weak = record("MINT", 1);
        weak.momentum_score = 0.5;
        weak.sustainability_score = 1.0;

        assert!(h.monitor.should_exit(&weak));
        assert_eq!(h.monitor.exit_reason(&weak), Some(ExitReason::MomentumLost));
    }

    #[test]
    fn test_exit_reasons() {
        let thresholds = PumpThresholds::default();

        let healthy = record("MINT", 1);
        assert_eq!(evaluate_exit(&healthy, &thresholds).unwrap(), None);

        let mut shaky = record("MINT", 1);
        shaky.sustainability_score = 0.5;
        assert_eq!(
            evaluate_exit(&shaky, &thresholds).unwrap(),
            Some(ExitReason::SustainabilityLost)
        );

        let mut dumped = record("MINT", 1);
        dumped.current_price = 110.0;
        assert_eq!(
            evaluate_exit(&dumped, &thresholds).unwrap(),
            Some(ExitReason::PriceRetracement)
        );

        let mut dried_up = record("MINT", 1);
        dried_up.volume_profile = vec![1000.0, 2500.0, 1000.0];
        assert_eq!(
            evaluate_exit(&dried_up, &thresholds).unwrap(),
            Some(ExitReason::VolumeCollapse)
        );
    }

    #[tokio::test]
    async fn test_unassessable_record_exits() {
        let h = harness();

        let mut nan_score = record("MINT", 1);
        nan_score.momentum_score = f64::NAN;
        assert!(evaluate_exit(&nan_score, &PumpThresholds::default()).is_err());
        assert_eq!(h.monitor.exit_reason(&nan_score), Some(ExitReason::HealthUnknown));

        let mut no_volume = record("MINT", 1);
        no_volume.volume_profile.clear();
        assert_eq!(h.monitor.exit_reason(&no_volume), Some(ExitReason::HealthUnknown));

        let mut zero_peak = record("MINT", 1);
        zero_peak.peak_price = 0.0;
        assert!(h.monitor.should_exit(&zero_peak));
    }

    #[tokio::test]
    async fn test_peak_price_never_decreases() {
        let h = harness_with(never_exit());
        script_pump(&h, "MINT");
        h.monitor.detect_new_pumps().await.unwrap();

        let mut peaks = vec![h.monitor.get_pump("MINT").unwrap().peak_price];
        for price in [150.0, 120.0, 160.0, 90.0] {
            h.gateway.set_spot_price("MINT", price);
            h.monitor.update_active_pumps().await;
            let pump = h.monitor.get_pump("MINT").unwrap();
            assert_eq!(pump.current_price, price);
            peaks.push(pump.peak_price);
        }

        assert_eq!(peaks, vec![130.0, 150.0, 150.0, 160.0, 160.0]);
        assert_eq!(h.monitor.get_pump("MINT").unwrap().start_price, 100.0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_state() {
        let h = harness_with(never_exit());
        script_pump(&h, "MINT");
        h.monitor.detect_new_pumps().await.unwrap();
        let before = h.monitor.get_pump("MINT").unwrap();

        h.gateway.set_spot_price("MINT", 200.0);
        h.gateway.fail("token_price");
        h.monitor.update_active_pumps().await;

        let after = h.monitor.get_pump("MINT").unwrap();
        assert_eq!(after.current_price, before.current_price);
        assert_eq!(after.last_updated, before.last_updated);
        assert!(h.monitor.get_history(10).is_empty());
    }

    #[tokio::test]
    async fn test_exit_moves_record_to_history_once() {
        let h = harness();
        script_pump(&h, "MINT");
        let mut events = h.monitor.subscribe_events();
        h.monitor.detect_new_pumps().await.unwrap();

        // 0.7 * 0.3 price + 0.3 * 1.5 volume = 0.66, under the 0.7 bar
        h.monitor.update_active_pumps().await;

        assert!(h.monitor.get_pump("MINT").is_none());
        let history = h.monitor.get_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].exit_reason, ExitReason::MomentumLost);
        assert!((history[0].realized_profit_percent - 30.0).abs() < 1e-9);
        assert!((history[0].peak_profit_percent - 30.0).abs() < 1e-9);

        assert!(matches!(events.try_recv().unwrap(), PumpEvent::Detected { .. }));
        match events.try_recv().unwrap() {
            PumpEvent::Exit(signal) => {
                assert_eq!(signal.token_address, "MINT");
                assert_eq!(signal.reason, ExitReason::MomentumLost);
                assert!((signal.realized_profit_percent - 30.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // No double accounting
        h.monitor.update_active_pumps().await;
        assert!(h.monitor.exit_pump("MINT", ExitReason::MomentumLost).is_none());
        assert_eq!(h.monitor.get_history(10).len(), 1);
        assert_eq!(h.monitor.get_stats().pumps_exited, 1);
    }

    #[tokio::test]
    async fn test_stale_pump_is_evicted_without_history() {
        let h = harness();
        h.monitor
            .active_pumps
            .insert("OLD".to_string(), record("OLD", 25));
        h.monitor
            .active_pumps
            .insert("NEW".to_string(), record("NEW", 1));

        assert_eq!(h.monitor.cleanup_inactive_pumps(), 1);
        assert!(h.monitor.get_pump("OLD").is_none());
        assert!(h.monitor.get_pump("NEW").is_some());
        assert!(h.monitor.get_history(10).is_empty());
        assert_eq!(h.monitor.get_stats().pumps_evicted, 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_newest_first() {
        let h = harness_with(PumpThresholds {
            history_capacity: 2,
            ..PumpThresholds::default()
        });

        for token in ["A", "B", "C"] {
            h.monitor
                .active_pumps
                .insert(token.to_string(), record(token, 1));
            assert!(h
                .monitor
                .exit_pump(token, ExitReason::PriceRetracement)
                .is_some());
        }

        let history = h.monitor.get_history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].token_address, "C");
        assert_eq!(history[1].token_address, "B");
        assert_eq!(h.monitor.get_history(1).len(), 1);
    }

    #[tokio::test]
    async fn test_exited_pump_is_not_reopened_on_same_move() {
        let h = harness();
        script_pump(&h, "MINT");
        let mut events = h.monitor.subscribe_events();

        for _ in 0..5 {
            h.monitor.run_cycle().await;
        }

        let stats = h.monitor.get_stats();
        assert_eq!(stats.pumps_detected, 1);
        assert_eq!(stats.pumps_exited, 1);
        assert_eq!(h.monitor.get_history(10).len(), 1);
        assert!(h.monitor.get_active_pumps().is_empty());

        assert!(matches!(events.try_recv().unwrap(), PumpEvent::Detected { .. }));
        assert!(matches!(events.try_recv().unwrap(), PumpEvent::Exit(_)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fresh_rise_after_exit_is_measured_from_exit_price() {
        let h = harness();
        script_pump(&h, "MINT");
        h.monitor.run_cycle().await;
        h.monitor.run_cycle().await;
        assert_eq!(h.monitor.get_stats().pumps_exited, 1);

        // 130 -> 150 is only +15.4% over the exit price
        h.gateway.set_prices("MINT", vec![100.0, 130.0, 150.0]);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 0);

        h.gateway.set_prices("MINT", vec![100.0, 130.0, 160.0]);
        assert_eq!(h.monitor.detect_new_pumps().await.unwrap(), 1);
        assert_eq!(h.monitor.get_pump("MINT").unwrap().start_price, 130.0);
    }

    #[tokio::test]
    async fn test_cycle_runs_update_then_detect_then_cleanup() {
        let h = harness_with(never_exit());
        script_pump(&h, "MINT");
        h.monitor
            .active_pumps
            .insert("OLD".to_string(), record("OLD", 25));

        h.monitor.run_cycle().await;

        // Detected after the update pass, so not yet refreshed
        let pump = h.monitor.get_pump("MINT").unwrap();
        assert_eq!(pump.last_updated, pump.start_time);
        // Stale record survives its failed refresh, then cleanup evicts it
        assert!(h.monitor.get_pump("OLD").is_none());
        assert_eq!(h.monitor.get_stats().pumps_evicted, 1);
        assert!(h.monitor.get_history(10).is_empty());

        h.gateway.set_spot_price("MINT", 140.0);
        h.monitor.run_cycle().await;
        let pump = h.monitor.get_pump("MINT").unwrap();
        assert_eq!(pump.current_price, 140.0);
        assert_eq!(pump.peak_price, 140.0);
    }

    #[test]
    fn test_detection_window_rebases_on_higher_exit() {
        let (start, change) = detection_window(&[100.0, 130.0], None).unwrap();
        assert_eq!(start, 100.0);
        assert!((change - 30.0).abs() < 1e-9);
        assert_eq!(detection_window(&[100.0, 130.0], Some(130.0)), Some((130.0, 0.0)));
        // A lower exit price leaves the window start in charge
        let (start, change) = detection_window(&[100.0, 130.0], Some(90.0)).unwrap();
        assert_eq!(start, 100.0);
        assert!((change - 30.0).abs() < 1e-9);
        assert!(detection_window(&[100.0], Some(90.0)).is_none());
    }

    #[test]
    fn test_volume_helpers() {
        assert_eq!(volume_increase(&[10.0, 25.0]), Some(1.5));
        assert_eq!(volume_increase(&[0.0, 25.0]), None);
        assert_eq!(tail(vec![1.0, 2.0, 3.0], 2), vec![2.0, 3.0]);
        assert_eq!(tail(vec![1.0], 5), vec![1.0]);
    }
}
