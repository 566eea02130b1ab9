//! Prometheus metrics service for PumpWatch

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;
use tracing::info;

/// Metrics service for Prometheus
pub struct MetricsService {
    registry: Registry,
    start_time: Instant,

    // Pump Monitor metrics
    pub pumps_detected: Counter,
    pub pumps_rejected: CounterVec,
    pub pump_exits: CounterVec,
    pub pumps_evicted: Counter,
    pub active_pumps: Gauge,
    pub momentum_score: GaugeVec,
    pub sustainability_score: GaugeVec,

    // Whale Tracker metrics
    pub whale_transactions: CounterVec,
    pub whale_volume: CounterVec,
    pub high_impact_transactions: Counter,
    pub whale_wallets: Gauge,
    pub whale_tokens: Gauge,
    pub whale_positions: Gauge,

    // System metrics
    pub gateway_errors: CounterVec,
    pub cycle_duration: HistogramVec,
    pub module_status: GaugeVec,
    pub uptime: Gauge,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        // Pump Monitor metrics
        let pumps_detected = Counter::new("pumpwatch_pumps_detected_total", "Validated pumps")?;
        let pumps_rejected = CounterVec::new(
            Opts::new("pumpwatch_pumps_rejected_total", "Pump candidates rejected"),
            &["reason"],
        )?;
        let pump_exits = CounterVec::new(
            Opts::new("pumpwatch_pump_exits_total", "Exit signals emitted"),
            &["reason"],
        )?;
        let pumps_evicted =
            Counter::new("pumpwatch_pumps_evicted_total", "Pumps evicted for staleness")?;
        let active_pumps = Gauge::new("pumpwatch_active_pumps", "Pumps currently tracked")?;
        let momentum_score = GaugeVec::new(
            Opts::new("pumpwatch_pump_momentum_score", "Per-token momentum score"),
            &["token"],
        )?;
        let sustainability_score = GaugeVec::new(
            Opts::new(
                "pumpwatch_pump_sustainability_score",
                "Per-token sustainability score",
            ),
            &["token"],
        )?;

        // Whale Tracker metrics
        let whale_transactions = CounterVec::new(
            Opts::new("pumpwatch_whale_transactions_total", "Whale transactions"),
            &["type"],
        )?;
        let whale_volume = CounterVec::new(
            Opts::new("pumpwatch_whale_volume_sol_total", "Whale volume in SOL"),
            &["type"],
        )?;
        let high_impact_transactions = Counter::new(
            "pumpwatch_high_impact_transactions_total",
            "Whale transactions above the price impact threshold",
        )?;
        let whale_wallets = Gauge::new("pumpwatch_whale_wallets", "Active whale wallets")?;
        let whale_tokens = Gauge::new("pumpwatch_whale_tokens", "Tokens with whale history")?;
        let whale_positions = Gauge::new("pumpwatch_whale_positions", "Open whale positions")?;

        // System metrics
        let gateway_errors = CounterVec::new(
            Opts::new("pumpwatch_gateway_errors_total", "Market data gateway failures"),
            &["operation", "kind"],
        )?;
        let cycle_duration = HistogramVec::new(
            HistogramOpts::new("pumpwatch_cycle_duration_seconds", "Polling loop cycle time")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["loop"],
        )?;
        let module_status = GaugeVec::new(
            Opts::new("pumpwatch_module_running", "Module status"),
            &["module"],
        )?;
        let uptime = Gauge::new("pumpwatch_uptime_seconds", "Application uptime")?;

        // Register all metrics
        registry.register(Box::new(pumps_detected.clone()))?;
        registry.register(Box::new(pumps_rejected.clone()))?;
        registry.register(Box::new(pump_exits.clone()))?;
        registry.register(Box::new(pumps_evicted.clone()))?;
        registry.register(Box::new(active_pumps.clone()))?;
        registry.register(Box::new(momentum_score.clone()))?;
        registry.register(Box::new(sustainability_score.clone()))?;
        registry.register(Box::new(whale_transactions.clone()))?;
        registry.register(Box::new(whale_volume.clone()))?;
        registry.register(Box::new(high_impact_transactions.clone()))?;
        registry.register(Box::new(whale_wallets.clone()))?;
        registry.register(Box::new(whale_tokens.clone()))?;
        registry.register(Box::new(whale_positions.clone()))?;
        registry.register(Box::new(gateway_errors.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(module_status.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        info!(target: "METRICS", "Prometheus metrics initialized");

        Ok(Self {
            registry,
            start_time: Instant::now(),
            pumps_detected,
            pumps_rejected,
            pump_exits,
            pumps_evicted,
            active_pumps,
            momentum_score,
            sustainability_score,
            whale_transactions,
            whale_volume,
            high_impact_transactions,
            whale_wallets,
            whale_tokens,
            whale_positions,
            gateway_errors,
            cycle_duration,
            module_status,
            uptime,
        })
    }

    /// Record a whale transaction
    pub fn record_whale_transaction(&self, tx_type: &str, volume_sol: f64) {
        self.whale_transactions.with_label_values(&[tx_type]).inc();
        self.whale_volume
            .with_label_values(&[tx_type])
            .inc_by(volume_sol);
    }

    pub fn record_gateway_error(&self, operation: &str, kind: &str) {
        self.gateway_errors.with_label_values(&[operation, kind]).inc();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.pumps_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_exit(&self, reason: &str) {
        self.pump_exits.with_label_values(&[reason]).inc();
    }

    pub fn set_pump_scores(&self, token: &str, momentum: f64, sustainability: f64) {
        self.momentum_score.with_label_values(&[token]).set(momentum);
        self.sustainability_score
            .with_label_values(&[token])
            .set(sustainability);
    }

    /// Drop per-token gauges once a pump is no longer tracked
    pub fn clear_pump_scores(&self, token: &str) {
        let _ = self.momentum_score.remove_label_values(&[token]);
        let _ = self.sustainability_score.remove_label_values(&[token]);
    }

    pub fn observe_cycle(&self, loop_name: &str, seconds: f64) {
        self.cycle_duration
            .with_label_values(&[loop_name])
            .observe(seconds);
    }

    /// Set module status
    pub fn set_module_status(&self, module: &str, running: bool) {
        self.module_status
            .with_label_values(&[module])
            .set(if running { 1.0 } else { 0.0 });
    }

    /// Get metrics as Prometheus text format
    pub fn get_metrics(&self) -> prometheus::Result<String> {
        // Update uptime
        self.uptime.set(self.start_time.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Clone for MetricsService {
    fn clone(&self) -> Self {
        // Prometheus handles are shared, so clones report into the same registry
        Self {
            registry: self.registry.clone(),
            start_time: self.start_time,
            pumps_detected: self.pumps_detected.clone(),
            pumps_rejected: self.pumps_rejected.clone(),
            pump_exits: self.pump_exits.clone(),
            pumps_evicted: self.pumps_evicted.clone(),
            active_pumps: self.active_pumps.clone(),
            momentum_score: self.momentum_score.clone(),
            sustainability_score: self.sustainability_score.clone(),
            whale_transactions: self.whale_transactions.clone(),
            whale_volume: self.whale_volume.clone(),
            high_impact_transactions: self.high_impact_transactions.clone(),
            whale_wallets: self.whale_wallets.clone(),
            whale_tokens: self.whale_tokens.clone(),
            whale_positions: self.whale_positions.clone(),
            gateway_errors: self.gateway_errors.clone(),
            cycle_duration: self.cycle_duration.clone(),
            module_status: self.module_status.clone(),
            uptime: self.uptime.clone(),
        }
    }
}
