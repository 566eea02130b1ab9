//! Pump quality scoring
//!
//! Pure functions over price, volume and liquidity samples. Empty or too-short
//! inputs resolve to neutral values instead of failing.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::gateway::TransactionKind;
use crate::modules::whale_tracker::WhaleActivity;

/// Blend weights for the two scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub momentum_price: f64,
    pub momentum_volume: f64,
    pub sustain_whale: f64,
    pub sustain_liquidity: f64,
    pub sustain_volume: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            momentum_price: 0.7,
            momentum_volume: 0.3,
            sustain_whale: 0.4,
            sustain_liquidity: 0.3,
            sustain_volume: 0.3,
        }
    }
}

impl ScoreWeights {
    pub fn from_config(config: &Config) -> Self {
        Self {
            momentum_price: config.momentum_price_weight,
            momentum_volume: config.momentum_volume_weight,
            sustain_whale: config.sustain_whale_weight,
            sustain_liquidity: config.sustain_liquidity_weight,
            sustain_volume: config.sustain_volume_weight,
        }
    }
}

pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Fractional change between consecutive samples; steps from zero are skipped
pub fn pct_changes(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Mean period-over-period volume change, 0 with fewer than 2 samples
pub fn volume_momentum(volumes: &[f64]) -> f64 {
    if volumes.len() < 2 {
        return 0.0;
    }
    mean(&pct_changes(volumes))
}

/// `1 - min(1, stddev(pct_changes))`, 1.0 when there are too few changes to judge
pub fn stability(values: &[f64]) -> f64 {
    let changes = pct_changes(values);
    if changes.len() < 2 {
        return 1.0;
    }
    1.0 - std_dev(&changes).min(1.0)
}

/// Share of whale volume that is buying, 1.0 with no whale volume at all
pub fn whale_pressure(activity: &[WhaleActivity]) -> f64 {
    let (buy, sell) = activity
        .iter()
        .fold((0.0, 0.0), |(buy, sell), a| match a.kind {
            TransactionKind::Buy => (buy + a.amount, sell),
            TransactionKind::Sell => (buy, sell + a.amount),
        });

    let total = buy + sell;
    if total <= 0.0 {
        1.0
    } else {
        buy / total
    }
}

pub fn momentum_score(
    start_price: f64,
    current_price: f64,
    volumes: &[f64],
    weights: &ScoreWeights,
) -> f64 {
    let price_momentum = if start_price > 0.0 {
        current_price / start_price - 1.0
    } else {
        0.0
    };

    clamp01(
        weights.momentum_price * price_momentum + weights.momentum_volume * volume_momentum(volumes),
    )
}

pub fn sustainability_score(
    activity: &[WhaleActivity],
    liquidity_changes: &[f64],
    volumes: &[f64],
    weights: &ScoreWeights,
) -> f64 {
    clamp01(
        weights.sustain_whale * whale_pressure(activity)
            + weights.sustain_liquidity * stability(liquidity_changes)
            + weights.sustain_volume * stability(volumes),
    )
}
