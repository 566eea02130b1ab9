//! Configuration module for PumpWatch

use std::env;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Solana RPC (read-only)
    pub rpc_url: String,
    pub rpc_timeout_secs: u64,

    // Market data
    pub dexscreener_url: String,
    pub tracked_tokens: Vec<String>,
    pub market_sample_interval_secs: u64,
    pub market_series_len: usize,

    // Telegram Alerts
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Whale Tracker
    pub min_whale_amount: f64,
    pub max_transaction_age_secs: i64,
    pub scan_interval_secs: u64,
    pub price_impact_threshold: f64,
    pub max_blocks_per_scan: u64,

    // Pump Monitor
    pub min_pump_threshold: f64,
    pub volume_window: usize,
    pub momentum_threshold: f64,
    pub sustainability_threshold: f64,
    pub whale_impact_threshold: f64,
    pub min_liquidity_ratio: f64,

    // Score weights
    pub momentum_price_weight: f64,
    pub momentum_volume_weight: f64,
    pub sustain_whale_weight: f64,
    pub sustain_liquidity_weight: f64,
    pub sustain_volume_weight: f64,

    // Logging
    pub log_json: bool,

    // Dashboard
    pub dashboard_port: u16,
}

/// Read and parse an env var, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            rpc_url: env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            rpc_timeout_secs: env_or("RPC_TIMEOUT_SECS", 10),

            dexscreener_url: env::var("DEXSCREENER_URL")
                .unwrap_or_else(|_| "https://api.dexscreener.com/latest/dex/tokens".to_string()),
            tracked_tokens: env::var("TRACKED_TOKENS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            market_sample_interval_secs: env_or("MARKET_SAMPLE_INTERVAL_SECS", 5),
            market_series_len: env_or("MARKET_SERIES_LEN", 120),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),

            min_whale_amount: env_or("MIN_WHALE_AMOUNT", 100.0),
            max_transaction_age_secs: env_or("MAX_TRANSACTION_AGE_SECS", 86_400),
            scan_interval_secs: env_or("SCAN_INTERVAL_SECS", 10),
            price_impact_threshold: env_or("PRICE_IMPACT_THRESHOLD", 2.0),
            max_blocks_per_scan: env_or("MAX_BLOCKS_PER_SCAN", 25),

            min_pump_threshold: env_or("MIN_PUMP_THRESHOLD", 20.0),
            volume_window: env_or("VOLUME_WINDOW", 12),
            momentum_threshold: env_or("MOMENTUM_THRESHOLD", 0.7),
            sustainability_threshold: env_or("SUSTAINABILITY_THRESHOLD", 0.6),
            whale_impact_threshold: env_or("WHALE_IMPACT_THRESHOLD", 0.3),
            min_liquidity_ratio: env_or("MIN_LIQUIDITY_RATIO", 0.1),

            momentum_price_weight: env_or("MOMENTUM_PRICE_WEIGHT", 0.7),
            momentum_volume_weight: env_or("MOMENTUM_VOLUME_WEIGHT", 0.3),
            sustain_whale_weight: env_or("SUSTAIN_WHALE_WEIGHT", 0.4),
            sustain_liquidity_weight: env_or("SUSTAIN_LIQUIDITY_WEIGHT", 0.3),
            sustain_volume_weight: env_or("SUSTAIN_VOLUME_WEIGHT", 0.3),

            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),

            dashboard_port: env_or("DASHBOARD_PORT", 3000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("PUMPWATCH_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("PUMPWATCH_TEST_GARBAGE", 7u64), 7);
        env::set_var("PUMPWATCH_TEST_VALUE", " 42 ");
        assert_eq!(env_or("PUMPWATCH_TEST_VALUE", 7u64), 42);
        assert_eq!(env_or("PUMPWATCH_TEST_UNSET_KEY", 0.5f64), 0.5);
    }
}
