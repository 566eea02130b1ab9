//! Utility modules

pub mod alerts;
pub mod dexscreener;
pub mod history;
pub mod logger;
pub mod metrics;
pub mod solana;

pub use alerts::AlertService;
pub use logger::init_logger;
pub use metrics::MetricsService;
pub use solana::SolanaService;
