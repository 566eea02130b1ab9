//! PumpWatch monitoring modules

pub mod pump_monitor;
pub mod scoring;
pub mod whale_tracker;

pub use pump_monitor::PumpMonitor;
pub use whale_tracker::WhaleTracker;
