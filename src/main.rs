//! PumpWatch - DEX pump detection and whale flow monitoring
//!
//! Two cooperating polling loops:
//! - Whale Tracker: retains whale-sized swaps, positions and sentiment per token
//! - Pump Monitor: detects and validates pumps, scores their health, emits exits
//!
//! This is a **monitoring-only** tool - exit signals are published, never traded.

mod config;
mod dashboard;
mod gateway;
mod modules;
mod utils;

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use config::Config;
use dashboard::DashboardServer;
use gateway::{LiveGateway, MarketDataGateway};
use modules::pump_monitor::PumpEvent;
use modules::{PumpMonitor, WhaleTracker};
use utils::{init_logger, AlertService, MetricsService, SolanaService};

const BANNER: &str = r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║                                                           ║
    ║   ██████╗ ██╗   ██╗███╗   ███╗██████╗                     ║
    ║   ██╔══██╗██║   ██║████╗ ████║██╔══██╗                    ║
    ║   ██████╔╝██║   ██║██╔████╔██║██████╔╝  W A T C H         ║
    ║   ██╔═══╝ ██║   ██║██║╚██╔╝██║██╔═══╝                     ║
    ║   ██║     ╚██████╔╝██║ ╚═╝ ██║██║                         ║
    ║   ╚═╝      ╚═════╝ ╚═╝     ╚═╝╚═╝                         ║
    ║                                                           ║
    ║   🚀 Pump Monitor | 🐋 Whale Tracker (Monitor-Only Mode)  ║
    ║                                                           ║
    ╚═══════════════════════════════════════════════════════════╝
"#;

/// PumpWatch application
pub struct PumpWatch {
    config: Config,
    gateway: Arc<LiveGateway>,
    alerts: Arc<AlertService>,
    metrics: Arc<MetricsService>,
    whale_tracker: Arc<WhaleTracker>,
    pump_monitor: PumpMonitor,
}

impl PumpWatch {
    /// Create a new PumpWatch instance from an already loaded config
    pub fn new(config: Config) -> Result<Self> {
        // Initialize services
        let solana = Arc::new(SolanaService::new(&config));
        let gateway = Arc::new(LiveGateway::new(&config, solana)?);
        let alerts = Arc::new(AlertService::new(config.clone()));
        let metrics = Arc::new(MetricsService::new()?);

        // Both trackers see the market only through the gateway trait
        let market: Arc<dyn MarketDataGateway> = gateway.clone();

        let whale_tracker = Arc::new(WhaleTracker::new(
            &config,
            Arc::clone(&market),
            Arc::clone(&metrics),
        ));

        let pump_monitor = PumpMonitor::new(
            &config,
            Arc::clone(&market),
            Arc::clone(&whale_tracker),
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            gateway,
            alerts,
            metrics,
            whale_tracker,
            pump_monitor,
        })
    }

    /// Start PumpWatch
    pub async fn start(&self) -> Result<()> {
        println!("{}", BANNER);

        info!(target: "PUMPWATCH", "Initializing PumpWatch...");

        // Link modules FIRST so no pump event is missed during startup
        self.link_modules();

        self.gateway.start_sampling().await;

        info!(target: "PUMPWATCH", "Starting monitoring modules...");

        let (wt_result, pm_result) =
            tokio::join!(self.whale_tracker.start(), self.pump_monitor.start());

        wt_result?;
        pm_result?;

        info!(target: "PUMPWATCH", "✅ All modules started successfully!");
        info!(target: "PUMPWATCH", "Dashboard: http://localhost:{}", self.config.dashboard_port);

        let dashboard = DashboardServer::new(
            &self.config,
            self.pump_monitor.clone(),
            Arc::clone(&self.whale_tracker),
            Arc::clone(&self.alerts),
            Arc::clone(&self.metrics),
        );

        dashboard.start().await?;

        Ok(())
    }

    /// Forward pump events to the alert service
    fn link_modules(&self) {
        let mut pump_rx = self.pump_monitor.subscribe_events();
        let alerts = Arc::clone(&self.alerts);

        tokio::spawn(async move {
            loop {
                match pump_rx.recv().await {
                    Ok(PumpEvent::Detected {
                        token_address,
                        price_change_percent,
                        momentum_score,
                        sustainability_score,
                        ..
                    }) => {
                        if let Err(e) = alerts
                            .alert_pump_detected(
                                &token_address,
                                price_change_percent,
                                momentum_score,
                                sustainability_score,
                            )
                            .await
                        {
                            error!(target: "PUMPWATCH", "Detection alert failed: {}", e);
                        }
                    }
                    Ok(PumpEvent::Exit(signal)) => {
                        if let Err(e) = alerts.alert_pump_exit(&signal).await {
                            error!(target: "PUMPWATCH", "Exit alert failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "PUMPWATCH", "Alert link lagged {} pump events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(target: "PUMPWATCH", "Pump event channel closed");
                        break;
                    }
                }
            }
        });

        info!(target: "PUMPWATCH", "Modules linked - pump events will be alerted");
    }

    /// Graceful shutdown
    pub async fn shutdown(&self) {
        info!(target: "PUMPWATCH", "Shutting down...");

        self.pump_monitor.stop();
        self.whale_tracker.stop();
        self.gateway.stop();

        info!(target: "PUMPWATCH", "✅ Shutdown complete");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(target: "PUMPWATCH", "Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(target: "PUMPWATCH", "Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_logger(config.log_json);

    let pumpwatch = match PumpWatch::new(config) {
        Ok(pw) => pw,
        Err(e) => {
            error!(target: "PUMPWATCH", "Failed to initialize: {}", e);
            return Err(e);
        }
    };

    // Run the application
    tokio::select! {
        result = pumpwatch.start() => {
            if let Err(e) = result {
                error!(target: "PUMPWATCH", "Fatal error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            pumpwatch.shutdown().await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_keeps_supplied_config() {
        let config = Config {
            dashboard_port: 4321,
            tracked_tokens: vec!["MINT".to_string()],
            ..Config::default()
        };

        let pumpwatch = PumpWatch::new(config).unwrap();

        assert_eq!(pumpwatch.config.dashboard_port, 4321);
        assert_eq!(pumpwatch.config.tracked_tokens, vec!["MINT".to_string()]);
        assert_eq!(
            pumpwatch.gateway.get_tracked_tokens().await.unwrap(),
            vec!["MINT".to_string()]
        );
    }
}
