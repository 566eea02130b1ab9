//! Alert service for Telegram and WebSocket notifications

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::Config;
use crate::modules::pump_monitor::ExitSignal;
use crate::utils::history::BoundedHistory;
use crate::utils::solana::SolanaService;

const ALERT_HISTORY_CAPACITY: usize = 1000;

/// Alert data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: String,
}

/// Alert service for sending notifications
pub struct AlertService {
    config: Config,
    telegram_client: Option<reqwest::Client>,
    alert_history: Arc<RwLock<BoundedHistory<Alert>>>,
    alert_sender: broadcast::Sender<Alert>,
    next_id: Arc<RwLock<i64>>,
}

impl AlertService {
    /// Create a new alert service
    pub fn new(config: Config) -> Self {
        let telegram_client = match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(_), Some(_)) => Some(reqwest::Client::new()),
            _ => None,
        };

        if telegram_client.is_some() {
            info!(target: "ALERTS", "Telegram notifications enabled");
        }

        let (alert_sender, _) = broadcast::channel(1000);

        Self {
            config,
            telegram_client,
            alert_history: Arc::new(RwLock::new(BoundedHistory::new(ALERT_HISTORY_CAPACITY))),
            alert_sender,
            next_id: Arc::new(RwLock::new(1)),
        }
    }

    /// Subscribe to alerts
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alert_sender.subscribe()
    }

    /// Send an alert
    pub async fn send_alert(
        &self,
        alert_type: &str,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> Result<Alert> {
        let id = {
            let mut next_id = self.next_id.write();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let alert = Alert {
            id,
            alert_type: alert_type.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        };

        self.alert_history.write().push(alert.clone());

        // Broadcast to subscribers
        let _ = self.alert_sender.send(alert.clone());

        // Send to Telegram
        if let (Some(client), Some(token), Some(chat_id)) = (
            &self.telegram_client,
            &self.config.telegram_bot_token,
            &self.config.telegram_chat_id,
        ) {
            let emoji = self.get_emoji(alert_type);
            let telegram_message = format!("{} *{}*\n\n{}", emoji, title, message);

            let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
            let params = serde_json::json!({
                "chat_id": chat_id,
                "text": telegram_message,
                "parse_mode": "Markdown",
                "disable_web_page_preview": true,
            });

            if let Err(e) = client.post(&url).json(&params).send().await {
                error!(target: "ALERTS", "Telegram send failed: {}", e);
            }
        }

        Ok(alert)
    }

    fn get_emoji(&self, alert_type: &str) -> &'static str {
        match alert_type {
            "pump_detected" => "🚀",
            "pump_exit" => "🛑",
            _ => "📢",
        }
    }

    /// Get recent alerts, newest first
    pub fn get_recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alert_history.read().newest(limit)
    }

    // ============================================
    // SPECIFIC ALERT METHODS
    // ============================================

    pub async fn alert_pump_detected(
        &self,
        token_address: &str,
        price_change_percent: f64,
        momentum_score: f64,
        sustainability_score: f64,
    ) -> Result<Alert> {
        let message = format!(
            "Token: `{}`\nRise: {:.1}%\nMomentum: {:.2}\nSustainability: {:.2}",
            token_address, price_change_percent, momentum_score, sustainability_score
        );

        self.send_alert(
            "pump_detected",
            &format!(
                "Pump Detected - {}",
                SolanaService::shorten_address(token_address, 4)
            ),
            &message,
            serde_json::json!({
                "token_address": token_address,
                "price_change_percent": price_change_percent,
                "momentum_score": momentum_score,
                "sustainability_score": sustainability_score,
            }),
        )
        .await
    }

    pub async fn alert_pump_exit(&self, signal: &ExitSignal) -> Result<Alert> {
        let message = format!(
            "Token: `{}`\nReason: {}\nRealized: {:+.1}%\nPeak: {:+.1}%",
            signal.token_address,
            signal.reason.as_str(),
            signal.realized_profit_percent,
            signal.peak_profit_percent
        );

        self.send_alert(
            "pump_exit",
            &format!(
                "Exit Signal - {}",
                SolanaService::shorten_address(&signal.token_address, 4)
            ),
            &message,
            serde_json::to_value(signal)?,
        )
        .await
    }
}

impl Clone for AlertService {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            telegram_client: self.telegram_client.clone(),
            alert_history: Arc::clone(&self.alert_history),
            alert_sender: self.alert_sender.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}
