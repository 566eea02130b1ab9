//! Solana RPC service for PumpWatch (read-only, no wallet)

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use solana_account_decoder::UiAccountData;
use solana_client::{
    nonblocking::rpc_client::RpcClient, rpc_config::RpcBlockConfig,
    rpc_request::TokenAccountsFilter,
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use solana_transaction_status::{
    option_serializer::OptionSerializer, EncodedTransaction, EncodedTransactionWithStatusMeta,
    TransactionDetails, UiMessage, UiTransactionEncoding, UiTransactionTokenBalance,
};
use std::collections::HashMap;
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gateway::{RawTransaction, TokenDelta};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

type BalanceKey = (String, String);

/// Solana service for RPC interactions
pub struct SolanaService {
    pub client: Arc<RpcClient>,
}

impl SolanaService {
    /// Create a new Solana service
    pub fn new(config: &Config) -> Self {
        let client = Arc::new(RpcClient::new_with_timeout_and_commitment(
            config.rpc_url.clone(),
            Duration::from_secs(config.rpc_timeout_secs),
            CommitmentConfig::confirmed(),
        ));

        info!(target: "SOLANA", "Connected to Solana RPC (read-only mode)");

        Self { client }
    }

    /// Current confirmed slot
    pub async fn get_slot(&self) -> Result<u64> {
        Ok(self.client.get_slot().await?)
    }

    /// Fetch a block and flatten its successful transactions, with retry on rate limiting
    pub async fn get_block_transactions(&self, slot: u64) -> Result<Vec<RawTransaction>> {
        let config = RpcBlockConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            transaction_details: Some(TransactionDetails::Full),
            rewards: Some(false),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };

        let mut attempts = 0;
        let max_attempts = 3;
        let mut delay_ms = 500;

        let block = loop {
            match self.client.get_block_with_config(slot, config.clone()).await {
                Ok(block) => break block,
                Err(e) => {
                    let error_str = e.to_string();

                    // Check if rate limited (429)
                    if error_str.contains("429") && attempts < max_attempts {
                        attempts += 1;
                        warn!(
                            target: "SOLANA",
                            "Rate limited, retrying in {}ms (attempt {}/{})",
                            delay_ms, attempts, max_attempts
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms *= 2;
                        continue;
                    }

                    return Err(anyhow!("failed to get block {}: {}", slot, e));
                }
            }
        };

        let timestamp = block
            .block_time
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or_else(Utc::now);

        let transactions: Vec<RawTransaction> = block
            .transactions
            .unwrap_or_default()
            .iter()
            .filter_map(|tx| Self::parse_transaction(tx, slot, timestamp))
            .collect();

        debug!(target: "SOLANA", "Block {}: {} transactions", slot, transactions.len());
        Ok(transactions)
    }

    fn parse_transaction(
        tx: &EncodedTransactionWithStatusMeta,
        slot: u64,
        timestamp: DateTime<Utc>,
    ) -> Option<RawTransaction> {
        let meta = tx.meta.as_ref()?;
        if meta.err.is_some() {
            return None;
        }

        // Signature and fee payer
        let (hash, sender) = match &tx.transaction {
            EncodedTransaction::Json(ui_tx) => {
                let sender = match &ui_tx.message {
                    UiMessage::Parsed(msg) => msg.account_keys.first().map(|k| k.pubkey.clone()),
                    UiMessage::Raw(msg) => msg.account_keys.first().cloned(),
                }?;
                (ui_tx.signatures.first().cloned()?, sender)
            }
            _ => return None,
        };

        let value = match (meta.pre_balances.first(), meta.post_balances.first()) {
            (Some(pre), Some(post)) => {
                (*post as i64 - *pre as i64).unsigned_abs() as f64 / LAMPORTS_PER_SOL
            }
            _ => 0.0,
        };

        let token_deltas = collect_deltas(
            Self::balance_entries(&meta.pre_token_balances),
            Self::balance_entries(&meta.post_token_balances),
        );

        Some(RawTransaction {
            hash,
            sender,
            block: slot,
            timestamp,
            value,
            token_deltas,
        })
    }

    fn balance_entries(
        balances: &OptionSerializer<Vec<UiTransactionTokenBalance>>,
    ) -> Vec<(BalanceKey, f64)> {
        match balances {
            OptionSerializer::Some(balances) => balances
                .iter()
                .filter_map(|b| {
                    let owner = match &b.owner {
                        OptionSerializer::Some(owner) => owner.clone(),
                        _ => return None,
                    };
                    let amount = b.ui_token_amount.ui_amount_string.parse::<f64>().ok()?;
                    Some(((b.mint.clone(), owner), amount))
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Sum of an owner's token account balances for a mint
    pub async fn get_token_balance(&self, mint: &str, owner: &str) -> Result<f64> {
        let owner = Pubkey::from_str(owner)?;
        let mint = Pubkey::from_str(mint)?;

        let accounts = self
            .client
            .get_token_accounts_by_owner(&owner, TokenAccountsFilter::Mint(mint))
            .await?;

        let total = accounts
            .iter()
            .filter_map(|keyed| match &keyed.account.data {
                UiAccountData::Json(parsed) => parsed
                    .parsed
                    .get("info")?
                    .get("tokenAmount")?
                    .get("uiAmountString")?
                    .as_str()?
                    .parse::<f64>()
                    .ok(),
                _ => None,
            })
            .sum();

        Ok(total)
    }

    /// Whether the address is a program account
    pub async fn is_executable(&self, address: &str) -> Result<bool> {
        let pubkey = Pubkey::from_str(address)?;
        let response = self
            .client
            .get_account_with_commitment(&pubkey, CommitmentConfig::confirmed())
            .await?;
        Ok(response.value.map(|account| account.executable).unwrap_or(false))
    }

    /// Shorten an address for display
    pub fn shorten_address(address: &str, chars: usize) -> String {
        if address.len() <= chars * 2 || !address.is_ascii() {
            return address.to_string();
        }
        format!("{}...{}", &address[..chars], &address[address.len() - chars..])
    }
}

/// Net token movement per (mint, owner) between pre and post balances
fn collect_deltas(pre: Vec<(BalanceKey, f64)>, post: Vec<(BalanceKey, f64)>) -> Vec<TokenDelta> {
    let mut net: HashMap<BalanceKey, f64> = HashMap::new();
    for (key, amount) in pre {
        *net.entry(key).or_default() -= amount;
    }
    for (key, amount) in post {
        *net.entry(key).or_default() += amount;
    }

    net.into_iter()
        .filter(|(_, delta)| delta.abs() > f64::EPSILON)
        .map(|((mint, owner), delta)| TokenDelta { mint, owner, delta })
        .collect()
}
