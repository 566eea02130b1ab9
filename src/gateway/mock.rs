//! Scripted in-memory gateway for tests

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use super::{GatewayError, GatewayResult, MarketDataGateway, RawTransaction, SwapDetails};

#[derive(Default)]
struct MockState {
    tracked: Vec<String>,
    prices: HashMap<String, Vec<f64>>,
    spot: HashMap<String, f64>,
    volumes: HashMap<String, Vec<f64>>,
    liquidity_changes: HashMap<String, Vec<f64>>,
    liquidity: HashMap<String, f64>,
    market_caps: HashMap<String, f64>,
    latest_block: Option<u64>,
    blocks: HashMap<u64, Vec<RawTransaction>>,
    swaps: HashMap<String, SwapDetails>,
    balances: HashMap<(String, String), f64>,
    contracts: HashSet<String>,
    failing_ops: HashSet<&'static str>,
    failing_hashes: HashSet<String>,
}

/// Gateway whose answers are set up by the test and can be changed between cycles
#[derive(Default)]
pub struct MockGateway {
    state: RwLock<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, token: &str) {
        let mut state = self.state.write();
        if !state.tracked.iter().any(|t| t == token) {
            state.tracked.push(token.to_string());
        }
    }

    pub fn set_prices(&self, token: &str, prices: Vec<f64>) {
        self.state.write().prices.insert(token.to_string(), prices);
    }

    pub fn set_spot_price(&self, token: &str, price: f64) {
        self.state.write().spot.insert(token.to_string(), price);
    }

    pub fn set_volumes(&self, token: &str, volumes: Vec<f64>) {
        self.state.write().volumes.insert(token.to_string(), volumes);
    }

    pub fn set_liquidity_changes(&self, token: &str, changes: Vec<f64>) {
        self.state
            .write()
            .liquidity_changes
            .insert(token.to_string(), changes);
    }

    pub fn set_liquidity(&self, token: &str, liquidity: f64, market_cap: f64) {
        let mut state = self.state.write();
        state.liquidity.insert(token.to_string(), liquidity);
        state.market_caps.insert(token.to_string(), market_cap);
    }

    pub fn set_latest_block(&self, block: u64) {
        self.state.write().latest_block = Some(block);
    }

    /// Put a transaction in `block` and describe how it classifies
    pub fn add_transaction(&self, tx: RawTransaction, swap: Option<SwapDetails>) {
        let mut state = self.state.write();
        if let Some(swap) = swap {
            state.swaps.insert(tx.hash.clone(), swap);
        }
        state.blocks.entry(tx.block).or_default().push(tx);
    }

    pub fn set_balance(&self, token: &str, wallet: &str, balance: f64) {
        self.state
            .write()
            .balances
            .insert((token.to_string(), wallet.to_string()), balance);
    }

    pub fn mark_contract(&self, address: &str) {
        self.state.write().contracts.insert(address.to_string());
    }

    /// Make every call of the named operation fail until `recover` is called
    pub fn fail(&self, op: &'static str) {
        self.state.write().failing_ops.insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.state.write().failing_ops.remove(op);
    }

    /// Make inspection of one transaction fail
    pub fn fail_inspection(&self, hash: &str) {
        self.state.write().failing_hashes.insert(hash.to_string());
    }

    fn check(&self, op: &'static str) -> GatewayResult<()> {
        if self.state.read().failing_ops.contains(op) {
            Err(GatewayError::Timeout(op.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketDataGateway for MockGateway {
    async fn get_tracked_tokens(&self) -> GatewayResult<Vec<String>> {
        self.check("tracked_tokens")?;
        Ok(self.state.read().tracked.clone())
    }

    async fn get_token_price(&self, token: &str) -> GatewayResult<Option<f64>> {
        self.check("token_price")?;
        let state = self.state.read();
        Ok(state
            .spot
            .get(token)
            .copied()
            .or_else(|| state.prices.get(token).and_then(|p| p.last().copied())))
    }

    async fn get_recent_price_series(&self, token: &str) -> GatewayResult<Vec<f64>> {
        self.check("price_series")?;
        Ok(self.state.read().prices.get(token).cloned().unwrap_or_default())
    }

    async fn get_recent_volume_series(&self, token: &str) -> GatewayResult<Vec<f64>> {
        self.check("volume_series")?;
        Ok(self.state.read().volumes.get(token).cloned().unwrap_or_default())
    }

    async fn get_liquidity_change_series(&self, token: &str) -> GatewayResult<Vec<f64>> {
        self.check("liquidity_changes")?;
        Ok(self
            .state
            .read()
            .liquidity_changes
            .get(token)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_current_liquidity(&self, token: &str) -> GatewayResult<f64> {
        self.check("liquidity")?;
        self.state
            .read()
            .liquidity
            .get(token)
            .copied()
            .ok_or_else(|| GatewayError::NoData(token.to_string()))
    }

    async fn get_market_cap(&self, token: &str) -> GatewayResult<f64> {
        self.check("market_cap")?;
        Ok(self.state.read().market_caps.get(token).copied().unwrap_or(0.0))
    }

    async fn get_latest_block(&self) -> GatewayResult<u64> {
        self.check("latest_block")?;
        self.state
            .read()
            .latest_block
            .ok_or_else(|| GatewayError::NoData("latest block".to_string()))
    }

    async fn get_recent_transactions(&self, block: u64) -> GatewayResult<Vec<RawTransaction>> {
        self.check("transactions")?;
        Ok(self.state.read().blocks.get(&block).cloned().unwrap_or_default())
    }

    async fn get_token_balance(&self, token: &str, wallet: &str) -> GatewayResult<f64> {
        self.check("token_balance")?;
        Ok(self
            .state
            .read()
            .balances
            .get(&(token.to_string(), wallet.to_string()))
            .copied()
            .unwrap_or(0.0))
    }

    async fn is_contract_address(&self, address: &str) -> GatewayResult<bool> {
        self.check("is_contract")?;
        Ok(self.state.read().contracts.contains(address))
    }

    async fn inspect_transaction(&self, tx: &RawTransaction) -> GatewayResult<Option<SwapDetails>> {
        self.check("inspect")?;
        let state = self.state.read();
        if state.failing_hashes.contains(&tx.hash) {
            return Err(GatewayError::Malformed(tx.hash.clone()));
        }
        Ok(state.swaps.get(&tx.hash).cloned())
    }
}
