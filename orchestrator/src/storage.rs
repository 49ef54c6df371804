// Persistence seam
// The engine assumes nothing about storage beyond this interface; the host
// wires in its actual backend. The in-memory implementation backs tests.

use anyhow::Result;
use common::{Signal, SignalState};
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Persist a newly opened signal
    async fn save(&self, signal: &Signal) -> Result<()>;

    /// Persist a state change to an existing signal
    async fn update(&self, signal: &Signal) -> Result<()>;

    /// All signals currently ACTIVE
    async fn list_active(&self) -> Result<Vec<Signal>>;

    /// Total account value as of now
    async fn portfolio_value(&self) -> Result<f64>;
}

/// In-memory signal store (for testing and development)
pub struct MemorySignalStore {
    signals: tokio::sync::RwLock<HashMap<Uuid, Signal>>,
    portfolio_value: tokio::sync::RwLock<f64>,
}

impl MemorySignalStore {
    pub fn new(portfolio_value: f64) -> Self {
        Self {
            signals: tokio::sync::RwLock::new(HashMap::new()),
            portfolio_value: tokio::sync::RwLock::new(portfolio_value),
        }
    }

    pub async fn set_portfolio_value(&self, value: f64) {
        *self.portfolio_value.write().await = value;
    }

    pub async fn get(&self, id: Uuid) -> Option<Signal> {
        self.signals.read().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<Signal> {
        self.signals.read().await.values().cloned().collect()
    }

    /// Seed a signal directly, bypassing validation (test setup only)
    pub async fn insert(&self, signal: Signal) {
        self.signals.write().await.insert(signal.id, signal);
    }
}

#[async_trait::async_trait]
impl SignalStore for MemorySignalStore {
    async fn save(&self, signal: &Signal) -> Result<()> {
        let mut signals = self.signals.write().await;
        signals.insert(signal.id, signal.clone());
        Ok(())
    }

    async fn update(&self, signal: &Signal) -> Result<()> {
        let mut signals = self.signals.write().await;
        if !signals.contains_key(&signal.id) {
            anyhow::bail!("unknown signal {}", signal.id);
        }
        signals.insert(signal.id, signal.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        Ok(signals
            .values()
            .filter(|s| s.state == SignalState::Active)
            .cloned()
            .collect())
    }

    async fn portfolio_value(&self) -> Result<f64> {
        Ok(*self.portfolio_value.read().await)
    }
}
