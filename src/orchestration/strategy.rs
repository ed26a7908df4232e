//! Per-broker refresh strategies and their registry.

use super::types::{BrokerType, RefreshContext, TokenPayload};
use crate::error::{Result, SessionError};
use crate::ports::SessionRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// One way of obtaining a fresh token for a principal
#[async_trait]
pub trait RefreshStrategy: Send + Sync + Debug {
    /// Short name recorded in the audit log
    fn name(&self) -> &'static str;

    /// `current` is the session on record before this refresh started
    async fn refresh(&self, context: &RefreshContext, current: Option<&SessionRecord>) -> Result<TokenPayload>;
}

/// Broker type to strategy, with an optional fallback for unlisted brokers
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<BrokerType, Arc<dyn RefreshStrategy>>,
    default_strategy: Option<Arc<dyn RefreshStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, broker: impl Into<BrokerType>, strategy: Arc<dyn RefreshStrategy>) -> &mut Self {
        let broker = broker.into();
        info!(broker = %broker, strategy = strategy.name(), "Registered refresh strategy");
        self.strategies.insert(broker, strategy);
        self
    }

    pub fn with_default(mut self, strategy: Arc<dyn RefreshStrategy>) -> Self {
        self.default_strategy = Some(strategy);
        self
    }

    pub fn resolve(&self, broker: &BrokerType) -> Result<Arc<dyn RefreshStrategy>> {
        self.strategies
            .get(broker)
            .or(self.default_strategy.as_ref())
            .cloned()
            .ok_or_else(|| SessionError::ValidationError(format!("no refresh strategy for broker '{broker}'")))
    }

    pub fn brokers(&self) -> Vec<BrokerType> {
        let mut brokers: Vec<_> = self.strategies.keys().cloned().collect();
        brokers.sort();
        brokers
    }
}
