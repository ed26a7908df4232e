//! # Refresh Orchestration
//!
//! Turns a refresh request into at most one strategy execution per principal:
//!
//! - **RefreshOrchestrator**: single-flight dedup, distributed lock, retry and persistence
//! - **StrategyRegistry**: broker type to [`RefreshStrategy`]
//! - **FullLoginStrategy** / **FastRenewalStrategy**: the two canonical strategies
//! - **ErrorClassifier**: transient vs terminal decisions per attempt
//! - **SessionKeeper**: wires pool, lock, orchestrator and scheduler together

pub mod bootstrap;
pub mod error_classifier;
pub mod orchestrator;
pub mod retry;
pub mod single_flight;
pub mod strategies;
pub mod strategy;
pub mod types;

pub use bootstrap::{KeeperStatus, SessionKeeper, SessionKeeperBuilder};
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, ErrorContext, StandardErrorClassifier,
};
pub use orchestrator::{RefreshOrchestrator, SessionRefresher};
pub use retry::RetryPolicy;
pub use single_flight::SingleFlight;
pub use strategies::{FastRenewalStrategy, FullLoginStrategy};
pub use strategy::{RefreshStrategy, StrategyRegistry};
pub use types::{BrokerType, RefreshContext, RefreshKey, TokenPayload};
