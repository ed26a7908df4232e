#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Broker Session Core
//!
//! Keeps broker login sessions valid for many principals without human
//! intervention, by driving an automated browser login and persisting the
//! resulting token.
//!
//! ## Overview
//!
//! The login scraping itself lives behind a collaborator trait. This crate
//! owns the resource and concurrency control around it:
//!
//! - a bounded, self-healing **browser pool** with a circuit breaker and a
//!   FIFO backpressure queue
//! - a **distributed lock** so instances never refresh the same principal
//!   at once
//! - a **refresh orchestrator** with single-flight dedup, per-broker
//!   strategies and bounded retry
//! - a **scheduler** running daily, proactive and startup catch-up sweeps
//!
//! ## Module Organization
//!
//! - [`pool`] - Browser pool, leases, queue, sweep and self-heal
//! - [`resilience`] - Circuit breaker state machine
//! - [`lock`] - Distributed lock and coordination stores
//! - [`orchestration`] - Refresh orchestrator, strategies and bootstrap
//! - [`scheduler`] - Sweep scheduling
//! - [`ports`] - Collaborator traits (automation, persistence, vault, renewal)
//! - [`persistence`] - In-memory session store
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use broker_session::config::ConfigManager;
//! use broker_session::orchestration::{RefreshContext, SessionKeeper};
//! # use broker_session::pool::BrowserLauncher;
//! # use broker_session::ports::{AutomationAdapter, CredentialVault, SessionStore};
//! # use std::sync::Arc;
//! # async fn example(
//! #     launcher: Arc<dyn BrowserLauncher>,
//! #     adapter: Arc<dyn AutomationAdapter>,
//! #     vault: Arc<dyn CredentialVault>,
//! #     store: Arc<dyn SessionStore>,
//! # ) -> broker_session::Result<()> {
//! broker_session::logging::init_structured_logging();
//!
//! let keeper = SessionKeeper::builder(ConfigManager::load()?)
//!     .launcher(launcher)
//!     .automation_adapter(adapter)
//!     .vault(vault)
//!     .store(store)
//!     .build()
//!     .await?;
//! keeper.start();
//!
//! let token = keeper.refresh(RefreshContext::new("u1", "zerodha")).await?;
//! println!("expires at {}", token.expires_at);
//!
//! keeper.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod lock;
pub mod logging;
pub mod orchestration;
pub mod persistence;
pub mod pool;
pub mod ports;
pub mod resilience;
pub mod scheduler;

pub use config::{ConfigManager, SessionConfig};
pub use constants::{AttemptOutcome, SessionStatus};
pub use error::{AutomationFailureKind, Result, SessionError};
pub use lock::{DistributedLock, LockHandle};
pub use orchestration::{
    BrokerType, RefreshContext, RefreshOrchestrator, SessionKeeper, SessionRefresher, TokenPayload,
};
pub use pool::{BrowserPool, Lease, LeaseGuard, PoolStats};
pub use resilience::{CircuitBreaker, CircuitState};
pub use scheduler::{RefreshScheduler, SweepKind, SweepOutcome, SweepReport};
