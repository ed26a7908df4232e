//! # Refresh Orchestrator
//!
//! Entry point for every session refresh. A request flows through:
//!
//! 1. **Single-flight** - concurrent requests for the same
//!    `(broker, principal, account, connection)` share one execution
//! 2. **Distributed lock** - one refresh per principal across all processes
//! 3. **Strategy dispatch** - resolved by broker type
//! 4. **Bounded retry** - transient failures retried with doubling delay
//! 5. **Persistence** - every attempt audited, outcome upserted, terminal
//!    failures recorded with a truncated reason
//!
//! The lock is always released, whatever the strategy returned.

use super::error_classifier::{ErrorClassifier, ErrorContext, StandardErrorClassifier};
use super::retry::RetryPolicy;
use super::single_flight::SingleFlight;
use super::strategy::{RefreshStrategy, StrategyRegistry};
use super::types::{RefreshContext, RefreshKey, TokenPayload};
use crate::config::SessionConfig;
use crate::constants::{components, truncate_reason, AttemptOutcome, SessionStatus};
use crate::error::{Result, SessionError};
use crate::lock::DistributedLock;
use crate::logging::{log_error, log_refresh_operation};
use crate::ports::{AuditRecord, SessionRecord, SessionStore};
use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Anything that can refresh a session; the scheduler drives one of these
#[async_trait]
pub trait SessionRefresher: Send + Sync + Debug {
    async fn refresh(&self, context: RefreshContext) -> Result<TokenPayload>;
}

#[derive(Debug)]
struct OrchestratorInner {
    strategies: StrategyRegistry,
    lock: Arc<DistributedLock>,
    store: Arc<dyn SessionStore>,
    classifier: Arc<dyn ErrorClassifier>,
    policy: RetryPolicy,
    lock_ttl: Duration,
    failure_reason_max_len: usize,
}

#[derive(Debug, Clone)]
pub struct RefreshOrchestrator {
    inner: Arc<OrchestratorInner>,
    flights: Arc<SingleFlight<RefreshKey, TokenPayload>>,
}

impl RefreshOrchestrator {
    pub fn new(
        strategies: StrategyRegistry,
        lock: Arc<DistributedLock>,
        store: Arc<dyn SessionStore>,
        classifier: Arc<dyn ErrorClassifier>,
        policy: RetryPolicy,
        lock_ttl: Duration,
        failure_reason_max_len: usize,
    ) -> Self {
        info!(
            brokers = ?strategies.brokers(),
            max_attempts = policy.max_attempts,
            classifier = classifier.classifier_name(),
            "🔄 Refresh orchestrator initialized"
        );
        Self {
            inner: Arc::new(OrchestratorInner {
                strategies,
                lock,
                store,
                classifier,
                policy,
                lock_ttl,
                failure_reason_max_len,
            }),
            flights: Arc::new(SingleFlight::new()),
        }
    }

    /// Standard classifier, retry policy and lock TTL from configuration
    pub fn from_config(
        config: &SessionConfig,
        strategies: StrategyRegistry,
        lock: Arc<DistributedLock>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.orchestrator);
        Self::new(
            strategies,
            lock,
            store,
            Arc::new(StandardErrorClassifier::new(policy)),
            policy,
            config.lock.ttl(),
            config.orchestrator.failure_reason_max_len,
        )
    }

    /// Refresh the session described by `context`, joining any identical
    /// refresh already running in this process.
    pub async fn refresh(&self, context: RefreshContext) -> Result<TokenPayload> {
        context.validate()?;
        let inner = Arc::clone(&self.inner);
        self.flights
            .run(context.key(), move || async move { inner.execute(context).await })
            .await
    }

    pub fn in_flight_count(&self) -> usize {
        self.flights.in_flight()
    }

    pub fn is_refreshing(&self, context: &RefreshContext) -> bool {
        self.flights.is_in_flight(&context.key())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.policy
    }
}

#[async_trait]
impl SessionRefresher for RefreshOrchestrator {
    async fn refresh(&self, context: RefreshContext) -> Result<TokenPayload> {
        RefreshOrchestrator::refresh(self, context).await
    }
}

impl OrchestratorInner {
    async fn execute(&self, context: RefreshContext) -> Result<TokenPayload> {
        let started = Instant::now();
        log_refresh_operation(
            "refresh",
            &context.principal,
            context.broker.as_str(),
            &context.correlation_id,
            "started",
            None,
            None,
        );

        let outcome = self.execute_locked(&context).await;

        let duration_ms = Some(started.elapsed().as_millis() as u64);
        match &outcome {
            Ok(_) => log_refresh_operation(
                "refresh",
                &context.principal,
                context.broker.as_str(),
                &context.correlation_id,
                "succeeded",
                duration_ms,
                None,
            ),
            Err(e) => log_refresh_operation(
                "refresh",
                &context.principal,
                context.broker.as_str(),
                &context.correlation_id,
                "failed",
                duration_ms,
                Some(&e.to_string()),
            ),
        }
        outcome
    }

    async fn execute_locked(&self, context: &RefreshContext) -> Result<TokenPayload> {
        let strategy = self.strategies.resolve(&context.broker)?;
        let handle = self.lock.acquire(&context.lock_key(), self.lock_ttl).await?;

        let outcome = self.run_with_retry(context, strategy.as_ref()).await;

        if let Err(e) = self.lock.release(&handle).await {
            log_error(components::ORCHESTRATOR, "release_lock", &e.to_string(), Some(&handle.key));
        }
        outcome
    }

    async fn run_with_retry(&self, context: &RefreshContext, strategy: &dyn RefreshStrategy) -> Result<TokenPayload> {
        let current = self.store.load_session(&context.principal, &context.broker).await?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();
            let result = strategy.refresh(context, current.as_ref()).await;
            let elapsed = attempt_started.elapsed();
            self.audit(context, strategy.name(), attempt, elapsed, result.as_ref().err())
                .await;

            let error = match result {
                Ok(payload) => {
                    self.persist_success(context, current.as_ref(), &payload).await?;
                    return Ok(payload);
                }
                Err(error) => error,
            };

            let classification = self.classifier.classify_error(
                &error,
                &ErrorContext {
                    principal: context.principal.clone(),
                    broker: context.broker.to_string(),
                    strategy: strategy.name().to_string(),
                    attempt_number: attempt,
                    max_attempts: self.policy.max_attempts,
                    execution_duration: elapsed,
                    correlation_id: context.correlation_id.clone(),
                },
            );

            if let (true, Some(delay)) = (classification.is_retryable, classification.retry_delay) {
                warn!(
                    principal = %context.principal,
                    broker = %context.broker,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    category = %classification.error_category,
                    error = %error,
                    "Refresh attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if error.is_terminal() {
                self.persist_failure(context, &error).await;
            }
            return Err(error);
        }
    }

    async fn persist_success(
        &self,
        context: &RefreshContext,
        current: Option<&SessionRecord>,
        payload: &TokenPayload,
    ) -> Result<()> {
        let now = Utc::now();
        let refresh_token = payload
            .refresh_token
            .clone()
            .or_else(|| current.and_then(|session| session.refresh_token.clone()));

        self.store
            .upsert_session(SessionRecord {
                principal: context.principal.clone(),
                broker: context.broker.clone(),
                account_id: context.account_id.clone(),
                connection_id: context.connection_id.clone(),
                access_token: Some(payload.access_token.clone()),
                refresh_token,
                expires_at: Some(payload.expires_at),
                status: SessionStatus::Active,
                last_refreshed_at: Some(now),
                failure_reason: None,
                correlation_id: Some(context.correlation_id.clone()),
                updated_at: now,
            })
            .await
    }

    async fn persist_failure(&self, context: &RefreshContext, error: &SessionError) {
        let reason = truncate_reason(&error.to_string(), self.failure_reason_max_len);
        if let Err(e) = self
            .store
            .record_failure(&context.principal, &context.broker, &reason, &context.correlation_id)
            .await
        {
            log_error(
                components::ORCHESTRATOR,
                "record_failure",
                &e.to_string(),
                Some(&context.correlation_id),
            );
        }
    }

    async fn audit(
        &self,
        context: &RefreshContext,
        strategy: &str,
        attempt: u32,
        elapsed: Duration,
        error: Option<&SessionError>,
    ) {
        let record = AuditRecord {
            principal: context.principal.clone(),
            broker: context.broker.clone(),
            correlation_id: context.correlation_id.clone(),
            strategy: strategy.to_string(),
            attempt,
            outcome: if error.is_some() {
                AttemptOutcome::Failure
            } else {
                AttemptOutcome::Success
            },
            duration_ms: elapsed.as_millis() as u64,
            error_code: error.map(|e| e.code().to_string()),
            error_message: error.map(|e| truncate_reason(&e.to_string(), self.failure_reason_max_len)),
            recorded_at: Utc::now(),
        };

        // Audit loss never fails a refresh
        if let Err(e) = self.store.append_audit(record).await {
            log_error(components::ORCHESTRATOR, "append_audit", &e.to_string(), Some(&context.correlation_id));
        } else {
            debug!(principal = %context.principal, attempt, "Audit recorded");
        }
    }
}
