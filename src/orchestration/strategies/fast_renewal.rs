//! Lightweight reissue with fall-through to a full login.

use crate::error::Result;
use crate::orchestration::strategy::RefreshStrategy;
use crate::orchestration::types::{RefreshContext, TokenPayload};
use crate::ports::{SessionRecord, TokenReissuer};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FastRenewalStrategy {
    reissuer: Arc<dyn TokenReissuer>,
    fallback: Arc<dyn RefreshStrategy>,
}

impl FastRenewalStrategy {
    pub fn new(reissuer: Arc<dyn TokenReissuer>, fallback: Arc<dyn RefreshStrategy>) -> Self {
        Self { reissuer, fallback }
    }
}

#[async_trait]
impl RefreshStrategy for FastRenewalStrategy {
    fn name(&self) -> &'static str {
        "fast_renewal"
    }

    async fn refresh(&self, context: &RefreshContext, current: Option<&SessionRecord>) -> Result<TokenPayload> {
        match current.filter(|session| session.access_token.is_some()) {
            Some(session) => {
                let started = Instant::now();
                match self.reissuer.reissue(context, session).await {
                    Ok(mut payload) => {
                        payload.execution_time_ms = started.elapsed().as_millis() as u64;
                        return Ok(payload);
                    }
                    Err(e) => warn!(
                        principal = %context.principal,
                        error = %e,
                        fallback = self.fallback.name(),
                        "Fast renewal failed, falling back"
                    ),
                }
            }
            None => debug!(principal = %context.principal, "No token on record, skipping fast renewal"),
        }

        self.fallback.refresh(context, current).await
    }
}
