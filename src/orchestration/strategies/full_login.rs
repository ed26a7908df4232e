//! Full interactive login in a pooled browser.

use crate::error::{Result, SessionError};
use crate::orchestration::strategy::RefreshStrategy;
use crate::orchestration::types::{RefreshContext, TokenPayload};
use crate::pool::BrowserPool;
use crate::ports::{AutomationAdapter, CredentialVault, DecryptedCredentials, SessionRecord, SessionStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FullLoginStrategy {
    pool: BrowserPool,
    vault: Arc<dyn CredentialVault>,
    store: Arc<dyn SessionStore>,
    adapter: Arc<dyn AutomationAdapter>,
}

impl FullLoginStrategy {
    pub fn new(
        pool: BrowserPool,
        vault: Arc<dyn CredentialVault>,
        store: Arc<dyn SessionStore>,
        adapter: Arc<dyn AutomationAdapter>,
    ) -> Self {
        Self {
            pool,
            vault,
            store,
            adapter,
        }
    }

    async fn resolve_credentials(&self, context: &RefreshContext) -> Result<DecryptedCredentials> {
        let stored = self
            .store
            .load_credentials(&context.principal, &context.broker)
            .await?
            .ok_or_else(|| SessionError::CredentialNotFound {
                principal: context.principal.clone(),
            })?;

        let missing: Vec<&str> = self
            .adapter
            .required_fields()
            .iter()
            .copied()
            .filter(|field| stored.fields.get(*field).map(|v| v.is_empty()).unwrap_or(true))
            .collect();
        if !missing.is_empty() {
            return Err(SessionError::CredentialIncomplete {
                principal: context.principal.clone(),
                missing: missing.join(", "),
            });
        }

        let mut fields = BTreeMap::new();
        for (name, ciphertext) in &stored.fields {
            fields.insert(name.clone(), self.vault.decrypt(ciphertext)?);
        }

        Ok(DecryptedCredentials {
            principal: stored.principal,
            fields,
        })
    }
}

#[async_trait]
impl RefreshStrategy for FullLoginStrategy {
    fn name(&self) -> &'static str {
        "full_login"
    }

    async fn refresh(&self, context: &RefreshContext, _current: Option<&SessionRecord>) -> Result<TokenPayload> {
        let started = Instant::now();
        let credentials = self.resolve_credentials(context).await?;

        // Released on every path, including cancellation
        let guard = self.pool.acquire_guarded().await?;
        debug!(
            principal = %context.principal,
            resource_id = %guard.lease().resource_id,
            "Driving interactive login"
        );

        let result = self
            .adapter
            .fetch_access_token(guard.browser(), context, &credentials)
            .await;
        let released = guard.release();
        debug!(principal = %context.principal, ?released, "Login browser released");

        let mut payload = result?;
        payload.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(payload)
    }
}
