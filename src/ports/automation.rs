//! Interactive login automation seam.

use super::vault::DecryptedCredentials;
use crate::error::Result;
use crate::orchestration::types::{RefreshContext, TokenPayload};
use crate::pool::BrowserProcess;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Drives a broker's login page in a leased browser.
///
/// Failures are reported as [`crate::error::SessionError::AutomationFailure`]
/// with a kind such as selector-not-found or credential-rejected; the
/// orchestrator treats them as terminal.
#[async_trait]
pub trait AutomationAdapter: Send + Sync + Debug {
    async fn fetch_access_token(
        &self,
        browser: &Arc<dyn BrowserProcess>,
        context: &RefreshContext,
        credentials: &DecryptedCredentials,
    ) -> Result<TokenPayload>;

    /// Credential fields that must be present before a login is attempted
    fn required_fields(&self) -> &[&'static str] {
        &[]
    }
}
