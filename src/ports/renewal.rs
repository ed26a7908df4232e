//! Lightweight token reissue seam used by fast-renewal brokers.

use super::persistence::SessionRecord;
use crate::error::Result;
use crate::orchestration::types::{RefreshContext, TokenPayload};
use async_trait::async_trait;
use std::fmt::Debug;

#[async_trait]
pub trait TokenReissuer: Send + Sync + Debug {
    /// Exchange the current session for a fresh token without a browser
    async fn reissue(&self, context: &RefreshContext, current: &SessionRecord) -> Result<TokenPayload>;
}
