//! Seam to the external headless-browser process.
//!
//! The pool never knows how a browser is spawned or driven; it only launches,
//! watches for disconnects and closes.

use crate::error::SessionError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// A running browser process owned by the pool.
#[async_trait]
pub trait BrowserProcess: Send + Sync + Debug {
    /// Cheap liveness check, consulted on acquire and release.
    fn is_connected(&self) -> bool;

    /// Resolves once the process disconnects or exits. The pool subscribes to
    /// this at creation time and flags the resource unhealthy.
    async fn closed(&self);

    /// Terminate the process. Must tolerate being called more than once.
    async fn close(&self);
}

/// Spawns browser processes.
#[async_trait]
pub trait BrowserLauncher: Send + Sync + Debug {
    async fn launch(&self) -> Result<Arc<dyn BrowserProcess>, SessionError>;
}
