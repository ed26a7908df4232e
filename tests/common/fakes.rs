//! In-process stand-ins for the browser, automation and crypto collaborators.

use async_trait::async_trait;
use broker_session::error::{AutomationFailureKind, Result, SessionError};
use broker_session::orchestration::{RefreshContext, TokenPayload};
use broker_session::pool::{BrowserLauncher, BrowserProcess, MemoryProbe};
use broker_session::ports::{
    AutomationAdapter, CredentialVault, DecryptedCredentials, Plaintext, SessionRecord, TokenReissuer,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
pub struct FakeBrowser {
    disconnected: watch::Sender<bool>,
    pub close_calls: AtomicUsize,
}

impl FakeBrowser {
    pub fn new() -> Self {
        let (disconnected, _) = watch::channel(false);
        Self {
            disconnected,
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn disconnect(&self) {
        self.disconnected.send_replace(true);
    }
}

#[async_trait]
impl BrowserProcess for FakeBrowser {
    fn is_connected(&self) -> bool {
        !*self.disconnected.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.disconnected.subscribe();
        let _ = rx.wait_for(|gone| *gone).await;
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.disconnect();
    }
}

/// Scripted launch outcomes: `true` fails. An empty script always succeeds.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    script: Mutex<VecDeque<bool>>,
    launches: AtomicUsize,
    pub launch_delay: Option<Duration>,
    browsers: Mutex<Vec<Arc<FakeBrowser>>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: usize) -> Arc<Self> {
        let launcher = Self::default();
        launcher.script.lock().extend(std::iter::repeat(true).take(times));
        Arc::new(launcher)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            launch_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn browsers(&self) -> Vec<Arc<FakeBrowser>> {
        self.browsers.lock().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserProcess>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.lock().pop_front().unwrap_or(false) {
            return Err(SessionError::ResourceLaunchFailed(
                "chromium: failed to connect to DevTools".to_string(),
            ));
        }
        let browser = Arc::new(FakeBrowser::new());
        self.browsers.lock().push(Arc::clone(&browser));
        Ok(browser)
    }
}

#[derive(Debug)]
pub struct FixedMemory(pub f64);

impl MemoryProbe for FixedMemory {
    fn used_fraction(&self) -> f64 {
        self.0
    }
}

/// "Encrypts" by prefixing `enc:`
#[derive(Debug, Default)]
pub struct PrefixVault;

impl CredentialVault for PrefixVault {
    fn encrypt(&self, plaintext: &Plaintext) -> Result<String> {
        Ok(format!("enc:{}", plaintext.expose()))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<Plaintext> {
        ciphertext
            .strip_prefix("enc:")
            .map(Plaintext::new)
            .ok_or_else(|| SessionError::Internal("ciphertext missing enc: prefix".to_string()))
    }
}

/// Issues `token-N`; rejects any password equal to `wrong`
#[derive(Debug, Default)]
pub struct FakeAdapter {
    calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub seen_passwords: Mutex<Vec<String>>,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationAdapter for FakeAdapter {
    async fn fetch_access_token(
        &self,
        browser: &Arc<dyn BrowserProcess>,
        context: &RefreshContext,
        credentials: &DecryptedCredentials,
    ) -> Result<TokenPayload> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(browser.is_connected());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let password = credentials.get("password").map(|p| p.expose().to_string()).unwrap_or_default();
        self.seen_passwords.lock().push(password.clone());
        if password == "wrong" {
            return Err(SessionError::automation(
                AutomationFailureKind::CredentialRejected,
                format!("login rejected for {}", context.principal),
            ));
        }

        Ok(TokenPayload {
            access_token: format!("token-{call}"),
            refresh_token: Some(format!("refresh-{call}")),
            expires_at: Utc::now() + chrono::Duration::hours(8),
            execution_time_ms: 0,
        })
    }

    fn required_fields(&self) -> &[&'static str] {
        &["user_id", "password"]
    }
}

#[derive(Debug, Default)]
pub struct FakeReissuer {
    pub fail: bool,
    calls: AtomicUsize,
}

impl FakeReissuer {
    pub fn working() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenReissuer for FakeReissuer {
    async fn reissue(&self, _context: &RefreshContext, current: &SessionRecord) -> Result<TokenPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SessionError::automation(
                AutomationFailureKind::RenewalRejected,
                "reissue endpoint returned 401",
            ));
        }
        Ok(TokenPayload {
            access_token: format!("{}-renewed", current.access_token.clone().unwrap_or_default()),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(8),
            execution_time_ms: 0,
        })
    }
}
