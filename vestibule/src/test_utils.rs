//! Shared test doubles: recording and failing collaborator implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::AppState;
use crate::collaborators::{
    AuditSink, AuthEvent, AuthNotification, CacheInvalidator, IdentityProvider, ProfileStore, SessionCookieSink,
    TokenRevoker, UpdateOutcome,
};
use crate::config::Config;
use crate::memory::MemoryProfileStore;

/// Config with a known admin secret, suitable for most tests. The cookie is
/// not marked Secure so test clients replay it over plain HTTP.
pub fn test_config() -> Config {
    Config {
        admin_secret: Some("sekrit".to_string()),
        app_id: "test-app".to_string(),
        session: crate::config::SessionConfig {
            cookie_secure: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// App state over in-memory collaborators.
pub fn test_state(config: Config) -> AppState {
    AppState::builder()
        .config(config)
        .store(Arc::new(MemoryProfileStore::new()))
        .audit(Arc::new(RecordingAuditSink::default()))
        .revoker(Arc::new(RecordingRevoker::default()))
        .cache(Arc::new(RecordingInvalidator::default()))
        .build()
}

/// Audit sink that records events, optionally failing every call.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuthEvent>>,
    fail: bool,
}

impl RecordingAuditSink {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<AuthEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuthEvent) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("audit pipeline unavailable");
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Revoker that records which ids were revoked.
#[derive(Default)]
pub struct RecordingRevoker {
    calls: Mutex<Vec<String>>,
}

impl RecordingRevoker {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenRevoker for RecordingRevoker {
    async fn revoke_tokens(&self, user_id: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

/// Revoker that always fails.
pub struct FailingRevoker;

#[async_trait]
impl TokenRevoker for FailingRevoker {
    async fn revoke_tokens(&self, _user_id: &str) -> anyhow::Result<()> {
        anyhow::bail!("revocation endpoint unavailable")
    }
}

/// Cache invalidator that records invalidated paths.
#[derive(Default)]
pub struct RecordingInvalidator {
    paths: Mutex<Vec<String>>,
}

impl RecordingInvalidator {
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, path: &str) {
        self.paths.lock().unwrap().push(path.to_string());
    }
}

/// Profile store wrapper that counts calls, or fails every call when broken.
pub struct CountingStore {
    inner: Option<MemoryProfileStore>,
    gets: AtomicUsize,
    updates: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: MemoryProfileStore) -> Self {
        Self {
            inner: Some(inner),
            gets: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    /// A store whose every call fails.
    pub fn broken() -> Self {
        Self {
            inner: None,
            gets: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryProfileStore {
        self.inner.as_ref().expect("broken store has no inner")
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for CountingStore {
    async fn get(&self, user_id: &str) -> anyhow::Result<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        match &self.inner {
            Some(inner) => inner.get(user_id).await,
            None => anyhow::bail!("store unavailable"),
        }
    }

    async fn update_unless_locked(
        &self,
        user_id: &str,
        lock_field: &str,
        fields: serde_json::Map<String, Value>,
    ) -> anyhow::Result<UpdateOutcome> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        match &self.inner {
            Some(inner) => inner.update_unless_locked(user_id, lock_field, fields).await,
            None => anyhow::bail!("store unavailable"),
        }
    }
}

/// Identity provider driven by the test: notifications are pushed through
/// [`ChannelProvider::notify`], interactive calls are counted.
pub struct ChannelProvider {
    subscribers: Mutex<Vec<mpsc::Sender<AuthNotification>>>,
    sign_ins: AtomicUsize,
    sign_outs: AtomicUsize,
}

impl ChannelProvider {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            sign_ins: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
        }
    }

    pub async fn notify(&self, notification: AuthNotification) {
        let senders = self.subscribers.lock().unwrap().clone();
        for sender in senders {
            sender.send(notification.clone()).await.expect("subscriber dropped");
        }
    }

    pub fn sign_ins(&self) -> usize {
        self.sign_ins.load(Ordering::SeqCst)
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ChannelProvider {
    fn subscribe(&self) -> mpsc::Receiver<AuthNotification> {
        let (tx, rx) = mpsc::channel(16);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    async fn sign_in(&self) -> anyhow::Result<()> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Cookie sink that records every instruction it receives.
#[derive(Default)]
pub struct MemoryCookieSink {
    writes: Mutex<Vec<String>>,
}

impl MemoryCookieSink {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl SessionCookieSink for MemoryCookieSink {
    fn store(&self, set_cookie: String) {
        self.writes.lock().unwrap().push(set_cookie);
    }
}
