//! Interface boundary to the external collaborators.
//!
//! Everything this crate talks to lives behind one of these traits: the identity
//! provider (client-side sign-in and auth-state notifications), the server-side
//! token revoker, the profile document store, the audit sink, the cache
//! invalidation signal, and the cookie store the bridge mirrors session presence
//! into. Implementations for self-contained operation and testing live in
//! [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// An externally-owned identity. Read-only to this system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque unique id, owned by the identity provider
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// A single auth-state notification from the identity provider.
///
/// `Indeterminate` is the provider's intermediate "don't know yet" signal; the
/// bridge ignores it rather than prematurely showing a signed-out state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthNotification {
    Indeterminate,
    SignedOut,
    SignedIn(Identity),
}

/// Client-side identity provider: auth-state subscription plus interactive
/// sign-in and sign-out.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subscribe to auth-state notifications. Dropping the receiver releases the
    /// subscription.
    fn subscribe(&self) -> mpsc::Receiver<AuthNotification>;

    /// Interactive sign-in (e.g., an account-chooser popup).
    async fn sign_in(&self) -> anyhow::Result<()>;

    /// Sign the current identity out. The resulting state change arrives through
    /// the subscription, not synchronously.
    async fn sign_out(&self) -> anyhow::Result<()>;
}

/// Server-side token revocation by identity id.
#[async_trait]
pub trait TokenRevoker: Send + Sync {
    async fn revoke_tokens(&self, user_id: &str) -> anyhow::Result<()>;
}

/// Outcome of a conditional profile update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Fields were written and the lock field is now true
    Updated,
    /// The lock field was already true; nothing was written
    Locked,
    /// No document exists for this id; nothing was written
    NotFound,
}

/// Profile document store keyed by identity id.
///
/// `update_unless_locked` must be atomic relative to its own lock check: the
/// store may not interleave another writer between reading `lock_field` and
/// applying `fields`. This is what makes the locked-field invariant hold under
/// concurrent callers.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the raw profile document, or None if it does not exist.
    async fn get(&self, user_id: &str) -> anyhow::Result<Option<Value>>;

    /// Merge `fields` into the document iff `lock_field` is not already true.
    async fn update_unless_locked(
        &self,
        user_id: &str,
        lock_field: &str,
        fields: serde_json::Map<String, Value>,
    ) -> anyhow::Result<UpdateOutcome>;
}

/// Audit event types recorded by the audit sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventType {
    Login,
    Logout,
    Register,
}

/// A fire-and-forget audit record of a login/logout/register occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub id: Uuid,
    pub uid: String,
    pub app_id: String,
    pub event_type: AuthEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub at: DateTime<Utc>,
}

impl AuthEvent {
    pub fn new(uid: impl Into<String>, app_id: impl Into<String>, event_type: AuthEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            uid: uid.into(),
            app_id: app_id.into(),
            event_type,
            metadata: None,
            at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Write-only audit sink. Callers treat `record` as fire-and-forget: failures
/// are logged and never propagate into the caller's success path.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuthEvent) -> anyhow::Result<()>;
}

/// Fire-and-forget cache invalidation signal.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, path: &str);
}

/// Where the client identity bridge mirrors session presence. In a browser this
/// is `document.cookie`; in tests it is an in-memory recorder.
pub trait SessionCookieSink: Send + Sync {
    /// Apply a `Set-Cookie` style instruction to the cookie store.
    fn store(&self, set_cookie: String);
}
