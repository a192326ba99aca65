//! In-memory and tracing-backed collaborator implementations.
//!
//! These make the crate self-contained: the binary runs against them out of the
//! box, and tests exercise the same code paths real deployments wire to their
//! own document store and audit pipeline.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::collaborators::{AuditSink, AuthEvent, CacheInvalidator, ProfileStore, TokenRevoker, UpdateOutcome};

/// Profile store backed by a concurrent hash map.
///
/// `update_unless_locked` holds the dashmap entry lock across the lock check and
/// the write, so two concurrent callers cannot both pass the check.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    documents: DashMap<String, Value>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing the lock pathway. This is the
    /// "other privileged pathway" the locked-field invariant does not cover.
    pub fn insert(&self, user_id: impl Into<String>, document: Value) {
        self.documents.insert(user_id.into(), document);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, user_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.documents.get(user_id).map(|doc| doc.clone()))
    }

    async fn update_unless_locked(
        &self,
        user_id: &str,
        lock_field: &str,
        fields: serde_json::Map<String, Value>,
    ) -> anyhow::Result<UpdateOutcome> {
        // Entry API: the shard lock is held for the whole closure, making the
        // check-and-write atomic with respect to other callers.
        match self.documents.entry(user_id.to_string()) {
            dashmap::Entry::Vacant(_) => Ok(UpdateOutcome::NotFound),
            dashmap::Entry::Occupied(mut entry) => {
                let doc = entry.get_mut();
                if doc.get(lock_field) == Some(&Value::Bool(true)) {
                    return Ok(UpdateOutcome::Locked);
                }
                let Some(map) = doc.as_object_mut() else {
                    anyhow::bail!("document for {user_id} is not an object");
                };
                for (key, value) in fields {
                    map.insert(key, value);
                }
                Ok(UpdateOutcome::Updated)
            }
        }
    }
}

/// Audit sink that writes events to the tracing pipeline.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuthEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %event.id,
            uid = %event.uid,
            app_id = %event.app_id,
            event_type = ?event.event_type,
            "auth event"
        );
        Ok(())
    }
}

/// Cache invalidator that only logs. Real deployments signal their edge cache.
#[derive(Debug, Default)]
pub struct TracingCacheInvalidator;

impl CacheInvalidator for TracingCacheInvalidator {
    fn invalidate(&self, path: &str) {
        tracing::debug!(path, "cache invalidation requested");
    }
}

/// Token revoker that only logs. Real deployments call the identity provider's
/// admin revocation API here.
#[derive(Debug, Default)]
pub struct NoopTokenRevoker;

#[async_trait]
impl TokenRevoker for NoopTokenRevoker {
    async fn revoke_tokens(&self, user_id: &str) -> anyhow::Result<()> {
        tracing::debug!(user_id, "token revocation requested (noop)");
        Ok(())
    }
}
