//! Identity resolution and the locked-field update primitive.
//!
//! `resolve_identity` is pure reconciliation: it turns a freshly authenticated
//! id plus whatever the document store returned into either a canonical profile
//! view or a new-user template. It never writes. `update_locked_field` is the
//! one guarded write this crate performs against the store: a compare-and-lock
//! mutation that makes sensitive profile fields write-once.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::collaborators::{CacheInvalidator, ProfileStore, UpdateOutcome};
use crate::errors::{Error, Result};

/// Canonical string form for profile timestamps, matching what the client
/// toolchain expects from a serialized date.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalize a timestamp-like profile field to its canonical string form.
///
/// A store timestamp (an object carrying `seconds` and optional `nanos`) is
/// converted; anything else passes through untouched. Conversion failures (bad
/// field types, out-of-range values) are errors.
fn normalize_timestamp(value: &Value) -> anyhow::Result<Value> {
    let Some(map) = value.as_object() else {
        return Ok(value.clone());
    };
    let Some(seconds) = map.get("seconds") else {
        return Ok(value.clone());
    };

    let seconds = seconds
        .as_i64()
        .ok_or_else(|| anyhow::anyhow!("timestamp seconds is not an integer: {seconds}"))?;
    let nanos = match map.get("nanos") {
        None => 0,
        Some(n) => u32::try_from(n.as_i64().ok_or_else(|| anyhow::anyhow!("timestamp nanos is not an integer: {n}"))?)
            .map_err(|_| anyhow::anyhow!("timestamp nanos out of range"))?,
    };

    let dt = DateTime::from_timestamp(seconds, nanos).ok_or_else(|| anyhow::anyhow!("timestamp out of range: {seconds}s {nanos}ns"))?;
    Ok(Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
}

/// Result of reconciling an authenticated id against the stored profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedIdentity {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub profile: Value,
}

/// Reconcile `user_id` with the raw profile document, if any.
///
/// With a document: returns it merged with `uid`, timestamp fields normalized.
/// Without: returns a fresh profile template with the default role and all lock
/// flags unset. The template is not persisted; the caller decides whether and
/// when to write it.
pub fn resolve_identity(user_id: &str, default_role: &str, raw_profile: Option<Value>) -> Result<ResolvedIdentity> {
    match raw_profile {
        Some(Value::Object(mut profile)) => {
            profile.insert("uid".to_string(), json!(user_id));
            for key in ["createdAt", "updatedAt"] {
                if let Some(value) = profile.get(key) {
                    let normalized = normalize_timestamp(value).map_err(|e| {
                        tracing::error!("failed to resolve identity for {user_id}: {e:#}");
                        Error::BadRequest { message: e.to_string() }
                    })?;
                    profile.insert(key.to_string(), normalized);
                }
            }
            Ok(ResolvedIdentity {
                exists: true,
                message: None,
                profile: Value::Object(profile),
            })
        }
        Some(other) => {
            tracing::error!("profile document for {user_id} is not an object: {other}");
            Err(Error::BadRequest {
                message: "user document is not an object".to_string(),
            })
        }
        None => {
            let now = now_timestamp();
            Ok(ResolvedIdentity {
                exists: false,
                message: Some("User profile initialized.".to_string()),
                profile: json!({
                    "uid": user_id,
                    "role": default_role,
                    "creatorNameSet": false,
                    "createdAt": now,
                    "updatedAt": now,
                }),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub success: bool,
    pub message: String,
}

/// True for values the locked-field pathway refuses to store: null, false,
/// zero, the empty string, or a string trimming below two characters.
fn is_rejected_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().chars().count() < 2,
        _ => false,
    }
}

/// Set a write-once profile field.
///
/// The lock check happens strictly before any mutation, and the store's
/// conditional write re-checks it atomically, so at most one update per field
/// per user ever succeeds through this pathway. Infrastructure failures are
/// logged and collapse to the generic busy message.
pub async fn update_locked_field(
    store: &dyn ProfileStore,
    cache: &dyn CacheInvalidator,
    user_id: &str,
    field_name: &str,
    value: Value,
    lock_field_name: &str,
    paths_to_revalidate: &[String],
) -> Result<UpdateReport> {
    if is_rejected_value(&value) {
        return Err(Error::BadRequest {
            message: format!("Invalid value for {field_name}."),
        });
    }
    let value = match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    };

    let document = store.get(user_id).await.map_err(|e| {
        tracing::error!("failed to fetch profile for {user_id}: {e:#}");
        Error::Internal {
            operation: "fetch user profile".to_string(),
        }
    })?;

    let Some(document) = document else {
        return Err(Error::NotFound {
            resource: "User profile".to_string(),
        });
    };

    if document.get(lock_field_name) == Some(&Value::Bool(true)) {
        return Err(Error::Locked {
            field: field_name.to_string(),
        });
    }

    let mut fields = Map::new();
    fields.insert(field_name.to_string(), value.clone());
    fields.insert(lock_field_name.to_string(), Value::Bool(true));
    fields.insert("updatedAt".to_string(), Value::String(now_timestamp()));

    let outcome = store.update_unless_locked(user_id, lock_field_name, fields).await.map_err(|e| {
        tracing::error!("failed to update locked field {field_name} for {user_id}: {e:#}");
        Error::Internal {
            operation: format!("update locked field {field_name}"),
        }
    })?;

    match outcome {
        UpdateOutcome::Updated => {}
        // Lost the race to a concurrent caller between our read and the
        // store's atomic check
        UpdateOutcome::Locked => {
            return Err(Error::Locked {
                field: field_name.to_string(),
            });
        }
        UpdateOutcome::NotFound => {
            return Err(Error::NotFound {
                resource: "User profile".to_string(),
            });
        }
    }

    for path in paths_to_revalidate {
        cache.invalidate(path);
    }

    let rendered = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(UpdateReport {
        success: true,
        message: format!("Locked! {field_name} set to: {rendered}"),
    })
}
