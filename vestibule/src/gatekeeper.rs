//! Edge gatekeeper protecting the admin area.
//!
//! The decision is a total function of `(secret, path, session cookie value)`
//! so it is unit-testable without a live request; the middleware wrapper only
//! extracts those three inputs and applies the verdict.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::AppState;
use crate::config::GateConfig;
use crate::session::cookie::read_session_cookie;

/// Verdict for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectTo(String),
}

/// Decide whether a request may proceed.
///
/// Rules, in order:
/// 1. Requests under the login path are always allowed (prevents redirect loops).
/// 2. A missing shared secret fails closed: everything else redirects to login.
/// 3. Requests under the admin path redirect unless the cookie equals the secret.
/// 4. Everything else is allowed.
pub fn decide(admin_secret: Option<&str>, path: &str, session_value: Option<&str>, gate: &GateConfig) -> Decision {
    if path.starts_with(&gate.login_path) {
        return Decision::Allow;
    }

    let Some(secret) = admin_secret else {
        tracing::error!("admin shared secret missing from configuration; failing closed");
        return Decision::RedirectTo(gate.login_path.clone());
    };

    if path.starts_with(&gate.admin_path) && session_value != Some(secret) {
        return Decision::RedirectTo(gate.login_path.clone());
    }

    Decision::Allow
}

/// Middleware applying [`decide`] to every request.
///
/// An unreadable cookie header is treated as an absent session, so a mangled
/// cookie redirects rather than erroring on protected paths.
pub async fn admin_gate_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let session_value = read_session_cookie(&state.config.session, request.headers()).unwrap_or(None);

    match decide(
        state.config.admin_secret.as_deref(),
        request.uri().path(),
        session_value.as_deref(),
        &state.config.gate,
    ) {
        Decision::Allow => next.run(request).await,
        Decision::RedirectTo(path) => Redirect::temporary(&path).into_response(),
    }
}
