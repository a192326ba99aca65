//! Session lifecycle actions: login, logout, session read.
//!
//! The core functions are plain async functions over the collaborator traits so
//! they are testable without a server; the `handlers` module wraps them as axum
//! handlers that carry the cookie instruction in a `Set-Cookie` response header.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::collaborators::{AuditSink, AuthEvent, AuthEventType, TokenRevoker};
use crate::config::Config;
use crate::session::cookie::{clear_session_cookie, read_session_cookie, set_session_cookie};

/// Audit uid used for logins under the shared-password scheme, where no
/// per-user identity exists.
pub const ADMIN_SHARED_UID: &str = "ADMIN_SHARED";

/// Login form input. `password` is optional so an empty form is a mismatch, not
/// a deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoutResult {
    pub success: bool,
}

/// The decoded server-side session: the opaque cookie value, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSession {
    pub user_id: String,
    pub is_authenticated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    pub uid: String,
}

/// Minimal auth metadata derived purely from the session cookie. Deliberately
/// performs no profile lookup; callers needing profile data fetch it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub is_authenticated: bool,
    pub user: Option<SessionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Admin login under the shared-secret scheme.
///
/// On a match the session cookie is set to the shared secret itself and exactly
/// one `Login` audit event is emitted, tagged with the shared admin uid. A
/// mismatch (or missing configured secret) produces no cookie and no event.
/// Audit failures are logged and never fail the login.
pub async fn login(config: &Config, audit: &dyn AuditSink, form: &LoginForm) -> (LoginResult, Option<String>) {
    let matches = match (&config.admin_secret, &form.password) {
        (Some(secret), Some(password)) => password == secret,
        _ => false,
    };

    if !matches {
        return (
            LoginResult {
                success: false,
                error: Some("Invalid credentials".to_string()),
            },
            None,
        );
    }

    // Checked above; the cookie carries the shared secret as its value.
    let secret = config.admin_secret.as_deref().unwrap_or_default();
    let cookie = set_session_cookie(&config.session, secret);

    let event = AuthEvent::new(ADMIN_SHARED_UID, &config.app_id, AuthEventType::Login)
        .with_metadata(json!({"type": "admin_password"}));
    if let Err(e) = audit.record(event).await {
        tracing::warn!("failed to record login audit event (non-blocking): {e:#}");
    }

    (LoginResult { success: true, error: None }, Some(cookie))
}

/// Decode the session cookie into a server session, or None when absent.
pub fn get_session(config: &Config, headers: &HeaderMap) -> crate::errors::Result<Option<ServerSession>> {
    Ok(read_session_cookie(&config.session, headers)?.map(|value| ServerSession {
        user_id: value,
        is_authenticated: true,
    }))
}

/// Log out: revoke the session's tokens and record a `Logout` audit event, then
/// delete the cookie.
///
/// Revocation and audit are best-effort. Either failing is caught and logged;
/// the cookie deletion always happens and the result is always success.
pub async fn logout(
    config: &Config,
    revoker: &dyn TokenRevoker,
    audit: &dyn AuditSink,
    headers: &HeaderMap,
) -> (LogoutResult, String) {
    let session_value = read_session_cookie(&config.session, headers).unwrap_or_else(|e| {
        tracing::warn!("unreadable cookie header during logout: {e}");
        None
    });

    if let Some(user_id) = session_value {
        if let Err(e) = revoker.revoke_tokens(&user_id).await {
            tracing::error!("failed to revoke tokens for {user_id} (cookie still cleared): {e:#}");
        }
        let event = AuthEvent::new(&user_id, &config.app_id, AuthEventType::Logout);
        if let Err(e) = audit.record(event).await {
            tracing::warn!("failed to record logout audit event (non-blocking): {e:#}");
        }
    }

    (LogoutResult { success: true }, clear_session_cookie(&config.session))
}

/// Logout variant for the password-only admin scheme: no revocation, no audit,
/// just delete the cookie.
pub fn logout_admin(config: &Config) -> (LogoutResult, String) {
    (LogoutResult { success: true }, clear_session_cookie(&config.session))
}

/// Wrap [`get_session`] into the minimal authenticated-user view.
pub fn get_authenticated_user(config: &Config, headers: &HeaderMap) -> AuthenticatedUser {
    match get_session(config, headers) {
        Ok(None) => AuthenticatedUser {
            is_authenticated: false,
            user: None,
            error: None,
        },
        Ok(Some(session)) => AuthenticatedUser {
            is_authenticated: true,
            user: Some(SessionUser { uid: session.user_id }),
            error: None,
        },
        Err(e) => {
            tracing::error!("session lookup failed: {e:#}");
            AuthenticatedUser {
                is_authenticated: false,
                user: None,
                error: Some(e.user_message()),
            }
        }
    }
}

/// Axum handlers over the lifecycle actions.
pub mod handlers {
    use axum::Json;
    use axum::extract::{Form, State};
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::{IntoResponse, Response};

    use super::{AuthenticatedUser, LoginForm, LoginResult, LogoutResult};
    use crate::AppState;

    /// Login result plus the cookie instruction for the browser.
    pub struct LoginResponse {
        pub result: LoginResult,
        pub cookie: Option<String>,
    }

    impl IntoResponse for LoginResponse {
        fn into_response(self) -> Response {
            let status = if self.result.success {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };
            let mut response = (status, Json(self.result)).into_response();
            if let Some(cookie) = self.cookie {
                if let Ok(value) = cookie.parse() {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
            }
            response
        }
    }

    /// Logout result plus the cookie-clearing instruction.
    pub struct LogoutResponse {
        pub result: LogoutResult,
        pub cookie: String,
    }

    impl IntoResponse for LogoutResponse {
        fn into_response(self) -> Response {
            let mut response = (StatusCode::OK, Json(self.result)).into_response();
            if let Ok(value) = self.cookie.parse() {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            response
        }
    }

    /// Login with the admin shared password
    #[tracing::instrument(skip_all)]
    pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> LoginResponse {
        let (result, cookie) = super::login(&state.config, state.audit.as_ref(), &form).await;
        LoginResponse { result, cookie }
    }

    /// Logout (revoke + audit + clear session cookie)
    #[tracing::instrument(skip_all)]
    pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> LogoutResponse {
        let (result, cookie) = super::logout(&state.config, state.revoker.as_ref(), state.audit.as_ref(), &headers).await;
        LogoutResponse { result, cookie }
    }

    /// Read the current session's auth metadata
    #[tracing::instrument(skip_all)]
    pub async fn session(State(state): State<AppState>, headers: HeaderMap) -> Json<AuthenticatedUser> {
        Json(super::get_authenticated_user(&state.config, &headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::AuthEventType;
    use crate::test_utils::{FailingRevoker, RecordingAuditSink, RecordingRevoker, test_config};
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!("__session={value}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_login_mismatched_password() {
        let config = test_config();
        let audit = RecordingAuditSink::default();
        let form = LoginForm {
            password: Some("wrong".to_string()),
        };

        let (result, cookie) = login(&config, &audit, &form).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Invalid credentials"));
        assert!(cookie.is_none(), "mismatched password must never set a cookie");
        assert!(audit.events().is_empty(), "mismatched password must not emit audit events");
    }

    #[tokio::test]
    async fn test_login_missing_password_field() {
        let config = test_config();
        let audit = RecordingAuditSink::default();
        let form = LoginForm { password: None };

        let (result, cookie) = login(&config, &audit, &form).await;
        assert!(!result.success);
        assert!(cookie.is_none());
    }

    #[tokio::test]
    async fn test_login_no_configured_secret_always_fails() {
        let mut config = test_config();
        config.admin_secret = None;
        let audit = RecordingAuditSink::default();
        let form = LoginForm {
            password: Some("anything".to_string()),
        };

        let (result, cookie) = login(&config, &audit, &form).await;
        assert!(!result.success);
        assert!(cookie.is_none());
    }

    #[tokio::test]
    async fn test_login_success_sets_cookie_and_audits_once() {
        let config = test_config();
        let audit = RecordingAuditSink::default();
        let form = LoginForm {
            password: Some("sekrit".to_string()),
        };

        let (result, cookie) = login(&config, &audit, &form).await;

        assert!(result.success);
        assert!(result.error.is_none());
        let cookie = cookie.expect("matching password must set a cookie");
        assert!(cookie.contains("__session=sekrit"), "cookie value is the shared secret");

        let events = audit.events();
        assert_eq!(events.len(), 1, "exactly one LOGIN event");
        assert_eq!(events[0].uid, ADMIN_SHARED_UID);
        assert_eq!(events[0].event_type, AuthEventType::Login);
        assert_eq!(events[0].app_id, config.app_id);
        assert_eq!(events[0].metadata.as_ref().unwrap()["type"], json!("admin_password"));
    }

    #[tokio::test]
    async fn test_login_audit_failure_does_not_fail_login() {
        let config = test_config();
        let audit = RecordingAuditSink::failing();
        let form = LoginForm {
            password: Some("sekrit".to_string()),
        };

        let (result, cookie) = login(&config, &audit, &form).await;
        assert!(result.success);
        assert!(cookie.is_some());
    }

    #[test]
    fn test_get_session_absent() {
        let config = test_config();
        assert_eq!(get_session(&config, &HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn test_get_session_present() {
        let config = test_config();
        let session = get_session(&config, &headers_with_cookie("uid-9")).unwrap().unwrap();
        assert_eq!(session.user_id, "uid-9");
        assert!(session.is_authenticated);
    }

    #[tokio::test]
    async fn test_logout_revokes_and_audits() {
        let config = test_config();
        let audit = RecordingAuditSink::default();
        let revoker = RecordingRevoker::default();

        let (result, cookie) = logout(&config, &revoker, &audit, &headers_with_cookie("uid-9")).await;

        assert!(result.success);
        assert!(cookie.contains("Max-Age=0"));
        assert_eq!(revoker.calls(), vec!["uid-9".to_string()]);

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "uid-9");
        assert_eq!(events[0].event_type, AuthEventType::Logout);
    }

    #[tokio::test]
    async fn test_logout_clears_cookie_even_when_revoke_fails() {
        let config = test_config();
        let audit = RecordingAuditSink::default();
        let revoker = FailingRevoker;

        let (result, cookie) = logout(&config, &revoker, &audit, &headers_with_cookie("uid-9")).await;

        assert!(result.success, "logout always succeeds");
        assert!(cookie.contains("Max-Age=0"), "cookie cleared despite revoke failure");
    }

    #[tokio::test]
    async fn test_logout_without_session_skips_revoke() {
        let config = test_config();
        let audit = RecordingAuditSink::default();
        let revoker = RecordingRevoker::default();

        let (result, _cookie) = logout(&config, &revoker, &audit, &HeaderMap::new()).await;

        assert!(result.success);
        assert!(revoker.calls().is_empty());
        assert!(audit.events().is_empty());
    }

    #[test]
    fn test_logout_admin_variant_only_clears_cookie() {
        let config = test_config();
        let (result, cookie) = logout_admin(&config);
        assert!(result.success);
        assert!(cookie.starts_with("__session=;"));
    }

    #[test]
    fn test_get_authenticated_user_states() {
        let config = test_config();

        let anon = get_authenticated_user(&config, &HeaderMap::new());
        assert!(!anon.is_authenticated);
        assert!(anon.user.is_none());
        assert!(anon.error.is_none());

        let user = get_authenticated_user(&config, &headers_with_cookie("uid-9"));
        assert!(user.is_authenticated);
        assert_eq!(user.user.unwrap().uid, "uid-9");

        let mut bad_headers = HeaderMap::new();
        bad_headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_bytes(b"__session=\xff\xfe").unwrap(),
        );
        let broken = get_authenticated_user(&config, &bad_headers);
        assert!(!broken.is_authenticated);
        assert!(broken.error.is_some());
    }
}
