//! Session cookie codec.
//!
//! Encodes a single opaque session value into a `Set-Cookie` instruction with
//! fixed flags, reads it back out of a request's `Cookie` header, and builds the
//! clearing instruction. No validation of the value's shape happens here;
//! callers decide what the opaque value means.

use axum::http::HeaderMap;

use crate::config::SessionConfig;
use crate::errors::Error;

/// Build the `Set-Cookie` value carrying a session.
///
/// Flags are fixed: `Path=/`, `HttpOnly`, `SameSite` and `Secure` from config,
/// `Max-Age` from the configured session lifetime.
pub fn set_session_cookie(config: &SessionConfig, value: &str) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}",
        config.cookie_name,
        value,
        config.cookie_same_site,
        config.max_age.as_secs()
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build the `Set-Cookie` value that deletes the session: empty value, zero
/// max-age, and an `Expires` in the past for agents that ignore `Max-Age`.
pub fn clear_session_cookie(config: &SessionConfig) -> String {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite={}; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        config.cookie_name, config.cookie_same_site
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Read the session value out of a request's `Cookie` header.
///
/// Returns `Ok(None)` when the header or the session cookie is absent, and an
/// error only when the header itself is not valid UTF-8.
pub fn read_session_cookie(config: &SessionConfig, headers: &HeaderMap) -> Result<Option<String>, Error> {
    let Some(cookie_header) = headers.get(axum::http::header::COOKIE) else {
        return Ok(None);
    };

    let cookie_str = cookie_header.to_str().map_err(|e| Error::BadRequest {
        message: format!("Invalid cookie header: {e}"),
    })?;

    for cookie in cookie_str.split(';') {
        let cookie = cookie.trim();
        if let Some((name, value)) = cookie.split_once('=') {
            if name == config.cookie_name {
                return Ok(Some(value.to_string()));
            }
        }
    }
    Ok(None)
}
