//! # vestibule: session-cookie authentication glue
//!
//! `vestibule` is the authentication vestibule for applications that delegate
//! identity to an external provider but gate their own admin surface with a
//! session cookie. It owns the narrow strip between "the provider says this
//! person is signed in" and "this request may pass": encoding the session as a
//! cookie, reconciling provider auth-state notifications, deciding
//! allow-or-redirect at the edge, running the login/logout lifecycle, and
//! resolving identities into profile documents with write-once field updates.
//!
//! ## Architecture
//!
//! The HTTP layer is built on [Axum](https://github.com/tokio-rs/axum). All
//! external systems sit behind the trait seams in [`collaborators`]: the
//! identity provider, the profile document store, the token revoker, the audit
//! sink, and the cache invalidation signal. The crate ships in-memory
//! implementations ([`memory`]) so the binary runs self-contained; deployments
//! swap in adapters for their real provider and store.
//!
//! ### Components
//!
//! - [`session::cookie`] encodes and decodes the session cookie. One opaque
//!   value, fixed flags, no interpretation.
//! - [`bridge`] runs the client identity bridge: a background task subscribed
//!   to provider auth-state notifications that mirrors session presence into a
//!   cookie sink and publishes an enriched user view over a watch channel.
//! - [`gatekeeper`] is the edge decision: a pure allow-or-redirect function
//!   plus the axum middleware that applies it.
//! - [`session::actions`] implements the lifecycle: shared-password admin
//!   login, session read, and a logout that revokes and audits best-effort but
//!   always deletes the cookie.
//! - [`profile`] resolves identities into profile documents and performs the
//!   locked (write-once) field update.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use vestibule::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = vestibule::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     vestibule::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod bridge;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod gatekeeper;
pub mod memory;
pub mod profile;
pub mod session;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_utils;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, instrument};

use crate::collaborators::{AuditSink, CacheInvalidator, ProfileStore, TokenRevoker};
pub use config::Config;

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ProfileStore>,
    pub audit: Arc<dyn AuditSink>,
    pub revoker: Arc<dyn TokenRevoker>,
    pub cache: Arc<dyn CacheInvalidator>,
}

/// Resolve the requesting session into a profile view, or a new-user template
/// when no document exists yet.
#[instrument(skip_all)]
async fn resolve_me(State(state): State<AppState>, headers: axum::http::HeaderMap) -> errors::Result<Json<profile::ResolvedIdentity>> {
    let Some(session) = session::actions::get_session(&state.config, &headers)? else {
        return Err(errors::Error::Unauthenticated { message: None });
    };
    let document = state.store.get(&session.user_id).await.map_err(|e| {
        tracing::error!("profile fetch failed for {}: {e:#}", session.user_id);
        errors::Error::Internal {
            operation: "fetch user profile".to_string(),
        }
    })?;
    let resolved = profile::resolve_identity(&session.user_id, &state.config.default_role, document)?;
    Ok(Json(resolved))
}

/// Build the application router.
///
/// Lifecycle routes live under `/authentication/*`; `admin_router` is nested at
/// the configured admin path prefix. The gatekeeper middleware wraps everything,
/// so the nested admin routes are only reachable with a session cookie matching
/// the shared secret.
#[instrument(skip_all)]
pub fn build_router(state: AppState, admin_router: Router) -> Router {
    let auth_routes = Router::new()
        .route("/authentication/login", post(session::actions::handlers::login))
        .route("/authentication/logout", post(session::actions::handlers::logout))
        .route("/authentication/session", get(session::actions::handlers::session))
        .route("/authentication/me", get(resolve_me))
        .with_state(state.clone());

    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(auth_routes)
        .nest(&state.config.gate.admin_path, admin_router)
        .layer(from_fn_with_state(state, gatekeeper::admin_gate_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Main application struct that owns the router and lifecycle.
///
/// [`Application::new`] wires the default in-memory collaborators; deployments
/// integrating a real provider and store build an [`AppState`] themselves and
/// call [`build_router`] directly.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        tracing::debug!("Starting vestibule with configuration: {:#?}", config);

        let state = AppState::builder()
            .config(config.clone())
            .store(Arc::new(memory::MemoryProfileStore::new()))
            .audit(Arc::new(memory::TracingAuditSink))
            .revoker(Arc::new(memory::NoopTokenRevoker))
            .cache(Arc::new(memory::TracingCacheInvalidator))
            .build();

        // Placeholder admin surface; deployments nest their own router here.
        let admin_router = Router::new().route("/", get(|| async { "admin" }));
        let router = build_router(state, admin_router);

        Ok(Self { router, config })
    }

    /// Start serving the application, shutting down gracefully when `shutdown`
    /// resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("vestibule listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
