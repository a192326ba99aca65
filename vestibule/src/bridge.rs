//! Client identity bridge.
//!
//! A background task subscribed to the identity provider's auth-state stream.
//! It owns the reconciliation between three worlds: the provider's notion of
//! who is signed in, the session cookie the edge gatekeeper reads, and the
//! enriched user view consumers observe through a watch channel.
//!
//! Ordering matters on sign-in: the session cookie is mirrored *before* the
//! profile enrichment fetch, so the gatekeeper sees the session even if the
//! store is slow or down. Enrichment failures degrade to a safe default view
//! (non-admin, default role) instead of blocking or erroring.

use std::sync::Arc;

use scopeguard::defer;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{AuthNotification, Identity, IdentityProvider, ProfileStore, SessionCookieSink};
use crate::config::{BridgeConfig, SessionConfig};
use crate::session::cookie::{clear_session_cookie, set_session_cookie};

/// The enriched user view the bridge publishes after a sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: String,
    pub is_admin: bool,
}

/// What consumers of the bridge observe: the current user (if any) and whether
/// the initial auth state is still unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthView {
    pub user: Option<BridgeUser>,
    pub loading: bool,
}

impl AuthView {
    fn initial() -> Self {
        Self { user: None, loading: true }
    }
}

/// Callback invoked after a sign-in completes enrichment. Failures are logged
/// and never affect the published view.
pub type PostLoginCallback = Arc<dyn Fn(&BridgeUser) -> anyhow::Result<()> + Send + Sync>;

/// Handle to the running bridge task. Dropping it cancels the task.
pub struct IdentityBridge {
    provider: Arc<dyn IdentityProvider>,
    view: watch::Receiver<AuthView>,
    bridge_config: BridgeConfig,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    _drop_guard: tokio_util::sync::DropGuard,
}

impl IdentityBridge {
    /// Subscribe to the provider and start the reconciliation task.
    ///
    /// The returned handle is the only way to observe or stop the task; dropping
    /// it cancels the subscription.
    pub fn spawn(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn ProfileStore>,
        cookies: Arc<dyn SessionCookieSink>,
        session_config: SessionConfig,
        bridge_config: BridgeConfig,
        default_role: String,
        on_login: Option<PostLoginCallback>,
    ) -> Self {
        let (tx, rx) = watch::channel(AuthView::initial());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_bridge(
            provider.subscribe(),
            store,
            cookies,
            session_config,
            bridge_config.clone(),
            default_role,
            on_login,
            tx,
            cancel.clone(),
        ));

        Self {
            provider,
            view: rx,
            bridge_config,
            cancel: cancel.clone(),
            task,
            _drop_guard: cancel.drop_guard(),
        }
    }

    /// Watch the published auth view. The first value is `{user: None, loading: true}`
    /// until the provider delivers a definitive notification.
    pub fn subscribe(&self) -> watch::Receiver<AuthView> {
        self.view.clone()
    }

    /// Current auth view snapshot.
    pub fn current(&self) -> AuthView {
        self.view.borrow().clone()
    }

    /// Trigger interactive sign-in after the configured delay.
    ///
    /// Some providers' native account chooser refuses a popup opened in the same
    /// tick the chooser was dismissed; the short delay sidesteps that. Provider
    /// failures (a dismissed or blocked popup) are logged and swallowed: a
    /// successful sign-in arrives through the subscription, so the caller has
    /// nothing to act on either way.
    pub async fn login(&self) {
        tokio::time::sleep(self.bridge_config.sign_in_delay).await;
        if let Err(e) = self.provider.sign_in().await {
            tracing::error!("interactive sign-in failed: {e:#}");
        }
    }

    /// Sign out via the provider. The cookie clear and view update arrive through
    /// the subscription when the provider confirms.
    pub async fn logout(&self) -> anyhow::Result<()> {
        self.provider.sign_out().await
    }

    /// Stop the reconciliation task and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("identity bridge task panicked: {e}");
        }
    }
}

static GLOBAL_BRIDGE: std::sync::OnceLock<IdentityBridge> = std::sync::OnceLock::new();

/// Install a process-wide bridge handle. Fails if one is already installed.
pub fn initialize_bridge(bridge: IdentityBridge) -> anyhow::Result<()> {
    GLOBAL_BRIDGE
        .set(bridge)
        .map_err(|_| anyhow::anyhow!("identity bridge already initialized"))
}

/// The process-wide bridge handle, if [`initialize_bridge`] has been called.
pub fn bridge() -> Option<&'static IdentityBridge> {
    GLOBAL_BRIDGE.get()
}

#[allow(clippy::too_many_arguments)]
async fn run_bridge(
    mut notifications: tokio::sync::mpsc::Receiver<AuthNotification>,
    store: Arc<dyn ProfileStore>,
    cookies: Arc<dyn SessionCookieSink>,
    session_config: SessionConfig,
    bridge_config: BridgeConfig,
    default_role: String,
    on_login: Option<PostLoginCallback>,
    tx: watch::Sender<AuthView>,
    cancel: CancellationToken,
) {
    defer! {
        tracing::debug!("identity bridge released auth-state subscription");
    }

    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => return,
            notification = notifications.recv() => match notification {
                Some(n) => n,
                None => {
                    tracing::warn!("identity provider closed the auth-state stream");
                    return;
                }
            },
        };

        match notification {
            // The provider hasn't settled yet; keep showing the previous state
            // rather than flashing a signed-out view.
            AuthNotification::Indeterminate => continue,
            AuthNotification::SignedOut => {
                cookies.store(clear_session_cookie(&session_config));
                tx.send_replace(AuthView { user: None, loading: false });
            }
            AuthNotification::SignedIn(identity) => {
                // Mirror the session cookie first so the gatekeeper admits this
                // session even if enrichment below stalls or fails.
                cookies.store(set_session_cookie(&session_config, &identity.uid));

                let user = enrich(&*store, &bridge_config, &default_role, identity).await;

                if let Some(callback) = &on_login {
                    if let Err(e) = callback(&user) {
                        tracing::error!("post-login callback failed for {}: {e:#}", user.uid);
                    }
                }

                if cancel.is_cancelled() {
                    return;
                }
                tx.send_replace(AuthView {
                    user: Some(user),
                    loading: false,
                });
            }
        }
    }
}

/// Build the published user view, consulting the profile store for role and
/// admin status. Any failure (error, missing document, timeout) falls back to
/// the safe default: the configured role and no admin rights.
async fn enrich(store: &dyn ProfileStore, config: &BridgeConfig, default_role: &str, identity: Identity) -> BridgeUser {
    let mut user = BridgeUser {
        uid: identity.uid,
        email: identity.email,
        display_name: identity.display_name,
        role: default_role.to_string(),
        is_admin: false,
    };

    let fetch = store.get(&user.uid);
    let document = match config.enrichment_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("profile enrichment for {} timed out; using default identity", user.uid);
                return user;
            }
        },
        None => fetch.await,
    };

    match document {
        Ok(Some(profile)) => {
            if let Some(role) = profile.get("role").and_then(|v| v.as_str()) {
                user.role = role.to_string();
                user.is_admin = role == "ADMIN";
            }
        }
        Ok(None) => {
            tracing::debug!("no profile document for {}; using default identity", user.uid);
        }
        Err(e) => {
            tracing::error!("profile enrichment for {} failed: {e:#}; using default identity", user.uid);
        }
    }
    user
}
