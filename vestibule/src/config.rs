//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `vestibule.yaml` but can be specified via `-f` flag or `VESTIBULE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `vestibule.yaml`)
//! 2. **Environment variables** - Variables prefixed with `VESTIBULE_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `VESTIBULE_SESSION__COOKIE_NAME=__session` sets the `session.cookie_name` field.
//!
//! ## Example
//!
//! ```yaml
//! app_id: my-app
//! admin_secret: change-me
//! default_role: WAKA
//! session:
//!   max_age: 7days
//! gate:
//!   login_path: /admin-login
//!   admin_path: /admin-dashboard
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "VESTIBULE_CONFIG", default_value = "vestibule.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Application identifier used to tag audit events
    pub app_id: String,
    /// Admin shared secret. When unset the gatekeeper fails closed: every request
    /// outside the login path is redirected to the login page.
    pub admin_secret: Option<String>,
    /// Role assigned to new-identity profile templates
    pub default_role: String,
    /// Session cookie configuration
    pub session: SessionConfig,
    /// Gatekeeper path configuration
    pub gate: GateConfig,
    /// Client identity bridge timing configuration
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            app_id: "vestibule".to_string(),
            admin_secret: None,
            default_role: "WAKA".to_string(),
            session: SessionConfig::default(),
            gate: GateConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Session cookie lifetime
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Cookie name for the session value
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("Strict", "Lax", or "None")
    pub cookie_same_site: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60 * 60 * 24 * 7),
            cookie_name: "__session".to_string(),
            cookie_secure: true,
            cookie_same_site: "Lax".to_string(),
        }
    }
}

/// Gatekeeper path configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Path prefix of the login page. Requests under this prefix are always allowed
    /// so that the redirect target itself never redirects.
    pub login_path: String,
    /// Path prefix of the protected admin area
    pub admin_path: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            login_path: "/admin-login".to_string(),
            admin_path: "/admin-dashboard".to_string(),
        }
    }
}

/// Client identity bridge timing configuration.
///
/// The delay before interactive sign-in works around providers whose native account
/// chooser blocks a popup opened in the same tick it was dismissed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Delay before invoking the provider's interactive sign-in
    #[serde(with = "humantime_serde")]
    pub sign_in_delay: Duration,
    /// Optional upper bound on the profile enrichment fetch. When the fetch exceeds
    /// this, the bridge falls back to the safe default identity.
    #[serde(default, with = "humantime_serde")]
    pub enrichment_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sign_in_delay: Duration::from_millis(150),
            enrichment_timeout: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("VESTIBULE_").split("__"))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(secret) = &self.admin_secret {
            if secret.is_empty() {
                return Err(Error::Internal {
                    operation: "Config validation: admin_secret cannot be an empty string. \
                     Unset it entirely to run in fail-closed mode, or provide a real secret."
                        .to_string(),
                });
            }
        } else {
            // Not an error: the gatekeeper fails closed without a secret. But nobody
            // will be able to reach the admin area, so say so loudly at startup.
            tracing::warn!("admin_secret is not configured; all admin requests will redirect to the login page");
        }

        if self.app_id.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: app_id cannot be empty".to_string(),
            });
        }

        if self.session.max_age.as_secs() == 0 {
            return Err(Error::Internal {
                operation: "Config validation: session.max_age must be greater than zero".to_string(),
            });
        }

        if !matches!(self.session.cookie_same_site.as_str(), "Strict" | "Lax" | "None") {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: session.cookie_same_site must be one of Strict, Lax, None (got {})",
                    self.session.cookie_same_site
                ),
            });
        }

        for (name, path) in [("gate.login_path", &self.gate.login_path), ("gate.admin_path", &self.gate.admin_path)] {
            if !path.starts_with('/') {
                return Err(Error::Internal {
                    operation: format!("Config validation: {name} must start with '/' (got {path})"),
                });
            }
        }

        if self.gate.admin_path.starts_with(&self.gate.login_path) {
            return Err(Error::Internal {
                operation: "Config validation: gate.admin_path cannot be nested under gate.login_path; \
                 the admin area would be unprotected"
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
