//! Authentication and authorization configuration.
//!
//! Every section deserializes with defaults so a partial TOML file (or none at
//! all) yields a working configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! mode = "required"
//!
//! [auth.cookie]
//! secure = true
//!
//! [auth.identity_provider]
//! uaa_url = "https://login.sys.example.com"
//! request_timeout = "30s"
//!
//! [auth.session]
//! refresh_window = "5m"
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the auth gate treats requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthMode {
    /// Every request is authorized without any checks.
    Disabled,
    /// Credentials are checked when present; anonymous callers are viewers.
    #[default]
    Optional,
    /// Every request must carry a valid credential.
    Required,
}

impl AuthMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Optional => "optional",
            Self::Required => "required",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    /// An empty string selects the default (`optional`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "optional" => Ok(Self::Optional),
            "disabled" => Ok(Self::Disabled),
            "required" => Ok(Self::Required),
            other => Err(ConfigError::InvalidValue(format!(
                "invalid auth mode '{other}', must be disabled, optional, or required"
            ))),
        }
    }
}

impl TryFrom<String> for AuthMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AuthMode> for String {
    fn from(mode: AuthMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Root auth configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Auth gate mode.
    pub mode: AuthMode,

    /// Session and CSRF cookie settings.
    pub cookie: CookieConfig,

    /// Server-side session settings.
    pub session: SessionConfig,

    /// Signing key store settings.
    pub key_store: KeyStoreConfig,

    /// Identity provider (UAA) settings.
    pub identity_provider: IdentityProviderConfig,

    /// Per-route rate limits.
    pub rate_limiting: RateLimitingConfig,
}

/// Cookie attributes for the session and CSRF cookies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Set the `Secure` attribute. Only disable for plain-HTTP development.
    pub secure: bool,

    /// `Max-Age` of both cookies.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: true,
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Server-side session lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Refresh the access token when it expires within this window.
    #[serde(with = "humantime_serde")]
    pub refresh_window: Duration,

    /// Added to the access token lifetime to get the session TTL.
    #[serde(with = "humantime_serde")]
    pub ttl_buffer: Duration,

    /// Lower bound of the session TTL.
    #[serde(with = "humantime_serde")]
    pub min_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_window: Duration::from_secs(5 * 60),
            ttl_buffer: Duration::from_secs(10 * 60),
            min_ttl: Duration::from_secs(60),
        }
    }
}

/// Signing key store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Timeout of the initial key fetch at startup.
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Timeout of a key refresh triggered by an in-flight request.
    #[serde(with = "humantime_serde")]
    pub refresh_timeout: Duration,

    /// Maximum accepted key set response size in bytes.
    pub max_response_size: usize,

    /// Allow a plain-HTTP key endpoint. Testing only.
    pub allow_http: bool,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(5),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

/// Identity provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityProviderConfig {
    /// UAA base URL. Discovered from `cf_api_url` when absent.
    pub uaa_url: Option<String>,

    /// Cloud Foundry API URL used for UAA discovery.
    pub cf_api_url: Option<String>,

    /// OAuth client used for the password and refresh grants.
    pub client_id: String,

    /// Secret of `client_id`. The `cf` client has none.
    pub client_secret: String,

    /// Timeout of token and discovery requests.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Skip TLS certificate validation. Development only.
    pub skip_tls_verify: bool,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            uaa_url: None,
            cf_api_url: None,
            client_id: "cf".to_string(),
            client_secret: String::new(),
            request_timeout: Duration::from_secs(30),
            skip_tls_verify: false,
        }
    }
}

/// Per-tier request limits, counted per fixed window.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Disable to skip rate limiting entirely.
    pub enabled: bool,

    /// Length of a counting window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Login and logout requests per window per client IP.
    pub auth: u32,

    /// Session refresh requests per window per session.
    pub refresh: u32,

    /// Mutating API requests per window per user.
    pub write: u32,

    /// All other API requests per window per user.
    pub default: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(60),
            auth: 5,
            refresh: 10,
            write: 10,
            default: 100,
        }
    }
}

/// Upper bound of every rate limit tier.
pub const MAX_RATE_LIMIT: u32 = 10_000;

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - a rate limit tier is outside `1..=10000`
    /// - a timeout or window is zero
    /// - a configured identity provider URL does not parse
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limiting.enabled {
            let tiers = [
                ("auth", self.rate_limiting.auth),
                ("refresh", self.rate_limiting.refresh),
                ("write", self.rate_limiting.write),
                ("default", self.rate_limiting.default),
            ];
            for (name, limit) in tiers {
                if !(1..=MAX_RATE_LIMIT).contains(&limit) {
                    return Err(ConfigError::InvalidValue(format!(
                        "rate_limiting.{name} must be between 1 and {MAX_RATE_LIMIT}, got {limit}"
                    )));
                }
            }
            if self.rate_limiting.window.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "rate_limiting.window must be > 0".to_string(),
                ));
            }
        }

        if self.key_store.startup_timeout.is_zero() || self.key_store.refresh_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "key_store timeouts must be > 0".to_string(),
            ));
        }
        if self.identity_provider.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "identity_provider.request_timeout must be > 0".to_string(),
            ));
        }
        if self.identity_provider.client_id.is_empty() {
            return Err(ConfigError::Missing(
                "identity_provider.client_id".to_string(),
            ));
        }

        for (name, value) in [
            ("uaa_url", &self.identity_provider.uaa_url),
            ("cf_api_url", &self.identity_provider.cf_api_url),
        ] {
            if let Some(raw) = value.as_deref().filter(|v| !v.is_empty()) {
                url::Url::parse(raw).map_err(|e| {
                    ConfigError::InvalidValue(format!("identity_provider.{name}: {e}"))
                })?;
            }
        }

        Ok(())
    }
}
