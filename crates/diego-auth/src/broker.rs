//! Identity provider token exchange.
//!
//! [`IdentityBroker`] is the seam between sessions and the identity provider.
//! [`UaaIdentityBroker`] implements it against a Cloud Foundry UAA using the
//! OAuth2 password and refresh-token grants.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::IdentityProviderConfig;

/// Tokens returned by a successful grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the provider does not rotate refresh tokens.
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Provider user id, when the response carries one.
    pub user_id: Option<String>,
    /// Scopes from the response `scope` field, when present.
    pub scopes: Vec<String>,
}

/// Errors from token exchanges with the identity provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// The provider rejected the credentials or the refresh token.
    #[error("grant rejected by identity provider (status {status})")]
    Rejected {
        /// HTTP status returned by the provider.
        status: u16,
    },

    /// The provider failed or answered with an unexpected status.
    #[error("identity provider error: status {status}")]
    Upstream {
        /// HTTP status returned by the provider.
        status: u16,
    },

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("identity provider request timed out")]
    Timeout,

    /// The response body could not be parsed.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// The provider URL is missing or invalid.
    #[error("identity provider not configured: {0}")]
    NotConfigured(String),
}

impl BrokerError {
    /// Returns `true` if the provider answered and said no.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Exchanges credentials for tokens with the identity provider.
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    /// Resource-owner password grant.
    async fn password_grant(&self, username: &str, password: &str)
    -> Result<TokenGrant, BrokerError>;

    /// Refresh-token grant.
    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, BrokerError>;
}

#[derive(Deserialize)]
struct UaaTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    user_id: Option<String>,
    scope: Option<String>,
}

impl From<UaaTokenResponse> for TokenGrant {
    fn from(resp: UaaTokenResponse) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.filter(|t| !t.is_empty()),
            expires_in: resp.expires_in,
            user_id: resp.user_id.filter(|id| !id.is_empty()),
            scopes: resp
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// [`IdentityBroker`] backed by a UAA `/oauth/token` endpoint.
#[derive(Debug, Clone)]
pub struct UaaIdentityBroker {
    http_client: reqwest::Client,
    token_endpoint: Url,
    client_id: String,
    client_secret: String,
}

impl UaaIdentityBroker {
    /// Creates a broker for the UAA at `uaa_url`.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` if the URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(uaa_url: &str, config: &IdentityProviderConfig) -> Result<Self, BrokerError> {
        let base = uaa_url.trim_end_matches('/');
        let token_endpoint = Url::parse(&format!("{base}/oauth/token"))
            .map_err(|e| BrokerError::NotConfigured(format!("{uaa_url}: {e}")))?;

        Ok(Self {
            http_client: build_client(config)?,
            token_endpoint,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    #[must_use]
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    async fn grant(&self, form: &[(&str, &str)]) -> Result<TokenGrant, BrokerError> {
        let response = self
            .http_client
            .post(self.token_endpoint.as_str())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(BrokerError::Upstream {
                status: status.as_u16(),
            });
        }

        let body: UaaTokenResponse = response.json().await?;
        if body.access_token.is_empty() {
            return Err(BrokerError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }
        Ok(body.into())
    }
}

#[async_trait]
impl IdentityBroker for UaaIdentityBroker {
    async fn password_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenGrant, BrokerError> {
        self.grant(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ])
        .await
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, BrokerError> {
        self.grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

fn build_client(config: &IdentityProviderConfig) -> Result<reqwest::Client, BrokerError> {
    if config.skip_tls_verify {
        tracing::warn!("TLS certificate validation disabled for identity provider calls");
    }
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .danger_accept_invalid_certs(config.skip_tls_verify)
        .build()
        .map_err(|e| BrokerError::NotConfigured(e.to_string()))
}

#[derive(Deserialize, Default)]
struct CfInfo {
    #[serde(default)]
    links: CfInfoLinks,
}

#[derive(Deserialize, Default)]
struct CfInfoLinks {
    login: Option<CfLink>,
    uaa: Option<CfLink>,
}

#[derive(Deserialize)]
struct CfLink {
    href: Option<String>,
}

/// Discovers the UAA URL from the Cloud Foundry API.
///
/// Reads `links.login.href`, then `links.uaa.href` from `GET {cf_api}/v3/info`.
/// When neither is present, the API host is rewritten from `api.` to `login.`.
///
/// # Errors
///
/// Returns an error if the info endpoint cannot be reached or parsed.
pub async fn discover_uaa_url(
    cf_api_url: &str,
    config: &IdentityProviderConfig,
) -> Result<String, BrokerError> {
    let base = cf_api_url.trim_end_matches('/');
    let client = build_client(config)?;

    let response = client
        .get(format!("{base}/v3/info"))
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(BrokerError::Upstream {
            status: response.status().as_u16(),
        });
    }
    let info: CfInfo = response.json().await?;

    let href = |link: Option<CfLink>| link.and_then(|l| l.href).filter(|h| !h.is_empty());
    let uaa_url = href(info.links.login)
        .or_else(|| href(info.links.uaa))
        .unwrap_or_else(|| base.replacen("://api.", "://login.", 1));

    tracing::info!(uaa_url = %uaa_url, "Discovered identity provider URL");
    Ok(uaa_url)
}
