//! Identity provider signing key store.
//!
//! The [`KeyStore`] fetches the provider's published key set
//! (`GET {uaa}/token_keys`), keeps it in memory indexed by key id and refreshes
//! it lazily when a token names a key id it has not seen.
//!
//! # Refresh behavior
//!
//! - The key set is replaced as a whole through an [`ArcSwap`]; readers see
//!   either the old or the new set, never a mix.
//! - Concurrent misses share one outbound fetch. The fetch runs in its own
//!   task, so a caller that goes away does not cancel it for the others.
//! - A failed fetch keeps the last-good set. Keys are never evicted on error.
//! - The startup fetch uses a long timeout; fetches triggered by requests use
//!   a short one so a slow provider cannot stall the request path.
//!
//! # Security Considerations
//!
//! - Only HTTPS endpoints are accepted unless `allow_http` is set (tests).
//! - Responses larger than `max_response_size` are rejected.
//! - Only RSA keys are kept. Keys of any other type are skipped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::Mutex;
use serde::Deserialize;
use url::Url;

use crate::config::KeyStoreConfig;

/// Errors that can occur while fetching or parsing the key set.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyStoreError {
    /// A network error occurred while fetching the key set.
    #[error("Network error: {0}")]
    Network(String),

    /// The fetch did not complete within the configured timeout.
    #[error("Key fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint returned a non-success status code.
    #[error("HTTP error: status {0}")]
    Http(u16),

    /// The response could not be parsed as a key set.
    #[error("Failed to parse key set: {0}")]
    Parse(String),

    /// An RSA key in the set is unusable.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The endpoint scheme is not allowed (must be HTTPS in production).
    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// The endpoint URL could not be built.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },

    /// The HTTP client could not be built or the fetch task failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Key Set
// =============================================================================

/// A verified-usable public signing key.
#[derive(Clone)]
pub struct PublicKey {
    kid: String,
    key: DecodingKey,
    algorithm: Option<Algorithm>,
}

impl PublicKey {
    /// Builds a key from base64url-encoded RSA modulus and exponent.
    ///
    /// # Errors
    ///
    /// Returns `KeyStoreError::InvalidKey` if the components are not valid
    /// base64url.
    pub fn from_rsa_components(
        kid: impl Into<String>,
        n: &str,
        e: &str,
        algorithm: Option<Algorithm>,
    ) -> Result<Self, KeyStoreError> {
        let kid = kid.into();
        let key = DecodingKey::from_rsa_components(n, e)
            .map_err(|err| KeyStoreError::InvalidKey(format!("{kid}: {err}")))?;
        Ok(Self {
            kid,
            key,
            algorithm,
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Algorithm the provider published for this key, if any.
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Immutable map of key id to public key.
#[derive(Debug, Clone, Default)]
pub struct PublicKeySet {
    keys: HashMap<String, Arc<PublicKey>>,
}

#[derive(Deserialize)]
struct RawKeySet {
    #[serde(default)]
    keys: Vec<RawJwk>,
}

#[derive(Deserialize)]
struct RawJwk {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
    alg: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
}

impl PublicKeySet {
    /// Builds a set from already-parsed keys. Later duplicates of a key id win.
    #[must_use]
    pub fn from_keys(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|k| (k.kid.clone(), Arc::new(k)))
                .collect(),
        }
    }

    /// Parses a published key set document.
    ///
    /// Non-RSA keys and encryption keys are skipped. An RSA key with a missing
    /// id, missing components, or an algorithm outside the RSA family fails
    /// the whole document, so a half-understood set never replaces a good one.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for invalid JSON and `InvalidKey` for unusable RSA keys.
    pub fn from_json(body: &[u8]) -> Result<Self, KeyStoreError> {
        let raw: RawKeySet =
            serde_json::from_slice(body).map_err(|e| KeyStoreError::Parse(e.to_string()))?;

        let mut keys = Vec::with_capacity(raw.keys.len());
        for jwk in raw.keys {
            if jwk.kty != "RSA" {
                tracing::debug!(kty = %jwk.kty, kid = ?jwk.kid, "Skipping non-RSA key");
                continue;
            }
            if jwk.key_use.as_deref() == Some("enc") {
                tracing::debug!(kid = ?jwk.kid, "Skipping encryption key");
                continue;
            }

            let kid = jwk
                .kid
                .filter(|k| !k.is_empty())
                .ok_or_else(|| KeyStoreError::InvalidKey("RSA key without kid".to_string()))?;
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                return Err(KeyStoreError::InvalidKey(format!(
                    "{kid}: missing modulus or exponent"
                )));
            };
            let algorithm = match jwk.alg.as_deref() {
                None => None,
                Some(alg) => Some(rsa_algorithm(alg).ok_or_else(|| {
                    KeyStoreError::InvalidKey(format!("{kid}: unsupported algorithm {alg}"))
                })?),
            };

            keys.push(PublicKey::from_rsa_components(kid, n, e, algorithm)?);
        }

        Ok(Self::from_keys(keys))
    }

    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<PublicKey>> {
        self.keys.get(kid).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids in the set, sorted.
    #[must_use]
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Maps a JOSE algorithm name to an allowed RSA algorithm.
#[must_use]
pub fn rsa_algorithm(name: &str) -> Option<Algorithm> {
    match name {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        _ => None,
    }
}

// =============================================================================
// Key Store
// =============================================================================

type SharedRefresh = Shared<BoxFuture<'static, Result<(), KeyStoreError>>>;

#[derive(Default)]
struct RefreshState {
    /// The fetch every concurrent miss waits on.
    in_flight: Option<SharedRefresh>,
    /// Bumped each time a fetch completes, successful or not.
    generation: u64,
}

struct Inner {
    http_client: reqwest::Client,
    endpoint: Url,
    config: KeyStoreConfig,
    keys: ArcSwap<PublicKeySet>,
    refresh: Mutex<RefreshState>,
    fetches: AtomicU64,
}

/// Cached, lazily refreshed set of provider signing keys.
///
/// Cloning is cheap; clones share the cache.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<Inner>,
}

impl KeyStore {
    /// Creates an empty store for a key endpoint without fetching.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScheme` for a non-HTTPS endpoint (unless `allow_http`)
    /// and `Internal` if the HTTP client cannot be built.
    pub fn new(endpoint: Url, config: KeyStoreConfig) -> Result<Self, KeyStoreError> {
        validate_scheme(&endpoint, config.allow_http)?;

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| KeyStoreError::Internal(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                endpoint,
                config,
                keys: ArcSwap::from_pointee(PublicKeySet::default()),
                refresh: Mutex::new(RefreshState::default()),
                fetches: AtomicU64::new(0),
            }),
        })
    }

    /// Creates a store for `{uaa_url}/token_keys` and performs the startup
    /// fetch with the long startup timeout.
    ///
    /// # Errors
    ///
    /// Returns the fetch error. Callers treat this as "bearer tokens
    /// unsupported", not as a fatal condition.
    pub async fn initialize(uaa_url: &str, config: KeyStoreConfig) -> Result<Self, KeyStoreError> {
        let endpoint = token_keys_url(uaa_url)?;
        let store = Self::new(endpoint, config)?;
        let count = store.load().await?;
        tracing::info!(
            endpoint = %store.inner.endpoint,
            keys = count,
            "Signing keys loaded"
        );
        Ok(store)
    }

    /// Fetches the key set with the startup timeout and installs it.
    ///
    /// Returns the number of keys installed.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the current set is kept.
    pub async fn load(&self) -> Result<usize, KeyStoreError> {
        let set = self.inner.fetch(self.inner.config.startup_timeout).await?;
        let count = set.len();
        self.inner.keys.store(Arc::new(set));
        self.inner.refresh.lock().generation += 1;
        Ok(count)
    }

    /// Looks up a key without ever fetching.
    #[must_use]
    pub fn lookup_cached(&self, kid: &str) -> Option<Arc<PublicKey>> {
        self.inner.keys.load().get(kid)
    }

    /// Looks up a key, refreshing the set once if it is not cached.
    ///
    /// A refresh failure is logged and reported as a miss.
    pub async fn lookup(&self, kid: &str) -> Option<Arc<PublicKey>> {
        let observed = self.generation();
        if let Some(key) = self.lookup_cached(kid) {
            return Some(key);
        }

        tracing::debug!(kid = %kid, "Signing key not cached, refreshing key set");
        if let Err(e) = self.refresh_on_miss(observed).await {
            tracing::warn!(
                error = %e,
                kid = %kid,
                cached_keys = self.inner.keys.load().len(),
                "Key set refresh failed, keeping last-good keys"
            );
        }
        self.lookup_cached(kid)
    }

    /// Joins or starts the shared refresh.
    ///
    /// `observed` is the generation the caller read before its cache miss. If
    /// a refresh has completed since then, the caller's miss is already
    /// answered by the current set and no new fetch is started.
    ///
    /// # Errors
    ///
    /// Returns the error of the shared fetch. The cached set is unchanged on
    /// error.
    pub async fn refresh_on_miss(&self, observed: u64) -> Result<(), KeyStoreError> {
        let refresh = {
            let mut state = self.inner.refresh.lock();
            if state.generation != observed {
                return Ok(());
            }
            match &state.in_flight {
                Some(shared) => shared.clone(),
                None => {
                    let shared = self.spawn_refresh();
                    state.in_flight = Some(shared.clone());
                    shared
                }
            }
        };
        refresh.await
    }

    /// Starts a refresh in its own task. The task clears the in-flight slot
    /// and bumps the generation when it finishes.
    fn spawn_refresh(&self) -> SharedRefresh {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let result = inner.fetch(inner.config.refresh_timeout).await;
            let outcome = match result {
                Ok(set) => {
                    tracing::info!(keys = set.len(), "Signing key set refreshed");
                    inner.keys.store(Arc::new(set));
                    Ok(())
                }
                Err(e) => Err(e),
            };
            let mut state = inner.refresh.lock();
            state.generation += 1;
            state.in_flight = None;
            outcome
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(KeyStoreError::Internal(format!("refresh task failed: {e}"))),
            }
        }
        .boxed()
        .shared()
    }

    /// Completed-refresh counter used to detect refreshes that raced a miss.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.refresh.lock().generation
    }

    /// Number of outbound key set fetches issued so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::Relaxed)
    }

    /// Key ids currently cached, sorted.
    #[must_use]
    pub fn key_ids(&self) -> Vec<String> {
        self.inner.keys.load().key_ids()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("keys", &self.key_ids())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn fetch(&self, timeout: Duration) -> Result<PublicKeySet, KeyStoreError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = %self.endpoint, "Fetching signing keys");

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                KeyStoreError::Timeout(timeout)
            } else {
                KeyStoreError::Network(e.to_string())
            }
        };

        let response = self
            .http_client
            .get(self.endpoint.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        if !response.status().is_success() {
            return Err(KeyStoreError::Http(response.status().as_u16()));
        }

        let max_size = self.config.max_response_size;
        if let Some(len) = response.content_length()
            && len as usize > max_size
        {
            return Err(KeyStoreError::ResponseTooLarge { max_size });
        }

        let body = response.bytes().await.map_err(map_err)?;
        if body.len() > max_size {
            return Err(KeyStoreError::ResponseTooLarge { max_size });
        }

        PublicKeySet::from_json(&body)
    }
}

/// Builds the key endpoint URL from the UAA base URL.
///
/// # Errors
///
/// Returns `InvalidEndpoint` if the base URL does not parse.
pub fn token_keys_url(uaa_url: &str) -> Result<Url, KeyStoreError> {
    let base = uaa_url.trim_end_matches('/');
    Url::parse(&format!("{base}/token_keys"))
        .map_err(|e| KeyStoreError::InvalidEndpoint(format!("{uaa_url}: {e}")))
}

fn validate_scheme(uri: &Url, allow_http: bool) -> Result<(), KeyStoreError> {
    match uri.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        _ => Err(KeyStoreError::InvalidScheme),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Any valid base64url decodes; the math is only checked at verify time.
    const N: &str = "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw";
    const E: &str = "AQAB";

    fn rsa_jwk(kid: &str) -> serde_json::Value {
        serde_json::json!({ "kty": "RSA", "kid": kid, "alg": "RS256", "use": "sig", "n": N, "e": E })
    }

    #[test]
    fn test_parse_key_set() {
        let body = serde_json::json!({ "keys": [rsa_jwk("k1"), rsa_jwk("k2")] });
        let set = PublicKeySet::from_json(body.to_string().as_bytes()).unwrap();
        assert_eq!(set.key_ids(), vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(set.get("k1").unwrap().algorithm(), Some(Algorithm::RS256));
        assert!(set.get("k3").is_none());
    }

    #[test]
    fn test_parse_skips_non_rsa_and_encryption_keys() {
        let body = serde_json::json!({ "keys": [
            rsa_jwk("k1"),
            { "kty": "EC", "kid": "ec1", "crv": "P-256", "x": "abc", "y": "def" },
            { "kty": "oct", "kid": "sym", "k": "c2VjcmV0" },
            { "kty": "RSA", "kid": "enc1", "use": "enc", "n": N, "e": E }
        ]});
        let set = PublicKeySet::from_json(body.to_string().as_bytes()).unwrap();
        assert_eq!(set.key_ids(), vec!["k1".to_string()]);
    }

    #[test]
    fn test_parse_rejects_broken_rsa_key() {
        let body = serde_json::json!({ "keys": [
            rsa_jwk("k1"),
            { "kty": "RSA", "kid": "k2", "e": E }
        ]});
        let err = PublicKeySet::from_json(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, KeyStoreError::InvalidKey(_)));

        let body = serde_json::json!({ "keys": [{ "kty": "RSA", "n": N, "e": E }] });
        assert!(PublicKeySet::from_json(body.to_string().as_bytes()).is_err());

        let body = serde_json::json!({ "keys": [{ "kty": "RSA", "kid": "k", "alg": "HS256", "n": N, "e": E }] });
        assert!(PublicKeySet::from_json(body.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = PublicKeySet::from_json(b"<html>").unwrap_err();
        assert!(matches!(err, KeyStoreError::Parse(_)));
    }

    #[test]
    fn test_empty_key_set_is_valid() {
        let set = PublicKeySet::from_json(br#"{"keys":[]}"#).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_rsa_algorithm_allowlist() {
        assert_eq!(rsa_algorithm("RS384"), Some(Algorithm::RS384));
        assert_eq!(rsa_algorithm("HS256"), None);
        assert_eq!(rsa_algorithm("none"), None);
        assert_eq!(rsa_algorithm("PS256"), None);
    }

    #[test]
    fn test_token_keys_url() {
        let url = token_keys_url("https://uaa.example.com/").unwrap();
        assert_eq!(url.as_str(), "https://uaa.example.com/token_keys");
        assert!(token_keys_url("::not a url").is_err());
    }

    #[test]
    fn test_validate_scheme() {
        let https = Url::parse("https://uaa.example.com/token_keys").unwrap();
        assert!(validate_scheme(&https, false).is_ok());

        let http = Url::parse("http://uaa.example.com/token_keys").unwrap();
        assert!(matches!(
            validate_scheme(&http, false),
            Err(KeyStoreError::InvalidScheme)
        ));
        assert!(validate_scheme(&http, true).is_ok());
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let endpoint = Url::parse("https://uaa.example.com/token_keys").unwrap();
        let store = KeyStore::new(endpoint, KeyStoreConfig::default()).unwrap();
        assert!(store.key_ids().is_empty());
        assert!(store.lookup_cached("k1").is_none());
        assert_eq!(store.fetch_count(), 0);
        assert_eq!(store.generation(), 0);
    }
}
