//! Bearer token verification against the provider's signing keys.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. three dot-separated segments
//! 2. header decodes and names a `kid`
//! 3. header algorithm is RS256, RS384 or RS512 (before any key lookup)
//! 4. the key id resolves, with one key set refresh on a miss
//! 5. the signature verifies (before any claim is looked at)
//! 6. `nbf`, then `exp`, then identity claims

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;

use super::VerificationError;
use super::claims::{RawClaims, VerifiedClaims};
use crate::jwks::{KeyStore, PublicKey, rsa_algorithm};

/// Verifies bearer tokens issued by the identity provider.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: KeyStore,
}

/// The header fields the verifier relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TokenHeader {
    pub(crate) kid: String,
    pub(crate) alg: Algorithm,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: Option<String>,
    kid: Option<String>,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(keys: KeyStore) -> Self {
        Self { keys }
    }

    #[must_use]
    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// Verifies a token at the current time.
    ///
    /// # Errors
    ///
    /// Returns the first check that failed.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, VerificationError> {
        self.verify_at(token, time::OffsetDateTime::now_utc().unix_timestamp())
            .await
    }

    /// Verifies a token as of `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns the first check that failed.
    pub async fn verify_at(
        &self,
        token: &str,
        now: i64,
    ) -> Result<VerifiedClaims, VerificationError> {
        let header = parse_header(token)?;

        let key = self
            .keys
            .lookup(&header.kid)
            .await
            .ok_or_else(|| VerificationError::UnknownSigningKey(header.kid.clone()))?;

        verify_with_key(token, &header, &key, now)
    }
}

/// Checks structure and header without touching any key.
pub(crate) fn parse_header(token: &str) -> Result<TokenHeader, VerificationError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(VerificationError::Malformed(format!(
            "expected 3 segments, got {}",
            segments.len()
        )));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(segments[0])
        .map_err(|e| VerificationError::Malformed(format!("header is not base64url: {e}")))?;
    let raw: RawHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| VerificationError::Malformed(format!("header is not JSON: {e}")))?;

    let kid = raw
        .kid
        .filter(|k| !k.is_empty())
        .ok_or(VerificationError::MissingKeyId)?;

    let alg_name = raw.alg.unwrap_or_default();
    let alg = rsa_algorithm(&alg_name).ok_or(VerificationError::UnsupportedAlgorithm(alg_name))?;

    Ok(TokenHeader { kid, alg })
}

/// Verifies the signature with `key`, then the claims.
pub(crate) fn verify_with_key(
    token: &str,
    header: &TokenHeader,
    key: &PublicKey,
    now: i64,
) -> Result<VerifiedClaims, VerificationError> {
    // A key published for one RSA algorithm must not verify another.
    if key.algorithm().is_some_and(|published| published != header.alg) {
        return Err(VerificationError::UntrustedSignature);
    }

    // Time claims are checked by `RawClaims::validate` once the signature holds.
    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<RawClaims>(token, key.decoding_key(), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                VerificationError::Malformed(e.to_string())
            }
            _ => VerificationError::UntrustedSignature,
        })?;

    data.claims.validate(now)
}
