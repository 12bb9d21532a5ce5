//! Token claim shapes and identity normalization.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use super::VerificationError;
use crate::role::Role;

/// Identity extracted from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedClaims {
    /// `user_name`, or `client_id` for client-credential tokens.
    pub username: String,
    /// `user_id`, or `sub` for client-credential tokens.
    pub user_id: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// `exp` as Unix seconds, when present.
    pub expires_at: Option<i64>,
}

impl VerifiedClaims {
    /// Role resolved from the token's scopes.
    #[must_use]
    pub fn role(&self) -> Role {
        Role::from_scopes(&self.scopes)
    }
}

/// `scope` is an array in UAA tokens and a space-separated string elsewhere.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    List(Vec<String>),
    Joined(String),
}

impl From<ScopeClaim> for Vec<String> {
    fn from(claim: ScopeClaim) -> Self {
        match claim {
            ScopeClaim::List(scopes) => scopes,
            ScopeClaim::Joined(joined) => joined.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// Claims read from the payload after the signature has been checked.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawClaims {
    sub: Option<String>,
    user_name: Option<String>,
    user_id: Option<String>,
    client_id: Option<String>,
    exp: Option<f64>,
    nbf: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_scope")]
    scope: Vec<String>,
}

fn deserialize_scope<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<ScopeClaim>::deserialize(deserializer)?
        .map(Vec::from)
        .unwrap_or_default())
}

impl RawClaims {
    /// Applies the time checks and identity normalization.
    ///
    /// `nbf` and `exp` are only enforced when positive. A token is still
    /// valid during the second named by `exp`.
    pub(crate) fn validate(self, now: i64) -> Result<VerifiedClaims, VerificationError> {
        let nbf = self.nbf.map(|v| v as i64).filter(|v| *v > 0);
        if nbf.is_some_and(|nbf| now < nbf) {
            return Err(VerificationError::NotYetValid);
        }

        let exp = self.exp.map(|v| v as i64).filter(|v| *v > 0);
        if exp.is_some_and(|exp| now > exp) {
            return Err(VerificationError::Expired);
        }

        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        let username = non_empty(self.user_name)
            .or_else(|| non_empty(self.client_id))
            .unwrap_or_default();
        let user_id = non_empty(self.user_id)
            .or_else(|| non_empty(self.sub))
            .unwrap_or_default();

        if username.is_empty() && user_id.is_empty() {
            return Err(VerificationError::MissingIdentityClaims);
        }

        Ok(VerifiedClaims {
            username,
            user_id,
            scopes: self.scope,
            expires_at: exp,
        })
    }
}

/// Reads the `scope` claim of a token without verifying it.
///
/// Only for tokens just received from the identity provider over TLS, where
/// the channel vouches for the token. Any decoding problem yields no scopes.
#[must_use]
pub fn scopes_from_unverified_token(token: &str) -> Vec<String> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Vec::new();
    };

    URL_SAFE_NO_PAD
        .decode(payload)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<RawClaims>(&bytes).ok())
        .map(|claims| claims.scope)
        .unwrap_or_default()
}
