//! Bearer token verification.
//!
//! - [`TokenVerifier`] - checks structure, algorithm, signature and claims
//! - [`VerifiedClaims`] - normalized identity extracted from a verified token
//! - [`VerificationError`] - one variant per rejection reason

mod claims;
mod verifier;

pub use claims::{VerifiedClaims, scopes_from_unverified_token};
pub use verifier::TokenVerifier;

/// Why a bearer token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// The token is not a well-formed compact JWS.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The header carries no `kid`.
    #[error("token header has no key id")]
    MissingKeyId,

    /// The header algorithm is not RS256, RS384 or RS512.
    #[error("algorithm {0} is not allowed")]
    UnsupportedAlgorithm(String),

    /// The key id is not in the key set, even after a refresh.
    #[error("unknown signing key {0}")]
    UnknownSigningKey(String),

    /// The signature does not verify.
    #[error("signature verification failed")]
    UntrustedSignature,

    /// `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// `nbf` is in the future.
    #[error("token not yet valid")]
    NotYetValid,

    /// Neither user nor client identity claims are present.
    #[error("token missing identity claims (user_name/client_id or user_id/sub)")]
    MissingIdentityClaims,
}
