//! Authentication and authorization error types.
//!
//! Every rejection the auth layer can produce is a distinct variant of
//! [`AuthError`]. The HTTP surface only ever sees a generic message per
//! variant (see `middleware::error`); the detailed reason is logged.

use std::fmt;

use crate::role::Role;
use crate::token::VerificationError;

/// Errors that can occur while authenticating or authorizing a request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The bearer token is structurally invalid or uses a disallowed algorithm.
    #[error("Malformed credential: {message}")]
    MalformedCredential {
        /// Description of what is wrong with the credential.
        message: String,
    },

    /// The `Authorization` header does not use the `Bearer` scheme.
    #[error("Invalid authorization format")]
    InvalidAuthorizationScheme,

    /// The token names a key id that is not in the published key set.
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// The key id from the token header.
        kid: String,
    },

    /// The token signature does not verify against the named key.
    #[error("Untrusted signature")]
    UntrustedSignature,

    /// The token `exp` claim is in the past.
    #[error("Credential expired")]
    ExpiredCredential,

    /// The token `nbf` claim is in the future.
    #[error("Credential not yet valid")]
    NotYetValidCredential,

    /// The token carries neither user nor client identity claims.
    #[error("Missing identity claims")]
    MissingIdentityClaims,

    /// Bearer tokens cannot be verified because no key store is available.
    #[error("Bearer authentication unavailable")]
    BearerUnavailable,

    /// The identity provider could not be reached or answered with an error.
    #[error("Identity provider unavailable: {message}")]
    UpstreamUnavailable {
        /// Description of the upstream failure.
        message: String,
    },

    /// The identity provider rejected the presented username and password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The session cookie does not name a live session.
    #[error("Session not found")]
    SessionNotFound,

    /// The session existed but its tokens could not be refreshed.
    #[error("Session expired")]
    SessionExpired,

    /// No credential was presented and the auth mode requires one.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The double-submit CSRF token is missing or does not match.
    #[error("CSRF token missing or invalid")]
    CsrfMismatch,

    /// The caller's role is below the role the route requires.
    #[error("Role {actual} is insufficient, {required} required")]
    RoleInsufficient {
        /// The role the route requires.
        required: Role,
        /// The role the caller holds.
        actual: Role,
    },

    /// Too many requests for the caller's rate limit key.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the current window resets.
        retry_after_secs: u64,
    },

    /// The request body or parameters are invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `MalformedCredential` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedCredential {
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamUnavailable` error.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error was caused by the client.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::Internal { .. }
        )
    }

    /// Returns the category of this error for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedCredential { .. }
            | Self::UnknownSigningKey { .. }
            | Self::UntrustedSignature
            | Self::ExpiredCredential
            | Self::NotYetValidCredential
            | Self::MissingIdentityClaims => ErrorCategory::Token,
            Self::InvalidAuthorizationScheme
            | Self::BearerUnavailable
            | Self::InvalidCredentials
            | Self::AuthenticationRequired => ErrorCategory::Authentication,
            Self::SessionNotFound | Self::SessionExpired => ErrorCategory::Session,
            Self::CsrfMismatch | Self::RoleInsufficient { .. } => ErrorCategory::Authorization,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::UpstreamUnavailable { .. } => ErrorCategory::Upstream,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<VerificationError> for AuthError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::Malformed(message) => Self::MalformedCredential { message },
            VerificationError::MissingKeyId => Self::malformed("token header has no kid"),
            VerificationError::UnsupportedAlgorithm(alg) => {
                Self::malformed(format!("algorithm {alg} is not allowed"))
            }
            VerificationError::UnknownSigningKey(kid) => Self::UnknownSigningKey { kid },
            VerificationError::UntrustedSignature => Self::UntrustedSignature,
            VerificationError::Expired => Self::ExpiredCredential,
            VerificationError::NotYetValid => Self::NotYetValidCredential,
            VerificationError::MissingIdentityClaims => Self::MissingIdentityClaims,
        }
    }
}

/// Categories of auth errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bearer token validation failures.
    Token,
    /// Missing or unusable credentials.
    Authentication,
    /// Session lookup and refresh failures.
    Session,
    /// CSRF and role checks.
    Authorization,
    /// Request throttling.
    RateLimit,
    /// Request validation errors.
    Validation,
    /// Identity provider failures.
    Upstream,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Authentication => write!(f, "authentication"),
            Self::Session => write!(f, "session"),
            Self::Authorization => write!(f, "authorization"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Validation => write!(f, "validation"),
            Self::Upstream => write!(f, "upstream"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
