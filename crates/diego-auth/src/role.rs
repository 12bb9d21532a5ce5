//! Application roles and their resolution from token scopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scope granting the operator role.
pub const OPERATOR_SCOPE: &str = "diego-analyzer.operator";

/// Scope granting the viewer role.
pub const VIEWER_SCOPE: &str = "diego-analyzer.viewer";

/// Application role, ordered by privilege.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access to dashboards and reports.
    #[default]
    Viewer,
    /// Viewer access plus state-changing operations.
    Operator,
}

impl Role {
    /// Resolves a role from a token's scopes.
    ///
    /// The operator scope wins over the viewer scope. A token carrying
    /// neither gets the viewer role.
    #[must_use]
    pub fn from_scopes<S: AsRef<str>>(scopes: &[S]) -> Self {
        if scopes.iter().any(|s| s.as_ref() == OPERATOR_SCOPE) {
            Self::Operator
        } else {
            Self::Viewer
        }
    }

    /// Position in the role hierarchy. Higher levels include lower ones.
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::Viewer => 1,
            Self::Operator => 2,
        }
    }

    /// Returns `true` if this role grants at least `required`.
    #[must_use]
    pub fn satisfies(self, required: Role) -> bool {
        self.level() >= required.level()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "operator" => Ok(Self::Operator),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
