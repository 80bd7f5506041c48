//! Credential re-derivation
//!
//! The token is the only authentication gate: the caller's secret is joined
//! with the username and presented verbatim as the session PIN on every
//! operation. Treat the secret exactly as sensitive as the token PIN itself.

use std::fmt;

/// A (username, secret) pair supplied by the caller for a single operation.
#[derive(Clone)]
pub struct Credential {
    username: String,
    secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// PIN string presented to the token's login step.
    pub fn pin(&self) -> String {
        derive_pin(&self.username, &self.secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Build the token PIN as `"{username}:{secret}"`.
///
/// No escaping is applied. A username or secret containing `:` yields a PIN
/// that cannot be split back unambiguously; such credentials are unsupported
/// unless the caller escapes them first.
pub fn derive_pin(username: &str, secret: &str) -> String {
    format!("{}:{}", username, secret)
}
