//! Broker Error Types

use std::fmt;

use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Failure reported by a [`crate::token::TokenBackend`].
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("PKCS#11 error: {0}")]
    Pkcs11(#[from] cryptoki::error::Error),
    #[error("{0}")]
    Other(String),
}

impl TokenError {
    pub fn other(msg: impl Into<String>) -> Self {
        TokenError::Other(msg.into())
    }
}

/// Native protocol step that produced a [`BrokerError::TokenOperationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOperation {
    Initialize,
    DiscoverSlots,
    OpenSession,
    FindObjects,
    GetAttributes,
    GenerateKey,
    GenerateKeyPair,
    DestroyObject,
}

impl fmt::Display for TokenOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenOperation::Initialize => "module initialization",
            TokenOperation::DiscoverSlots => "slot discovery",
            TokenOperation::OpenSession => "session open",
            TokenOperation::FindObjects => "object search",
            TokenOperation::GetAttributes => "attribute read",
            TokenOperation::GenerateKey => "key generation",
            TokenOperation::GenerateKeyPair => "key pair generation",
            TokenOperation::DestroyObject => "object destruction",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("No token available")]
    NoTokenAvailable,

    #[error("Authentication failed")]
    AuthenticationFailed {
        #[source]
        source: TokenError,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Key with label {label} already exists")]
    Conflict { label: String },

    #[error("Unsupported: {0}")]
    UnsupportedError(String),

    #[error("Key not found")]
    NotFound,

    #[error("Token operation failed during {operation}: {source}")]
    TokenOperationFailed {
        operation: TokenOperation,
        #[source]
        source: TokenError,
    },
}

impl BrokerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BrokerError::ValidationError(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        BrokerError::UnsupportedError(msg.into())
    }

    pub(crate) fn token(operation: TokenOperation) -> impl FnOnce(TokenError) -> Self {
        move |source| BrokerError::TokenOperationFailed { operation, source }
    }

    /// The underlying token diagnostic, if this failure came from the token.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            BrokerError::AuthenticationFailed { source }
            | BrokerError::TokenOperationFailed { source, .. } => Some(source.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== BrokerError Display Tests ====================

    #[test]
    fn test_no_token_display() {
        assert_eq!(BrokerError::NoTokenAvailable.to_string(), "No token available");
    }

    #[test]
    fn test_conflict_display() {
        let err = BrokerError::Conflict {
            label: "db-key".to_string(),
        };
        assert_eq!(err.to_string(), "Key with label db-key already exists");
    }

    #[test]
    fn test_token_operation_failed_display() {
        let err = BrokerError::token(TokenOperation::DestroyObject)(TokenError::other(
            "CKR_ACTION_PROHIBITED",
        ));
        assert_eq!(
            err.to_string(),
            "Token operation failed during object destruction: CKR_ACTION_PROHIBITED"
        );
    }

    // ==================== Diagnostic Tests ====================

    #[test]
    fn test_authentication_failure_keeps_diagnostic() {
        let err = BrokerError::AuthenticationFailed {
            source: TokenError::other("CKR_PIN_INCORRECT"),
        };
        assert_eq!(err.to_string(), "Authentication failed");
        assert_eq!(err.diagnostic().as_deref(), Some("CKR_PIN_INCORRECT"));
    }

    #[test]
    fn test_validation_has_no_diagnostic() {
        assert!(BrokerError::validation("bad hex").diagnostic().is_none());
    }
}
