use thiserror::Error;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(format!("Database error: {}", err))
    }
}

impl From<secp256k1::Error> for AuditError {
    fn from(err: secp256k1::Error) -> Self {
        Self::Crypto(format!("secp256k1 error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    /// Missing or unusable input, e.g. checkpointing an empty chain.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Witness error: {0}")]
    Witness(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

impl AuditError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Wrap a storage failure with the operation that produced it.
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{}: {}", context, err))
    }

    /// Machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Witness(_) => "witness_error",
            Self::Crypto(_) => "crypto_error",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Cancelled(_) => "cancelled",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AuditError::bad_request("x").code(), "bad_request");
        assert_eq!(AuditError::not_found("audit entry", "abc").code(), "not_found");
        assert_eq!(AuditError::Cancelled("t".into()).code(), "cancelled");
    }

    #[test]
    fn test_not_found_message() {
        let err = AuditError::not_found("checkpoint", "1234");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "checkpoint not found: 1234");
    }
}
