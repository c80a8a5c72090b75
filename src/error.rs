//! Error types returned by the PKI engine.
//!
//! Codec helpers work with `anyhow::Result` internally; everything that
//! crosses the engine boundary is mapped into [`PkiError`] so callers can tell
//! a user input problem from a programming error or a broken CA.

use std::fmt;

use thiserror::Error;

/// A single rejected field of a validated input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// All field errors collected while validating one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `field` has at least one error.
    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    pub fn into_result(self) -> Result<(), PkiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PkiError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{} {}", error.field, error.message)?;
            first = false;
        }
        Ok(())
    }
}

/// Operations a CA refuses to perform on its own root certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfOperation {
    Revoke,
    Reissue,
}

impl fmt::Display for SelfOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelfOperation::Revoke => f.write_str("revoke"),
            SelfOperation::Reissue => f.write_str("reissue"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("invalid certificate owner identifier {identifier:?}: {reason}")]
    InvalidOwnerIdentifier {
        identifier: String,
        reason: &'static str,
    },

    /// The caller handed the CA its own identity certificate where a
    /// subordinate certificate was expected.
    #[error("BUG: certificate authority {ca_id} can't {operation} its own certificate")]
    SelfOperation {
        ca_id: i64,
        operation: SelfOperation,
    },

    #[error("certificate authority {ca_id} has no usable root certificate or key")]
    MissingRootMaterial { ca_id: i64 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("certificate {0} is already revoked")]
    AlreadyRevoked(i64),

    #[error("certificate {0} is revoked and must be reissued instead of renewed")]
    RenewRevoked(i64),

    /// CA certificates are created with their CA and removed with it.
    #[error("{0} certificates are managed only through their certificate authority")]
    UnsupportedRole(crate::certifiable::CertificateRole),

    #[error("cryptographic operation failed: {0:#}")]
    Crypto(#[from] anyhow::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<openssl::error::ErrorStack> for PkiError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        PkiError::Crypto(e.into())
    }
}

pub type Result<T, E = PkiError> = std::result::Result<T, E>;
