//! Shared error taxonomy for license issuance and key material handling.

use thiserror::Error;

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Errors surfaced by the issuance core and both key stores.
///
/// Policy evaluation has its own taxonomy in `licmgr-policy`; a policy deny
/// is never an error in either crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LicenseError {
    /// Missing or contradictory caller-supplied setup (programming error).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed PEM, unsupported algorithm or key type, weak key length.
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Transport, auth or throttling failure against the remote key service.
    /// The remote message is carried verbatim.
    #[error("remote key service error: {0}")]
    Remote(String),

    /// Filesystem failure while loading key material.
    #[error("i/o error: {0}")]
    Io(String),

    /// The ambient request context was cancelled mid-operation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl LicenseError {
    /// Error category for log fields and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            LicenseError::Configuration(_) => "configuration",
            LicenseError::Crypto(_) => "crypto",
            LicenseError::Remote(_) => "remote",
            LicenseError::Io(_) => "io",
            LicenseError::Cancelled(_) => "cancelled",
        }
    }
}

impl From<std::io::Error> for LicenseError {
    fn from(error: std::io::Error) -> Self {
        LicenseError::Io(error.to_string())
    }
}
