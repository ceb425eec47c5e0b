//! Error types for control-plane operations

/// Errors returned by the OVS/OVN adapters.
///
/// The taxonomy matters to callers: configuration problems
/// ([`Error::InvalidConfig`], [`Error::MissingCredential`]) are fatal and not
/// worth retrying, while [`Error::Command`] wraps the external tool's stderr
/// and is left to the caller to retry or not (not every operation is safe to
/// repeat blindly). Expected-absence conditions such as an unset optional
/// column never surface here; they are converted to documented defaults at
/// the call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("OVN configured to use SSL but no SSL {0} defined")]
    MissingCredential(&'static str),

    #[error("{program} failed: {stderr}")]
    Command { program: String, stderr: String },

    #[error("{program} timed out")]
    Timeout { program: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
