//! Error types for trace capture and engine communication.
//!
//! All fallible operations in the Attest crates return `AttestResult<T>`.
//! Variants are grouped by who has to act: decode, connection and capability
//! failures poison the engine connection; protocol errors may be retried when
//! the engine says so; usage and structural errors are caller bugs.

use thiserror::Error;

use crate::protocol::ErrorData;

/// The unified error type for the Attest SDK.
#[derive(Debug, Error)]
pub enum AttestError {
    /// A response line was empty, not JSON, not an object, or not JSON-RPC 2.0.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// The engine answered a request with an error object.
    #[error("engine error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<ErrorData>,
    },

    /// The engine's stdio closed or could not be written.
    #[error("engine connection failed: {reason}")]
    Connection { reason: String },

    /// The handshake reported capabilities this SDK needs but the engine lacks.
    #[error("engine incompatible, missing capabilities: {}", missing.join(", "))]
    CapabilityMismatch { missing: Vec<String> },

    /// An operation was invoked in a state that does not allow it.
    #[error("usage error: {reason}")]
    Usage { reason: String },

    /// A trace or builder invariant was violated.
    #[error("structural error: {reason}")]
    Structural { reason: String },

    /// An adapter could not find a field it requires in a provider record.
    #[error("{adapter} extraction failed: {reason}")]
    Extraction { adapter: String, reason: String },

    /// The engine binary could not be located.
    #[error(
        "cannot find '{binary}' binary (searched: {}). Build the engine and put it on your PATH or in ./bin/",
        searched.join(", ")
    )]
    EngineNotFound {
        binary: String,
        searched: Vec<String>,
    },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A value could not be converted to or from JSON.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl AttestError {
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode { reason: reason.into() }
    }

    pub fn structural(reason: impl Into<String>) -> Self {
        Self::Structural { reason: reason.into() }
    }

    pub fn extraction(adapter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            adapter: adapter.into(),
            reason: reason.into(),
        }
    }

    /// True only for engine errors whose data marks the request as safe to resend.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Protocol { data: Some(data), .. } => data.retryable,
            _ => false,
        }
    }

    /// True when the engine connection can no longer be used and must be
    /// re-established with a fresh `start()`.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::Connection { .. } | Self::CapabilityMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for AttestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization { reason: e.to_string() }
    }
}

/// Convenience alias used throughout the Attest crates.
pub type AttestResult<T> = Result<T, AttestError>;
