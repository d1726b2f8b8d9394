//! Shared error types for IWPC.

use thiserror::Error;

/// Top-level error type for the protocol.
#[derive(Error, Debug)]
pub enum IwpcError {
    /// The opener never acknowledged this window's identity.
    #[error("Handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    /// The readiness gate settled as failed before the operation could run.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// A child window never announced its identity.
    #[error("Request for window id from child window timed out after {0} ms")]
    OpenTimeout(u64),

    /// No return arrived for a call within its deadline.
    #[error("Procedure call '{process_id}' timed out after {timeout_ms} ms")]
    InvokeTimeout {
        /// The procedure that was called.
        process_id: String,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The browsing context refused to create a child window.
    #[error("Could not obtain a reference to the child window: {0}")]
    WindowCreation(String),

    /// The owning endpoint was disposed while the operation was pending.
    #[error("Endpoint disposed")]
    Disposed,

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with IwpcError.
pub type IwpcResult<T> = Result<T, IwpcError>;
