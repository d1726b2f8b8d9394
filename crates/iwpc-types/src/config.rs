//! Protocol configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default deadline for the identity handshake and for `open()`.
pub const INITIALIZATION_TIMEOUT_MS: u64 = 3_000;

/// Default deadline for a single `invoke()`.
pub const CALL_TIMEOUT_MS: u64 = 3_000;

/// Name of the broadcast channel carrying call traffic.
pub const DEFAULT_CHANNEL_NAME: &str = "IWPC";

/// Tunables shared by an endpoint and the agents it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IwpcConfig {
    /// Handshake and child-open deadline in milliseconds.
    pub initialization_timeout_ms: u64,
    /// Default invoke deadline in milliseconds.
    pub call_timeout_ms: u64,
    /// Emit protocol diagnostics.
    pub debug: bool,
    /// Broadcast channel joined for invoke/return traffic.
    pub channel_name: String,
    /// Close a child window whose handshake never completed.
    pub close_child_on_open_timeout: bool,
}

impl Default for IwpcConfig {
    fn default() -> Self {
        Self {
            initialization_timeout_ms: INITIALIZATION_TIMEOUT_MS,
            call_timeout_ms: CALL_TIMEOUT_MS,
            debug: false,
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            close_child_on_open_timeout: false,
        }
    }
}

impl IwpcConfig {
    /// Handshake and `open()` deadline.
    pub fn initialization_timeout(&self) -> Duration {
        Duration::from_millis(self.initialization_timeout_ms)
    }

    /// Default deadline for a call.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Per-call overrides for `invoke()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Replaces the configured call timeout for this call only.
    pub timeout: Option<Duration>,
}

impl InvokeOptions {
    /// Options overriding the call deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IwpcConfig::default();
        assert_eq!(config.channel_name, "IWPC");
        assert_eq!(config.initialization_timeout(), Duration::from_secs(3));
        assert_eq!(config.call_timeout(), Duration::from_secs(3));
        assert!(!config.debug);
        assert!(!config.close_child_on_open_timeout);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: IwpcConfig = serde_json::from_str(r#"{"debug":true}"#).unwrap();
        assert!(config.debug);
        assert_eq!(config.call_timeout_ms, CALL_TIMEOUT_MS);
    }
}
