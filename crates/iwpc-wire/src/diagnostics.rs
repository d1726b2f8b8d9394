//! Protocol diagnostics.
//!
//! Diagnostics never influence protocol behavior. Routine protocol events
//! (requests, returns, cleanups) are emitted only when the endpoint was
//! configured with `debug`; warnings and errors always are. Every event
//! carries a wall-clock timestamp so traces from several windows can be
//! interleaved.

use chrono::{SecondsFormat, Utc};
use std::fmt::Debug;
use tracing::{debug, error, info, warn};

/// Scoped, switchable logger for one endpoint or agent.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    enabled: bool,
    scope: &'static str,
}

impl Diagnostics {
    /// Create diagnostics for `scope`, emitting routine events only when `enabled`.
    pub fn new(enabled: bool, scope: &'static str) -> Self {
        Self { enabled, scope }
    }

    /// Whether routine events are emitted.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fine-grained protocol event, e.g. a state change.
    pub fn debug(&self, message: &str, detail: &dyn Debug) {
        if self.enabled {
            debug!(at = %timestamp(), scope = self.scope, detail = ?detail, "{message}");
        }
    }

    /// Routine protocol event.
    pub fn log(&self, message: &str, detail: &dyn Debug) {
        if self.enabled {
            info!(at = %timestamp(), scope = self.scope, detail = ?detail, "{message}");
        }
    }

    /// Always emitted.
    pub fn warn(&self, message: &str, detail: &dyn Debug) {
        warn!(at = %timestamp(), scope = self.scope, detail = ?detail, "{message}");
    }

    /// Always emitted.
    pub fn error(&self, message: &str, detail: &dyn Debug) {
        error!(at = %timestamp(), scope = self.scope, detail = ?detail, "{message}");
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Install a stderr `tracing` subscriber honoring `RUST_LOG`.
///
/// Falls back to `debug` or `info` depending on `debug`. Safe to call more
/// than once; later calls leave the installed subscriber in place.
pub fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .try_init();
}
