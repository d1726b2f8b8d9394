//! Browsing-context abstraction.
//!
//! The endpoint needs very little from its hosting window: who opened it,
//! point-to-point page messaging for the handshake, the ability to open and
//! close windows, and message listeners. [`BrowsingContext`] captures exactly
//! that surface.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Opaque reference to a window, comparable across contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextHandle(u64);

impl ContextHandle {
    /// Wrap a raw window id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The numeric window id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// A page message as delivered to listeners.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// The posting window, if it is still known.
    pub source: Option<ContextHandle>,
    pub data: Value,
}

/// Listener for page messages.
pub type MessageListener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// Token returned by [`BrowsingContext::add_message_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw listener id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// The window hosting an endpoint.
pub trait BrowsingContext: Send + Sync + 'static {
    /// This window.
    fn handle(&self) -> ContextHandle;

    /// The window that opened this one, if any.
    fn opener(&self) -> Option<ContextHandle>;

    /// Post `data` to `target`. Delivery is asynchronous; unknown or closed
    /// targets drop the message.
    fn post_message(&self, target: ContextHandle, data: Value);

    fn add_message_listener(&self, listener: MessageListener) -> ListenerId;

    fn remove_message_listener(&self, id: ListenerId);

    /// Open `path` in a new window. `None` when the window could not be
    /// created (e.g. blocked popup).
    fn open(&self, path: &str, target: &str, features: &str) -> Option<ContextHandle>;

    /// Close any window reachable from this one.
    fn close_window(&self, handle: ContextHandle);

    /// Close this window.
    fn close(&self) {
        self.close_window(self.handle());
    }
}
