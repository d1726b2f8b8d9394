//! Core types for the inter-window procedure call (IWPC) protocol.
//!
//! This crate defines the data structures shared by every IWPC participant:
//! identities, wire messages, configuration and errors. It contains no
//! protocol logic.

pub mod config;
pub mod error;
pub mod identity;
pub mod message;
pub mod window;

pub use config::{InvokeOptions, IwpcConfig};
pub use error::{IwpcError, IwpcResult};
pub use identity::{CorrelationId, Identity};
pub use message::{HandshakeMessage, InvokeMessage, IwpcMessage, ReturnMessage};
pub use window::ChildWindowOptions;
