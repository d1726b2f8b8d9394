//! Inter-Window Procedure Calls (IWPC): RPC between related browsing contexts.
//!
//! A window that opens a child window can call procedures the child exposes,
//! and the child can call back. Windows first exchange identities over page
//! messaging, then correlate calls and returns over a shared broadcast
//! channel.
//!
//! ## Architecture
//!
//! - **IwpcWindow**: Local endpoint; owns the identity handshake and the procedures it exposes
//! - **WindowAgent**: Proxy for a remote endpoint; issues invokes and matches returns
//! - **ProcedureRegistry**: Process id to procedure map
//! - **Transport / Bus**: Named broadcast channel abstraction, with [`BroadcastHub`] in memory
//! - **BrowsingContext**: Window host abstraction, with [`Browser`] in memory

pub mod agent;
pub mod browser;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod pending;
pub mod registry;
pub mod topic;
pub mod window;

pub use agent::WindowAgent;
pub use browser::{Browser, BrowserWindow, PageLoader};
pub use config::{load_config, parse_config, read_config};
pub use context::{BrowsingContext, ContextHandle, ListenerId, MessageEvent, MessageListener};
pub use diagnostics::{init_tracing, Diagnostics};
pub use registry::{Procedure, ProcedureRegistry, ProcedureResult};
pub use topic::{BroadcastHub, Bus, Handler, Subscription, Topic, Transport};
pub use window::{HandshakeState, IwpcWindow};

pub use iwpc_types::{
    ChildWindowOptions, CorrelationId, HandshakeMessage, Identity, InvokeMessage, InvokeOptions,
    IwpcConfig, IwpcError, IwpcMessage, IwpcResult, ReturnMessage,
};
