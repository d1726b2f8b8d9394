//! WindowAgent: proxy for one identified remote window.
//!
//! An agent joins the shared channel with its own membership, publishes
//! invokes addressed to the remote identity, and listens for returns
//! addressed to its owner. Calls are independent: each one is a separate
//! entry in the agent's pending table and settles when its own return (or
//! deadline) arrives, whatever order the calls were issued in.
//!
//! Agents share their channel membership between clones; it is closed when
//! the last clone is dropped.

use crate::context::ContextHandle;
use crate::diagnostics::Diagnostics;
use crate::pending::PendingTable;
use crate::topic::{Bus, Subscription, Transport};

use iwpc_types::config::InvokeOptions;
use iwpc_types::{CorrelationId, Identity, InvokeMessage, IwpcConfig, IwpcError, IwpcMessage, IwpcResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type CallTable = PendingTable<CorrelationId, Option<Value>>;

/// Handle for calling procedures on a remote window.
#[derive(Clone)]
pub struct WindowAgent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    window: ContextHandle,
    remote_id: Identity,
    owner_id: Identity,
    topic: Arc<dyn Transport<IwpcMessage>>,
    subscription: Subscription,
    calls: Arc<CallTable>,
    call_timeout: Duration,
    diagnostics: Diagnostics,
}

impl WindowAgent {
    /// Build an agent for `remote_id`, living in `window`, on behalf of the
    /// endpoint `owner_id`.
    pub fn new(
        window: ContextHandle,
        remote_id: Identity,
        owner_id: Identity,
        bus: &dyn Bus<IwpcMessage>,
        config: &IwpcConfig,
    ) -> Self {
        let topic = bus.join(&config.channel_name);
        let calls: Arc<CallTable> = Arc::new(PendingTable::new());
        let diagnostics = Diagnostics::new(config.debug, "agent");

        let subscription = {
            let owner_id = owner_id.clone();
            let calls = Arc::clone(&calls);
            topic.subscribe(Arc::new(move |message: &IwpcMessage| {
                handle_return(&owner_id, &calls, &diagnostics, message);
            }))
        };

        Self {
            inner: Arc::new(AgentInner {
                window,
                remote_id,
                owner_id,
                topic,
                subscription,
                calls,
                call_timeout: config.call_timeout(),
                diagnostics,
            }),
        }
    }

    /// The remote window.
    pub fn window(&self) -> ContextHandle {
        self.inner.window
    }

    /// Identity of the remote endpoint.
    pub fn id(&self) -> &Identity {
        &self.inner.remote_id
    }

    /// Identity of the endpoint this agent calls on behalf of.
    pub fn owner_id(&self) -> &Identity {
        &self.inner.owner_id
    }

    /// Number of calls still waiting for a return.
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.len()
    }

    /// Call `process_id` on the remote window.
    ///
    /// Resolves with the procedure's return value (`None` when it returned
    /// nothing or is not registered remotely), or fails with
    /// [`IwpcError::InvokeTimeout`] once the deadline passes.
    pub async fn invoke(
        &self,
        process_id: &str,
        args: Option<Value>,
        options: InvokeOptions,
    ) -> IwpcResult<Option<Value>> {
        let inner = &self.inner;
        let timeout = options.timeout.unwrap_or(inner.call_timeout);
        let correlation_id = CorrelationId::generate();
        let settlement = inner.calls.insert(correlation_id.clone(), timeout);

        let invoke = InvokeMessage {
            correlation_id: correlation_id.clone(),
            process_id: process_id.to_string(),
            target_id: inner.remote_id.clone(),
            sender_id: inner.owner_id.clone(),
            args,
        };

        let diagnostics = inner.diagnostics;
        let timed_out = invoke.clone();
        inner.calls.arm_deadline(correlation_id, move || {
            diagnostics.error("Procedure call timed out", &timed_out);
            IwpcError::InvokeTimeout {
                process_id: timed_out.process_id,
                timeout_ms: timeout.as_millis() as u64,
            }
        });

        inner.diagnostics.log("Requested a procedural call", &invoke);
        inner.topic.publish(IwpcMessage::Invoke(invoke));

        settlement.wait().await
    }

    /// Typed form of [`invoke`](Self::invoke): serializes `args` and
    /// deserializes the return value (an undefined return reads as `null`).
    pub async fn invoke_as<A, R>(&self, process_id: &str, args: &A, options: InvokeOptions) -> IwpcResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args)?;
        let value = self.invoke(process_id, Some(args), options).await?;
        Ok(serde_json::from_value(value.unwrap_or(Value::Null))?)
    }
}

fn handle_return(owner_id: &Identity, calls: &CallTable, diagnostics: &Diagnostics, message: &IwpcMessage) {
    let IwpcMessage::Return(ret) = message else {
        return;
    };
    if &ret.target_id != owner_id {
        return;
    }
    if calls.resolve(&ret.correlation_id, ret.return_value.clone()) {
        diagnostics.log("Returned the results of the procedure call", ret);
        diagnostics.debug("Task completed and removed", &ret.correlation_id);
    } else {
        // Late (already timed out) or meant for another agent of the same owner.
        diagnostics.debug("Return without pending call dropped", &ret.correlation_id);
    }
}

impl Drop for AgentInner {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        self.calls.clear();
        self.topic.close();
    }
}

impl fmt::Debug for WindowAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowAgent")
            .field("window", &self.inner.window)
            .field("id", &self.inner.remote_id)
            .field("owner_id", &self.inner.owner_id)
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}
