//! IwpcWindow: the local endpoint of one browsing context.
//!
//! An [`IwpcWindow`] owns this window's identity, the procedures it exposes,
//! and the identity handshake with its opener:
//!
//! ```text
//!   Init ──(no opener)──────────────────────────────► Ready
//!     │
//!     └──(NOTIFY_IDENTITY sent)──► AwaitingAcknowledgement ──(ACK_IDENTITY)──► Ready
//!                                         │
//!                                         └──(deadline)──► Failed
//! ```
//!
//! The handshake travels over page messaging; procedure calls travel over the
//! shared broadcast channel. `open()` waits for this window to be ready before
//! creating the child, so the child's NOTIFY_IDENTITY always finds a listener.

use crate::agent::WindowAgent;
use crate::context::{BrowsingContext, ContextHandle, ListenerId, MessageEvent};
use crate::diagnostics::Diagnostics;
use crate::pending::PendingTable;
use crate::registry::{Procedure, ProcedureRegistry};
use crate::topic::{Bus, Subscription, Transport};

use iwpc_types::{
    ChildWindowOptions, HandshakeMessage, Identity, IwpcConfig, IwpcError, IwpcMessage,
    IwpcResult,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Handshake progress of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    AwaitingAcknowledgement,
    Ready,
    Failed,
}

impl HandshakeState {
    /// Ready and Failed are terminal.
    pub fn is_settled(self) -> bool {
        matches!(self, HandshakeState::Ready | HandshakeState::Failed)
    }
}

/// The local endpoint. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IwpcWindow {
    inner: Arc<WindowInner>,
}

struct WindowInner {
    id: Identity,
    context: Arc<dyn BrowsingContext>,
    bus: Arc<dyn Bus<IwpcMessage>>,
    config: IwpcConfig,
    topic: Arc<dyn Transport<IwpcMessage>>,
    procedures: ProcedureRegistry,
    state: watch::Sender<HandshakeState>,
    links: Mutex<Links>,
    opening: Arc<PendingTable<ContextHandle, WindowAgent>>,
    diagnostics: Diagnostics,
    disposed: AtomicBool,
}

#[derive(Default)]
struct Links {
    initialized: bool,
    listener: Option<ListenerId>,
    subscription: Option<Subscription>,
    parent_id: Option<Identity>,
    parent: Option<WindowAgent>,
    /// Why the handshake failed, when it did not simply time out.
    failure: Option<String>,
    /// Children that completed the handshake, by identity.
    children: HashMap<Identity, ContextHandle>,
    /// Agents for children that announced themselves before `open()` had
    /// recorded them.
    announced: HashMap<ContextHandle, WindowAgent>,
    /// Windows whose `open()` timed out before they announced themselves.
    expired: HashSet<ContextHandle>,
}

impl IwpcWindow {
    /// Create the endpoint for `context` and join the call channel.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        context: Arc<dyn BrowsingContext>,
        bus: Arc<dyn Bus<IwpcMessage>>,
        config: IwpcConfig,
    ) -> Self {
        let topic = bus.join(&config.channel_name);
        let (state, _) = watch::channel(HandshakeState::Init);
        let inner = Arc::new(WindowInner {
            id: Identity::generate(),
            context,
            bus,
            diagnostics: Diagnostics::new(config.debug, "window"),
            config,
            topic,
            procedures: ProcedureRegistry::new(),
            state,
            links: Mutex::new(Links::default()),
            opening: Arc::new(PendingTable::new()),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.topic.subscribe(Arc::new(move |message: &IwpcMessage| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_invoke(message);
            }
        }));
        inner.links().subscription = Some(subscription);

        Self { inner }
    }

    /// Start listening for handshake messages and, if this window has an
    /// opener, announce this window's identity to it. Later calls are no-ops.
    pub fn initialize(&self) {
        let inner = &self.inner;
        if inner.is_disposed() {
            return;
        }
        {
            let mut links = inner.links();
            if links.initialized {
                return;
            }
            links.initialized = true;
            let weak = Arc::downgrade(inner);
            links.listener = Some(inner.context.add_message_listener(Arc::new(
                move |event: &MessageEvent| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_page_message(event);
                    }
                },
            )));
        }

        let Some(opener) = inner.context.opener() else {
            inner
                .diagnostics
                .log("No opener, handshake skipped", &inner.id);
            inner.transition(HandshakeState::Init, HandshakeState::Ready);
            return;
        };

        if !inner.transition(HandshakeState::Init, HandshakeState::AwaitingAcknowledgement) {
            return;
        }
        let notify = HandshakeMessage::NotifyIdentity {
            my_id: inner.id.clone(),
        };
        match notify.to_value() {
            Ok(data) => inner.context.post_message(opener, data),
            Err(e) => {
                inner.diagnostics.error("Could not encode identity notification", &e);
                inner.fail(format!("identity notification not sent: {e}"));
                return;
            }
        }
        inner.diagnostics.log("Notified opener of identity", &notify);

        let weak = Arc::downgrade(inner);
        let timeout = inner.config.initialization_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.transition(HandshakeState::AwaitingAcknowledgement, HandshakeState::Failed) {
                inner
                    .diagnostics
                    .error("Opener never acknowledged identity", &inner.id);
            }
        });
    }

    /// Wait for the handshake to settle.
    ///
    /// Pending until [`initialize`](Self::initialize) has run; returns
    /// immediately once settled. Fails with
    /// [`IwpcError::HandshakeTimeout`] if the opener never acknowledged, or
    /// [`IwpcError::HandshakeFailed`] if the handshake was cut short.
    pub async fn ready(&self) -> IwpcResult<()> {
        let mut state = self.inner.state.subscribe();
        let settled = state.wait_for(|s| s.is_settled()).await.map(|s| *s);
        match settled {
            Ok(HandshakeState::Ready) => Ok(()),
            Ok(_) => match self.inner.links().failure.clone() {
                Some(reason) => Err(IwpcError::HandshakeFailed(reason)),
                None => Err(IwpcError::HandshakeTimeout(
                    self.inner.config.initialization_timeout_ms,
                )),
            },
            Err(_) => Err(IwpcError::Disposed),
        }
    }

    /// Expose `procedure` as `process_id`, replacing any previous one.
    pub fn register(&self, process_id: &str, procedure: Procedure) {
        self.inner.procedures.register(process_id, procedure);
    }

    /// Expose a closure over typed arguments and result as `process_id`.
    pub fn register_fn<A, R, F>(&self, process_id: &str, f: F)
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.inner.procedures.register_fn(process_id, f);
    }

    /// Stop exposing `process_id`. Unknown ids are ignored.
    pub fn unregister(&self, process_id: &str) {
        self.inner.procedures.unregister(process_id);
    }

    /// Open `path` in a child window and wait for it to complete the
    /// handshake.
    ///
    /// Waits for this window to be ready first. Fails with
    /// [`IwpcError::WindowCreation`] if no window could be created and with
    /// [`IwpcError::OpenTimeout`] if the child never announced itself. A
    /// timed-out child is left open unless `close_child_on_open_timeout` is
    /// set.
    pub async fn open(&self, path: &str, options: ChildWindowOptions) -> IwpcResult<WindowAgent> {
        self.ready().await?;
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(IwpcError::Disposed);
        }

        let handle = inner
            .context
            .open(path, options.target(), &options.features())
            .ok_or_else(|| IwpcError::WindowCreation(path.to_string()))?;
        inner.diagnostics.log("Opened child window", &(path, handle));

        let timeout = inner.config.initialization_timeout();
        let settlement = {
            let mut links = inner.links();
            let settlement = inner.opening.insert(handle, timeout);
            if let Some(agent) = links.announced.remove(&handle) {
                inner.opening.resolve(&handle, agent);
            }
            settlement
        };

        let weak = Arc::downgrade(inner);
        let timeout_ms = inner.config.initialization_timeout_ms;
        inner.opening.arm_deadline(handle, move || {
            if let Some(inner) = weak.upgrade() {
                let stale = {
                    let mut links = inner.links();
                    links.expired.insert(handle);
                    links.children.retain(|_, child| *child != handle);
                    links.announced.remove(&handle)
                };
                drop(stale);
                inner
                    .diagnostics
                    .error("Child window never announced its identity", &handle);
                if inner.config.close_child_on_open_timeout {
                    inner.context.close_window(handle);
                }
            }
            IwpcError::OpenTimeout(timeout_ms)
        });

        settlement.wait().await
    }

    /// Tear down listeners and the channel membership, and forget every
    /// procedure, child and pending open. Pending `open()` calls fail with
    /// [`IwpcError::Disposed`]; a handshake still in progress fails. Later
    /// calls are no-ops.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Dispose, then close the hosting window.
    pub fn close(&self) {
        self.inner.dispose();
        self.inner.context.close();
    }

    /// This endpoint's identity.
    pub fn id(&self) -> &Identity {
        &self.inner.id
    }

    /// The opener's identity, known once the handshake completed.
    pub fn parent_id(&self) -> Option<Identity> {
        self.inner.links().parent_id.clone()
    }

    /// Agent for the opener, available once the handshake completed.
    pub fn parent(&self) -> Option<WindowAgent> {
        self.inner.links().parent.clone()
    }

    /// Handle of the window a child with `child_id` lives in.
    pub fn child_window(&self, child_id: &Identity) -> Option<ContextHandle> {
        self.inner.links().children.get(child_id).copied()
    }

    /// Identities of every child that completed the handshake.
    pub fn child_ids(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = self.inner.links().children.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        *self.inner.state.borrow()
    }

    /// The window hosting this endpoint.
    pub fn context(&self) -> &Arc<dyn BrowsingContext> {
        &self.inner.context
    }

    /// Configuration the endpoint was built with.
    pub fn config(&self) -> &IwpcConfig {
        &self.inner.config
    }

    /// Procedures this endpoint exposes.
    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.inner.procedures
    }

    /// Number of `open()` calls still waiting for their child.
    pub fn pending_opens(&self) -> usize {
        self.inner.opening.len()
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl WindowInner {
    fn links(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Move from `from` to `to`. Returns `false` (and changes nothing) if
    /// the current state is not `from`.
    fn transition(&self, from: HandshakeState, to: HandshakeState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            self.diagnostics.debug("Handshake state changed", &(from, to));
        }
        moved
    }

    /// Abandon a handshake in progress, recording why.
    fn fail(&self, reason: String) {
        // Held across the transition so `ready()` never sees Failed without
        // the reason.
        let mut links = self.links();
        if self.transition(HandshakeState::AwaitingAcknowledgement, HandshakeState::Failed) {
            links.failure = Some(reason);
        }
    }

    /// Answer an invoke addressed to this endpoint.
    fn handle_invoke(&self, message: &IwpcMessage) {
        if &self.id != message.target_id() {
            return;
        }
        let IwpcMessage::Invoke(invoke) = message else {
            return;
        };
        if self.is_disposed() {
            return;
        }

        let return_value = match self.procedures.call(&invoke.process_id, invoke.args.clone()) {
            Some(Ok(value)) => value,
            Some(Err(reason)) => {
                self.diagnostics
                    .error("Procedure failed", &(&invoke.process_id, reason));
                None
            }
            None => {
                self.diagnostics
                    .warn("No procedure registered for invoke", invoke);
                None
            }
        };

        let ret = invoke.reply(return_value);
        self.diagnostics.log("Returning procedure result", &ret);
        self.topic.publish(IwpcMessage::Return(ret));
    }

    fn handle_page_message(self: &Arc<Self>, event: &MessageEvent) {
        let Some(message) = HandshakeMessage::from_value(&event.data) else {
            return;
        };
        let Some(source) = event.source else {
            return;
        };
        if source == self.context.handle() || self.is_disposed() {
            return;
        }
        match message {
            HandshakeMessage::NotifyIdentity { my_id } => self.on_notify_identity(source, my_id),
            HandshakeMessage::AcknowledgeIdentity { your_id, my_id } => {
                self.on_acknowledge_identity(source, your_id, my_id)
            }
        }
    }

    /// A child announced itself: acknowledge, and hand an agent for it to the
    /// matching `open()`.
    fn on_notify_identity(self: &Arc<Self>, source: ContextHandle, child_id: Identity) {
        let ack = HandshakeMessage::AcknowledgeIdentity {
            your_id: child_id.clone(),
            my_id: self.id.clone(),
        };
        match ack.to_value() {
            Ok(data) => self.context.post_message(source, data),
            Err(e) => {
                self.diagnostics.error("Could not encode identity acknowledgement", &e);
                return;
            }
        }
        self.diagnostics.log("Acknowledged child identity", &ack);

        if self.links().expired.contains(&source) {
            self.diagnostics
                .warn("Child announced itself after its open() timed out", &(source, &child_id));
            return;
        }

        let agent = WindowAgent::new(
            source,
            child_id.clone(),
            self.id.clone(),
            self.bus.as_ref(),
            &self.config,
        );
        let mut links = self.links();
        if links.expired.contains(&source) {
            return;
        }
        links.children.insert(child_id, source);
        if self.opening.resolve(&source, agent.clone()) {
            return;
        }
        links.announced.insert(source, agent);
        drop(links);
        self.expire_announcement(source);
    }

    /// Drop an announcement no `open()` claimed within the initialization
    /// timeout.
    fn expire_announcement(self: &Arc<Self>, source: ContextHandle) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.initialization_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let unclaimed = {
                let mut links = inner.links();
                let agent = links.announced.remove(&source);
                if agent.is_some() {
                    links.children.retain(|_, child| *child != source);
                }
                agent
            };
            if let Some(agent) = unclaimed {
                inner
                    .diagnostics
                    .warn("Unclaimed child announcement dropped", &agent);
            }
        });
    }

    /// The opener acknowledged this window's identity.
    fn on_acknowledge_identity(&self, source: ContextHandle, your_id: Identity, parent_id: Identity) {
        if your_id != self.id {
            self.diagnostics
                .debug("Acknowledgement for another window ignored", &your_id);
            return;
        }
        if *self.state.borrow() != HandshakeState::AwaitingAcknowledgement {
            self.diagnostics
                .debug("Acknowledgement outside handshake ignored", &parent_id);
            return;
        }

        let agent = WindowAgent::new(
            source,
            parent_id.clone(),
            self.id.clone(),
            self.bus.as_ref(),
            &self.config,
        );
        {
            let mut links = self.links();
            links.parent_id = Some(parent_id.clone());
            links.parent = Some(agent);
        }
        if self.transition(HandshakeState::AwaitingAcknowledgement, HandshakeState::Ready) {
            self.diagnostics.log("Handshake with opener complete", &parent_id);
        } else {
            // Lost the race against the deadline.
            let mut links = self.links();
            links.parent_id = None;
            links.parent = None;
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (listener, subscription, parent, announced) = {
            let mut links = self.links();
            links.children.clear();
            links.expired.clear();
            (
                links.listener.take(),
                links.subscription.take(),
                links.parent.take(),
                std::mem::take(&mut links.announced),
            )
        };
        if let Some(listener) = listener {
            self.context.remove_message_listener(listener);
        }
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.fail("endpoint disposed during handshake".to_string());
        self.topic.close();
        self.procedures.clear();
        let abandoned = self.opening.clear();
        drop(parent);
        drop(announced);
        self.diagnostics
            .log("Endpoint disposed", &(&self.id, abandoned));
    }
}

impl Drop for WindowInner {
    fn drop(&mut self) {
        let listener = self.links().listener.take();
        if let Some(listener) = listener {
            self.context.remove_message_listener(listener);
        }
        self.topic.close();
    }
}

impl fmt::Debug for IwpcWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IwpcWindow")
            .field("id", &self.inner.id)
            .field("window", &self.inner.context.handle())
            .field("state", &self.state())
            .field("procedures", &self.inner.procedures.process_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Browser;
    use crate::registry::ProcedureResult;
    use crate::topic::BroadcastHub;
    use iwpc_types::InvokeOptions;
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Browser, Arc<BroadcastHub<IwpcMessage>>) {
        (Browser::new(), Arc::new(BroadcastHub::new()))
    }

    #[tokio::test]
    async fn test_no_opener_is_ready_immediately() {
        let (browser, bus) = setup();
        let window = IwpcWindow::new(browser.open_root("/"), bus, IwpcConfig::default());
        assert_eq!(window.state(), HandshakeState::Init);

        window.initialize();
        assert_eq!(window.state(), HandshakeState::Ready);
        window.ready().await.unwrap();
        assert!(window.parent().is_none());

        window.initialize();
        assert_eq!(window.state(), HandshakeState::Ready);
    }

    #[tokio::test]
    async fn test_invoke_is_answered_by_registered_procedure() {
        let (browser, bus) = setup();
        let window = IwpcWindow::new(browser.open_root("/"), bus.clone(), IwpcConfig::default());
        window.register_fn("DOUBLE", |n: i64| n * 2);

        let agent = WindowAgent::new(
            window.context().handle(),
            window.id().clone(),
            Identity::from("caller"),
            bus.as_ref(),
            window.config(),
        );
        let doubled: i64 = agent
            .invoke_as("DOUBLE", &21, InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(doubled, 42);
    }

    #[tokio::test]
    async fn test_failing_procedure_answers_undefined() {
        let (browser, bus) = setup();
        let window = IwpcWindow::new(browser.open_root("/"), bus.clone(), IwpcConfig::default());
        window.register(
            "BOOM",
            Arc::new(|_: Option<serde_json::Value>| -> ProcedureResult { Err("boom".to_string()) }),
        );

        let agent = WindowAgent::new(
            window.context().handle(),
            window.id().clone(),
            Identity::from("caller"),
            bus.as_ref(),
            window.config(),
        );
        let value = agent
            .invoke("BOOM", Some(json!(1)), InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_silences_endpoint() {
        let (browser, bus) = setup();
        let root = browser.open_root("/");
        let window = IwpcWindow::new(root.clone(), bus.clone(), IwpcConfig::default());
        window.initialize();
        window.register_fn("PING", |_: ()| "pong");
        assert_eq!(root.listener_count(), 1);

        window.dispose();
        window.dispose();
        assert!(window.is_disposed());
        assert_eq!(root.listener_count(), 0);
        assert!(window.procedures().is_empty());

        let agent = WindowAgent::new(
            root.handle(),
            window.id().clone(),
            Identity::from("caller"),
            bus.as_ref(),
            window.config(),
        );
        let err = agent
            .invoke(
                "PING",
                None,
                InvokeOptions::with_timeout(Duration::from_millis(30)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IwpcError::InvokeTimeout { .. }));
    }

    #[tokio::test]
    async fn test_open_fails_when_popup_blocked() {
        let (browser, bus) = setup();
        browser.set_block_popups(true);
        let window = IwpcWindow::new(browser.open_root("/"), bus, IwpcConfig::default());
        window.initialize();

        let err = window
            .open("/child", ChildWindowOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IwpcError::WindowCreation(ref path) if path == "/child"));
        assert_eq!(window.pending_opens(), 0);
    }

    #[test]
    fn test_settled_states() {
        assert!(!HandshakeState::Init.is_settled());
        assert!(!HandshakeState::AwaitingAcknowledgement.is_settled());
        assert!(HandshakeState::Ready.is_settled());
        assert!(HandshakeState::Failed.is_settled());
    }
}
