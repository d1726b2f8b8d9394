//! Named publish/subscribe channel shared by every window that joins it.
//!
//! A [`BroadcastHub`] plays the role of the browser's broadcast-channel
//! namespace: every [`Topic`] joined under the same name is one member of that
//! channel. A publication reaches every *other* member's subscribers; a member
//! never hears itself. Each member drains its own unbounded queue on a single
//! task, so messages from one sender arrive in send order and none are dropped
//! however far a member falls behind. A handler only sees messages published
//! after it subscribed.
//!
//! The protocol code only sees the [`Transport`] and [`Bus`] traits, so other
//! carriers can be plugged in without touching the handshake or call logic.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback invoked for every message delivered to a subscriber.
pub type Handler<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// A joined broadcast channel.
pub trait Transport<M>: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    /// Broadcast to every other member. No-op once closed.
    fn publish(&self, message: M);

    /// Register a handler. After close this returns an inert subscription.
    fn subscribe(&self, handler: Handler<M>) -> Subscription;

    /// Detach from the channel and drop every subscriber.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Something that hands out channel memberships by name.
pub trait Bus<M>: Send + Sync {
    fn join(&self, name: &str) -> Arc<dyn Transport<M>>;
}

/// Capability to remove one handler from a topic.
///
/// `unsubscribe()` may be called any number of times; only the first call
/// has an effect.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A subscription that is not attached to anything.
    pub fn inert() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Remove the handler. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether `unsubscribe()` still has something to remove.
    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Clone)]
struct Envelope<M> {
    /// Publish order on the channel; subscribers registered at or after this
    /// point never see the message.
    seq: u64,
    message: M,
}

/// Shared state of one named channel.
struct Channel<M> {
    seq: AtomicU64,
    members: DashMap<u64, mpsc::UnboundedSender<Envelope<M>>>,
}

impl<M: Clone> Channel<M> {
    fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            members: DashMap::new(),
        }
    }

    /// Stamp `message` and queue it for every member except `origin`.
    fn fan_out(&self, origin: u64, message: M) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        for member in self.members.iter() {
            if *member.key() == origin {
                continue;
            }
            // Err only means the member is shutting down.
            let _ = member.value().send(Envelope {
                seq,
                message: message.clone(),
            });
        }
    }

    fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

/// In-process broadcast namespace.
pub struct BroadcastHub<M> {
    channels: DashMap<String, Arc<Channel<M>>>,
    next_member: AtomicU64,
}

impl<M: Clone + Send + Sync + 'static> BroadcastHub<M> {
    /// Create a hub with no channels.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            next_member: AtomicU64::new(1),
        }
    }

    /// Join the channel `name`, creating it on first use.
    ///
    /// Must be called from within a Tokio runtime: the member's delivery
    /// task is spawned here.
    pub fn topic(&self, name: &str) -> Topic<M> {
        let channel = Arc::clone(
            &self
                .channels
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Channel::new())),
        );
        let member = self.next_member.fetch_add(1, Ordering::Relaxed);
        Topic::attach(name, member, channel)
    }

    /// Number of live members on a channel.
    pub fn member_count(&self, name: &str) -> usize {
        self.channels
            .get(name)
            .map(|channel| channel.members.len())
            .unwrap_or(0)
    }
}

impl<M: Clone + Send + Sync + 'static> Default for BroadcastHub<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Clone + Send + Sync + 'static> Bus<M> for BroadcastHub<M> {
    fn join(&self, name: &str) -> Arc<dyn Transport<M>> {
        Arc::new(self.topic(name))
    }
}

/// One membership of a broadcast channel.
pub struct Topic<M> {
    inner: Arc<TopicInner<M>>,
}

struct Subscriber<M> {
    id: u64,
    /// Channel sequence when the handler was registered.
    since: u64,
    handler: Handler<M>,
}

struct TopicInner<M> {
    name: String,
    member: u64,
    channel: Arc<Channel<M>>,
    subscribers: RwLock<Vec<Subscriber<M>>>,
    next_subscriber: AtomicU64,
    closed: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Clone + Send + Sync + 'static> Topic<M> {
    fn attach(name: &str, member: u64, channel: Arc<Channel<M>>) -> Self {
        let (queue, inbox) = mpsc::unbounded_channel();
        channel.members.insert(member, queue);
        let inner = Arc::new(TopicInner {
            name: name.to_string(),
            member,
            channel,
            subscribers: RwLock::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            pump: Mutex::new(None),
        });
        let pump = tokio::spawn(pump(Arc::downgrade(&inner), inbox));
        *inner.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(pump);
        Self { inner }
    }

    /// Number of handlers currently registered on this member.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<M: Clone + Send + Sync + 'static> Transport<M> for Topic<M> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn publish(&self, message: M) {
        if self.is_closed() {
            debug!(topic = %self.inner.name, "Publish on closed topic ignored");
            return;
        }
        self.inner.channel.fan_out(self.inner.member, message);
    }

    fn subscribe(&self, handler: Handler<M>) -> Subscription {
        if self.is_closed() {
            debug!(topic = %self.inner.name, "Subscribe on closed topic ignored");
            return Subscription::inert();
        }
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(|e| e.into_inner());
            subscribers.push(Subscriber {
                id,
                since: self.inner.channel.current_seq(),
                handler,
            });
        }

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .subscribers
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|sub| sub.id != id);
            }
        })
    }

    fn close(&self) {
        self.inner.shutdown();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl<M> TopicInner<M> {
    fn dispatch(&self, envelope: &Envelope<M>) {
        // Snapshot so handlers may (un)subscribe while being called.
        let handlers: Vec<Handler<M>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|sub| sub.since < envelope.seq)
            .map(|sub| Arc::clone(&sub.handler))
            .collect();
        for handler in handlers {
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            handler(&envelope.message);
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.channel.members.remove(&self.member);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(pump) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }
        debug!(topic = %self.name, member = self.member, "Topic closed");
    }
}

impl<M> Drop for TopicInner<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Delivery loop for one member.
async fn pump<M>(inner: Weak<TopicInner<M>>, mut inbox: mpsc::UnboundedReceiver<Envelope<M>>) {
    while let Some(envelope) = inbox.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.closed.load(Ordering::Acquire) {
            break;
        }
        inner.dispatch(&envelope);
    }
}
