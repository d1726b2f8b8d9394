//! In-memory browser: a set of windows that can open each other and
//! exchange page messages, all inside one process.
//!
//! Each [`BrowserWindow`] owns an event loop task that drains its message
//! queue in order, mirroring how a real window processes `message` events one
//! at a time. Opening a path runs the page loader registered for it with
//! [`Browser::route`], after the opener has its handle back.

use crate::context::{BrowsingContext, ContextHandle, ListenerId, MessageEvent, MessageListener};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Runs the "page" of a freshly opened window.
pub type PageLoader = Arc<dyn Fn(Arc<BrowserWindow>) + Send + Sync>;

/// Shared browser state. Cheap to clone.
#[derive(Clone, Default)]
pub struct Browser {
    inner: Arc<BrowserInner>,
}

#[derive(Default)]
struct BrowserInner {
    windows: DashMap<ContextHandle, Arc<BrowserWindow>>,
    routes: DashMap<String, PageLoader>,
    next_handle: AtomicU64,
    next_listener: AtomicU64,
    block_popups: AtomicBool,
}

impl Browser {
    /// Create an empty browser with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the page loaded whenever `path` is opened.
    pub fn route<F>(&self, path: &str, loader: F)
    where
        F: Fn(Arc<BrowserWindow>) + Send + Sync + 'static,
    {
        self.inner.routes.insert(path.to_string(), Arc::new(loader));
    }

    /// Make every `open()` fail as if a popup blocker intervened.
    pub fn set_block_popups(&self, block: bool) {
        self.inner.block_popups.store(block, Ordering::Relaxed);
    }

    /// Open a top-level window (no opener), e.g. a tab typed in by the user.
    pub fn open_root(&self, path: &str) -> Arc<BrowserWindow> {
        let window = create_window(&self.inner, path, "_blank", "", None);
        load_page(&self.inner, &window);
        window
    }

    /// Look up an open window.
    pub fn window(&self, handle: ContextHandle) -> Option<Arc<BrowserWindow>> {
        self.inner.windows.get(&handle).map(|w| Arc::clone(&w))
    }

    /// Whether `handle` names a window that has not been closed.
    pub fn is_open(&self, handle: ContextHandle) -> bool {
        self.inner.windows.contains_key(&handle)
    }

    /// Number of open windows.
    pub fn window_count(&self) -> usize {
        self.inner.windows.len()
    }
}

/// One window inside a [`Browser`].
pub struct BrowserWindow {
    handle: ContextHandle,
    opener: Option<ContextHandle>,
    path: String,
    name: String,
    features: String,
    browser: Weak<BrowserInner>,
    listeners: RwLock<Vec<(ListenerId, MessageListener)>>,
    queue: mpsc::UnboundedSender<MessageEvent>,
    closed: AtomicBool,
}

impl BrowserWindow {
    /// Path the window was opened at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Browsing context name the window was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Feature string the window was opened with.
    pub fn features(&self) -> &str {
        &self.features
    }

    /// Whether the window has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of registered page-message listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn enqueue(&self, event: MessageEvent) {
        if self.is_closed() || self.queue.send(event).is_err() {
            debug!(window = %self.handle, "Message to closed window dropped");
        }
    }

    fn dispatch(&self, event: &MessageEvent) {
        let listeners: Vec<MessageListener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn shut(&self) {
        self.closed.store(true, Ordering::Release);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl BrowsingContext for BrowserWindow {
    fn handle(&self) -> ContextHandle {
        self.handle
    }

    fn opener(&self) -> Option<ContextHandle> {
        self.opener
    }

    fn post_message(&self, target: ContextHandle, data: Value) {
        let Some(browser) = self.browser.upgrade() else {
            return;
        };
        let Some(window) = browser.windows.get(&target).map(|w| Arc::clone(&w)) else {
            debug!(from = %self.handle, to = %target, "Message to unknown window dropped");
            return;
        };
        window.enqueue(MessageEvent {
            source: Some(self.handle),
            data,
        });
    }

    fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
        let id = self
            .browser
            .upgrade()
            .map(|b| b.next_listener.fetch_add(1, Ordering::Relaxed))
            .unwrap_or_default();
        let id = ListenerId::new(id);
        if !self.is_closed() {
            self.listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push((id, listener));
        }
        id
    }

    fn remove_message_listener(&self, id: ListenerId) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(listener_id, _)| *listener_id != id);
    }

    fn open(&self, path: &str, target: &str, features: &str) -> Option<ContextHandle> {
        let browser = self.browser.upgrade()?;
        if self.is_closed() || browser.block_popups.load(Ordering::Relaxed) {
            return None;
        }
        let child = create_window(&browser, path, target, features, Some(self.handle));
        load_page(&browser, &child);
        Some(child.handle)
    }

    fn close_window(&self, handle: ContextHandle) {
        let Some(browser) = self.browser.upgrade() else {
            return;
        };
        if let Some((_, window)) = browser.windows.remove(&handle) {
            window.shut();
            debug!(window = %handle, path = %window.path, "Window closed");
        }
    }
}

fn create_window(
    browser: &Arc<BrowserInner>,
    path: &str,
    name: &str,
    features: &str,
    opener: Option<ContextHandle>,
) -> Arc<BrowserWindow> {
    let handle = ContextHandle::new(browser.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
    let (queue, mut inbox) = mpsc::unbounded_channel::<MessageEvent>();
    let window = Arc::new(BrowserWindow {
        handle,
        opener,
        path: path.to_string(),
        name: name.to_string(),
        features: features.to_string(),
        browser: Arc::downgrade(browser),
        listeners: RwLock::new(Vec::new()),
        queue,
        closed: AtomicBool::new(false),
    });
    browser.windows.insert(handle, Arc::clone(&window));

    let weak = Arc::downgrade(&window);
    tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let Some(window) = weak.upgrade() else {
                break;
            };
            if window.is_closed() {
                break;
            }
            window.dispatch(&event);
        }
    });

    debug!(window = %handle, path, ?opener, "Window created");
    window
}

/// Run the page for `window` on its own task, after the caller returns.
fn load_page(browser: &BrowserInner, window: &Arc<BrowserWindow>) {
    let Some(loader) = browser.routes.get(&window.path).map(|l| Arc::clone(&l)) else {
        return;
    };
    let window = Arc::clone(window);
    tokio::spawn(async move {
        loader(window);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn recv(rx: &mut mpsc::UnboundedReceiver<MessageEvent>) -> Option<MessageEvent> {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_open_sets_opener_and_runs_route() {
        let browser = Browser::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        browser.route("/child", move |window| {
            let _ = tx.send(window.opener());
        });

        let root = browser.open_root("/root");
        assert_eq!(root.opener(), None);
        let child = root
            .open("/child", "_blank", "left=0,top=0,width=800,height=600,popup")
            .unwrap();

        let opener = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(opener, Some(root.handle()));
        assert_eq!(browser.window_count(), 2);
        let child_window = browser.window(child).unwrap();
        assert_eq!(child_window.path(), "/child");
        assert_eq!(child_window.features(), "left=0,top=0,width=800,height=600,popup");
    }

    #[tokio::test]
    async fn test_post_message_carries_source() {
        let browser = Browser::new();
        let a = browser.open_root("/a");
        let b = browser.open_root("/b");
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.add_message_listener(Arc::new(move |event: &MessageEvent| {
            let _ = tx.send(event.clone());
        }));

        a.post_message(b.handle(), json!({ "hello": 1 }));
        let event = recv(&mut rx).await.unwrap();
        assert_eq!(event.source, Some(a.handle()));
        assert_eq!(event.data, json!({ "hello": 1 }));
    }

    #[tokio::test]
    async fn test_removed_listener_is_not_called() {
        let browser = Browser::new();
        let a = browser.open_root("/a");
        let b = browser.open_root("/b");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = b.add_message_listener(Arc::new(move |event: &MessageEvent| {
            let _ = tx.send(event.clone());
        }));
        b.remove_message_listener(id);
        assert_eq!(b.listener_count(), 0);

        a.post_message(b.handle(), json!(1));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_blocked_popup_yields_no_handle() {
        let browser = Browser::new();
        let root = browser.open_root("/root");
        browser.set_block_popups(true);
        assert!(root.open("/child", "_blank", "").is_none());
        assert_eq!(browser.window_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_window_drops_messages() {
        let browser = Browser::new();
        let a = browser.open_root("/a");
        let b = browser.open_root("/b");
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.add_message_listener(Arc::new(move |event: &MessageEvent| {
            let _ = tx.send(event.clone());
        }));

        b.close();
        assert!(b.is_closed());
        assert!(!browser.is_open(b.handle()));

        a.post_message(b.handle(), json!("late"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }
}
