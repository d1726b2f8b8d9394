//! Shared harness: an in-memory browser whose routed pages each host an
//! IWPC endpoint, all talking over one in-memory broadcast hub.

#![allow(dead_code)]

use iwpc_wire::{
    BroadcastHub, Browser, BrowserWindow, ContextHandle, IwpcConfig, IwpcMessage, IwpcWindow,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FAST_TIMEOUT_MS: u64 = 200;

pub struct Harness {
    pub browser: Browser,
    pub bus: Arc<BroadcastHub<IwpcMessage>>,
    pub config: IwpcConfig,
    endpoints: Arc<Mutex<Vec<IwpcWindow>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: IwpcConfig) -> Self {
        Self {
            browser: Browser::new(),
            bus: Arc::new(BroadcastHub::new()),
            config,
            endpoints: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Route `path` to a page that creates an endpoint, runs `setup` on it,
    /// then initializes it.
    pub fn serve<F>(&self, path: &str, setup: F)
    where
        F: Fn(&IwpcWindow) + Send + Sync + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let config = self.config.clone();
        let endpoints = Arc::clone(&self.endpoints);
        self.browser.route(path, move |window: Arc<BrowserWindow>| {
            let endpoint = IwpcWindow::new(window, bus.clone(), config.clone());
            setup(&endpoint);
            endpoint.initialize();
            endpoints.lock().unwrap().push(endpoint);
        });
    }

    /// Open a top-level window at `path` hosting an initialized endpoint.
    pub fn root(&self, path: &str) -> IwpcWindow {
        let window = self.browser.open_root(path);
        let endpoint = IwpcWindow::new(window, self.bus.clone(), self.config.clone());
        endpoint.initialize();
        endpoint
    }

    /// Wait for the routed page in `handle` to have created its endpoint.
    pub async fn endpoint_in(&self, handle: ContextHandle) -> IwpcWindow {
        for _ in 0..100 {
            let found = self
                .endpoints
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.context().handle() == handle)
                .cloned();
            if let Some(endpoint) = found {
                return endpoint;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no endpoint loaded in {handle}");
    }
}

pub fn fast_config() -> IwpcConfig {
    IwpcConfig {
        initialization_timeout_ms: FAST_TIMEOUT_MS,
        call_timeout_ms: FAST_TIMEOUT_MS,
        ..IwpcConfig::default()
    }
}
