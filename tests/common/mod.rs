//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;

use tab_relay::transport::{RelayIo, RelaySocket};
use tab_relay::{
    BridgeEvent, Connector, DebugTarget, Debuggee, DebuggerBridge, Error, Indicator,
    MemorySettings, Relay, RelayConfig, RelayKey, Result, TabHost, TabId, TabInfo, Title,
};

// ============================================================================
// FakeBrowser
// ============================================================================

/// In-memory browser implementing both host seams.
#[derive(Default)]
pub struct FakeBrowser {
    tabs: Mutex<BTreeMap<TabId, TabInfo>>,
    active: Mutex<Option<TabId>>,
    next_tab: AtomicU32,
    attached: Mutex<HashSet<TabId>>,
    foreign: Mutex<HashSet<TabId>>,
    attach_failures: AtomicUsize,
    pub attach_calls: AtomicUsize,
    pub detach_calls: AtomicUsize,
    pub commands: Mutex<Vec<(Debuggee, String, Option<Value>)>>,
    pub indicators: Mutex<Vec<(TabId, Indicator)>>,
    pub titles: Mutex<Vec<(TabId, Title)>>,
    pub focused_windows: Mutex<Vec<u32>>,
    events: Mutex<Option<mpsc::UnboundedSender<BridgeEvent>>>,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_tab: AtomicU32::new(1),
            ..Self::default()
        })
    }

    /// Adds a loaded tab and returns its id.
    pub fn open_tab(&self, url: &str) -> TabId {
        let id = TabId::new(self.next_tab.fetch_add(1, Ordering::SeqCst)).unwrap();
        let mut info = TabInfo::new(id, url);
        info.window_id = Some(1);
        self.tabs.lock().insert(id, info);
        id
    }

    /// Adds a tab and makes it active.
    pub fn open_active_tab(&self, url: &str) -> TabId {
        let id = self.open_tab(url);
        *self.active.lock() = Some(id);
        id
    }

    /// Marks a tab as held by another debugger.
    pub fn attach_foreign(&self, tab: TabId) {
        self.foreign.lock().insert(tab);
    }

    /// Makes the next `count` attach calls fail.
    pub fn fail_attaches(&self, count: usize) {
        self.attach_failures.store(count, Ordering::SeqCst);
    }

    pub fn is_attached(&self, tab: TabId) -> bool {
        self.attached.lock().contains(&tab)
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        *self.active.lock()
    }

    pub fn has_tab(&self, tab: TabId) -> bool {
        self.tabs.lock().contains_key(&tab)
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.lock().len()
    }

    pub fn last_indicator(&self, tab: TabId) -> Option<Indicator> {
        self.indicators
            .lock()
            .iter()
            .rev()
            .find(|(t, _)| *t == tab)
            .map(|(_, i)| *i)
    }

    pub fn last_title(&self, tab: TabId) -> Option<Title> {
        self.titles
            .lock()
            .iter()
            .rev()
            .find(|(t, _)| *t == tab)
            .map(|(_, title)| *title)
    }

    pub fn commands_named(&self, method: &str) -> Vec<Debuggee> {
        self.commands
            .lock()
            .iter()
            .filter(|(_, m, _)| m == method)
            .map(|(d, _, _)| d.clone())
            .collect()
    }

    /// Emits a bridge event to the subscribed relay.
    pub fn emit(&self, event: BridgeEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl DebuggerBridge for FakeBrowser {
    async fn attach(&self, tab: TabId, _protocol_version: &str) -> Result<()> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .attach_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::bridge("Cannot access a chrome:// URL"));
        }
        if self.foreign.lock().contains(&tab) || !self.attached.lock().insert(tab) {
            return Err(Error::bridge(format!(
                "Another debugger is already attached to the tab with id: {tab}."
            )));
        }
        Ok(())
    }

    async fn detach(&self, tab: TabId) -> Result<()> {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        let removed = self.attached.lock().remove(&tab) || self.foreign.lock().remove(&tab);
        if removed {
            Ok(())
        } else {
            Err(Error::bridge(format!(
                "Debugger is not attached to the tab with id: {tab}."
            )))
        }
    }

    async fn send_command(
        &self,
        debuggee: &Debuggee,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        self.commands
            .lock()
            .push((debuggee.clone(), method.to_string(), params.clone()));

        match method {
            "Target.getTargetInfo" => {
                let url = self
                    .tabs
                    .lock()
                    .get(&debuggee.tab_id)
                    .map(|t| t.url.clone())
                    .unwrap_or_default();
                Ok(json!({
                    "targetInfo": {
                        "targetId": format!("target-{}", debuggee.tab_id),
                        "type": "page",
                        "url": url,
                        "attached": false,
                    }
                }))
            }
            "Runtime.evaluate" => Ok(json!({ "result": { "type": "number", "value": 2 } })),
            _ => Ok(json!({})),
        }
    }

    async fn targets(&self) -> Result<Vec<DebugTarget>> {
        let attached = self.attached.lock();
        let foreign = self.foreign.lock();
        Ok(self
            .tabs
            .lock()
            .keys()
            .map(|id| DebugTarget {
                tab_id: Some(*id),
                attached: attached.contains(id) || foreign.contains(id),
            })
            .collect())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock() = Some(tx);
        rx
    }
}

#[async_trait]
impl TabHost for FakeBrowser {
    async fn get(&self, tab: TabId) -> Result<Option<TabInfo>> {
        Ok(self.tabs.lock().get(&tab).cloned())
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>> {
        let active = *self.active.lock();
        Ok(active.and_then(|id| self.tabs.lock().get(&id).cloned()))
    }

    async fn list(&self) -> Result<Vec<TabInfo>> {
        Ok(self.tabs.lock().values().cloned().collect())
    }

    async fn create(&self, url: &str, _active: bool) -> Result<TabId> {
        Ok(self.open_tab(url))
    }

    async fn open_window(&self, url: &str, _focused: bool) -> Result<Option<TabId>> {
        Ok(Some(self.open_tab(url)))
    }

    async fn remove(&self, tab: TabId) -> Result<()> {
        match self.tabs.lock().remove(&tab) {
            Some(_) => Ok(()),
            None => Err(Error::bridge(format!("No tab with id: {tab}."))),
        }
    }

    async fn activate(&self, tab: TabId) -> Result<()> {
        *self.active.lock() = Some(tab);
        Ok(())
    }

    async fn focus_window(&self, window_id: u32) -> Result<()> {
        self.focused_windows.lock().push(window_id);
        Ok(())
    }

    fn set_indicator(&self, tab: TabId, indicator: Indicator) {
        self.indicators.lock().push((tab, indicator));
    }

    fn set_title(&self, tab: TabId, title: Title) {
        self.titles.lock().push((tab, title));
    }
}

// ============================================================================
// FakeRelayServer
// ============================================================================

/// Server side of an in-memory relay socket.
pub struct ServerEnd {
    pub key: RelayKey,
    socket: WebSocketStream<DuplexStream>,
}

impl ServerEnd {
    /// Next JSON text frame.
    pub async fn next_json(&mut self) -> Value {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Next forwarded event, skipping everything else.
    pub async fn next_event(&mut self) -> Value {
        loop {
            let frame = self.next_json().await;
            if frame["method"] == "forwardCDPEvent" {
                return frame["params"].clone();
            }
        }
    }

    /// Completion for `id`, skipping events.
    pub async fn reply_to(&mut self, id: u64) -> Value {
        loop {
            let frame = self.next_json().await;
            if frame["id"] == id {
                return frame;
            }
        }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.socket
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    /// Pushes a `forwardCDPCommand`.
    pub async fn command(&mut self, id: u64, method: &str, params: Value, session: Option<&str>) {
        let mut inner = json!({ "method": method, "params": params });
        if let Some(session) = session {
            inner["sessionId"] = json!(session);
        }
        self.send_json(json!({ "id": id, "method": "forwardCDPCommand", "params": inner }))
            .await;
    }

    /// Pushes a command and waits for its completion.
    pub async fn call(&mut self, id: u64, method: &str, params: Value, session: Option<&str>) -> Value {
        self.command(id, method, params, session).await;
        self.reply_to(id).await
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

/// Connector handing out in-memory sockets.
#[derive(Default)]
pub struct FakeConnector {
    pub probes: AtomicUsize,
    pub connects: AtomicUsize,
    failures: AtomicUsize,
    unreachable: Mutex<bool>,
    servers: Mutex<Option<mpsc::UnboundedSender<ServerEnd>>>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers: Mutex::new(Some(tx)),
            ..Self::default()
        });
        (connector, rx)
    }

    /// Makes the next `count` socket attempts fail.
    pub fn fail_connects(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn probe(&self, key: &RelayKey) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if *self.unreachable.lock() {
            return Err(Error::connection(format!(
                "Relay server not reachable at http://127.0.0.1:{} (refused)",
                key.port()
            )));
        }
        Ok(())
    }

    async fn connect(&self, key: &RelayKey) -> Result<RelaySocket> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::connection("WebSocket connect failed"));
        }

        let (client, server) = tokio::io::duplex(256 * 1024);
        let client: Box<dyn RelayIo> = Box::new(client);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;

        let end = ServerEnd {
            key: key.clone(),
            socket: server,
        };
        if let Some(tx) = self.servers.lock().as_ref() {
            let _ = tx.send(end);
        }
        Ok(client)
    }
}

// ============================================================================
// Construction
// ============================================================================

pub struct Harness {
    pub relay: Relay,
    pub browser: Arc<FakeBrowser>,
    pub connector: Arc<FakeConnector>,
    pub servers: mpsc::UnboundedReceiver<ServerEnd>,
    pub store: Arc<MemorySettings>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        init_tracing();
        let browser = FakeBrowser::new();
        let (connector, servers) = FakeConnector::new();
        let store = Arc::new(MemorySettings::new());

        let relay = Relay::builder()
            .config(config)
            .settings(Arc::clone(&store) as _)
            .bridge(Arc::clone(&browser) as _)
            .host(Arc::clone(&browser) as _)
            .connector(Arc::clone(&connector) as _)
            .build()
            .expect("relay should build");

        Self {
            relay,
            browser,
            connector,
            servers,
            store,
        }
    }

    /// Connects `key` and returns the server end.
    pub async fn connect(&mut self, key: &RelayKey) -> ServerEnd {
        self.relay
            .ensure_connection(key)
            .await
            .expect("should connect");
        self.servers.recv().await.expect("server end")
    }
}

/// Routes relay logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn key() -> RelayKey {
    RelayKey::new(9222, "tok")
}
