//! Host tab management.
//!
//! [`TabHost`] exposes what the relay needs from the browser's tab and
//! window APIs, plus the cosmetic feedback (indicator, title, overlay).
//! The cosmetic methods default to no-ops.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};

use crate::error::{Error, Result};
use crate::identifiers::TabId;

// ============================================================================
// Constants
// ============================================================================

/// Poll interval of the default load wait.
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// Loading status of a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TabStatus {
    /// Still loading.
    #[default]
    Loading,
    /// Finished loading.
    Complete,
}

/// Snapshot of a host tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    /// Tab id.
    pub id: TabId,
    /// Owning window.
    pub window_id: Option<u32>,
    /// Current URL; empty while unknown.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Loading status.
    pub status: TabStatus,
    /// Whether the tab is active in its window.
    pub active: bool,
}

impl TabInfo {
    /// Creates a loaded, inactive tab snapshot.
    #[must_use]
    pub fn new(id: TabId, url: impl Into<String>) -> Self {
        Self {
            id,
            window_id: None,
            url: url.into(),
            title: String::new(),
            status: TabStatus::Complete,
            active: false,
        }
    }
}

/// Per-tab status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    /// Not attached.
    Off,
    /// Attached.
    On,
    /// Connect or attach in progress.
    Connecting,
    /// Last attempt failed.
    Error,
    /// Attached on the given relay port.
    Port(u16),
}

impl Indicator {
    /// Short badge text.
    #[must_use]
    pub fn text(self) -> Cow<'static, str> {
        match self {
            Self::Off => Cow::Borrowed(""),
            Self::On => Cow::Borrowed("ON"),
            Self::Connecting => Cow::Borrowed("…"),
            Self::Error => Cow::Borrowed("!"),
            Self::Port(port) => {
                let digits = port.to_string();
                let start = digits.len().saturating_sub(4);
                Cow::Owned(digits[start..].to_string())
            }
        }
    }
}

/// Tooltip shown for a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Title {
    /// Not attached.
    Idle,
    /// Attached.
    Attached,
    /// Connecting to the relay.
    Connecting,
    /// Relay connection lost.
    Disconnected,
    /// Relay unreachable or not configured.
    Setup,
}

impl Title {
    /// Tooltip text.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::Idle => "OpenClaw Browser Relay (click to attach/detach)",
            Self::Attached => "OpenClaw Browser Relay: attached (click to detach)",
            Self::Connecting => "OpenClaw Browser Relay: connecting to local relay…",
            Self::Disconnected => "OpenClaw Browser Relay: disconnected (click to re-attach)",
            Self::Setup => "OpenClaw Browser Relay: relay not running (open options for setup)",
        }
    }
}

// ============================================================================
// TabHost
// ============================================================================

/// Tab and window access provided by the host.
#[async_trait]
pub trait TabHost: Send + Sync + 'static {
    /// Looks up a tab; `None` if it does not exist.
    async fn get(&self, tab: TabId) -> Result<Option<TabInfo>>;

    /// Returns the active tab of the current window.
    async fn active_tab(&self) -> Result<Option<TabInfo>>;

    /// Lists all tabs.
    async fn list(&self) -> Result<Vec<TabInfo>>;

    /// Opens a tab.
    async fn create(&self, url: &str, active: bool) -> Result<TabId>;

    /// Opens a window and returns its first tab.
    async fn open_window(&self, url: &str, focused: bool) -> Result<Option<TabId>>;

    /// Closes a tab.
    async fn remove(&self, tab: TabId) -> Result<()>;

    /// Activates a tab in its window.
    async fn activate(&self, tab: TabId) -> Result<()>;

    /// Focuses a window.
    async fn focus_window(&self, window_id: u32) -> Result<()>;

    /// Updates the tab's indicator.
    fn set_indicator(&self, _tab: TabId, _indicator: Indicator) {}

    /// Updates the tab's tooltip.
    fn set_title(&self, _tab: TabId, _title: Title) {}

    /// Shows the in-page status overlay.
    async fn show_overlay(&self, _tab: TabId, _port: u16, _status: &str) -> Result<()> {
        Ok(())
    }

    /// Removes the in-page status overlay.
    async fn remove_overlay(&self, _tab: TabId) -> Result<()> {
        Ok(())
    }

    /// Waits until the tab reports [`TabStatus::Complete`].
    ///
    /// The default polls [`get`](TabHost::get).
    async fn wait_for_load(&self, tab: TabId, limit: Duration) -> Result<()> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(info) = self.get(tab).await?
                && info.status == TabStatus::Complete
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout(
                    format!("Tab {tab} load"),
                    limit.as_millis() as u64,
                ));
            }
            sleep(LOAD_POLL_INTERVAL).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
