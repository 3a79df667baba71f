//! Reactions to connection loss and host events, and startup maintenance.

use tracing::{debug, info, warn};
use url::Url;

use crate::bridge::{Indicator, Title};
use crate::error::Result;
use crate::identifiers::{RelayKey, TabId};
use crate::transport::CloseReason;

use super::core::Relay;

// ============================================================================
// Types
// ============================================================================

/// What [`Relay::startup`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Tabs whose relay override was dropped.
    pub pruned_overrides: Vec<TabId>,
    /// Tabs whose stray debugger attachment was released.
    pub orphans_detached: Vec<TabId>,
    /// Tabs opened for auto-open URLs.
    pub opened: Vec<TabId>,
    /// Auto-open tabs that ended up attached.
    pub attached: Vec<TabId>,
}

const EXTENSION_SCHEME: &str = "chrome-extension://";

fn url_port(url: &str) -> Option<u16> {
    Url::parse(url).ok()?.port()
}

// ============================================================================
// Relay - Host Events
// ============================================================================

impl Relay {
    /// Tears down every tab bound to a relay whose socket closed.
    pub(crate) async fn on_relay_closed(&self, key: &RelayKey, reason: CloseReason) {
        let dropped = self.inner.registry.drop_relay(key);
        info!(key = %key, %reason, tabs = dropped.len(), "Relay connection closed");

        for session in dropped {
            let tab = session.tab_id;
            self.inner.host.set_indicator(tab, Indicator::Connecting);
            self.inner.host.set_title(tab, Title::Disconnected);
            if let Err(e) = self.inner.bridge.detach(tab).await {
                debug!(tab = %tab, error = %e, "Detach after disconnect failed");
            }
        }
    }

    /// The debugger left a tab on its own.
    pub(crate) async fn on_bridge_detached(&self, tab: TabId, reason: &str) {
        if self.inner.registry.is_tracked(tab) {
            self.detach_tab(tab, reason).await;
        }
    }

    /// A tab was closed.
    pub(crate) async fn on_tab_removed(&self, tab: TabId) {
        if self.inner.registry.is_tracked(tab) {
            self.detach_tab(tab, "tab-closed").await;
        }
        if let Err(e) = self.inner.settings.clear_tab_override(tab).await {
            warn!(tab = %tab, error = %e, "Failed to clear tab override");
        }
    }
}

// ============================================================================
// Relay - Startup
// ============================================================================

impl Relay {
    /// Runs startup maintenance.
    ///
    /// Writes the feature marker, prunes stale per-tab overrides, releases
    /// debugger attachments the relay does not track and opens the auto-open
    /// tabs. Failures on individual auto-open tabs are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns settings or host failures outside the per-tab steps.
    pub async fn startup(&self) -> Result<StartupReport> {
        let mut report = StartupReport::default();
        self.inner.settings.write_feature_marker().await?;

        report.pruned_overrides = self.prune_overrides().await?;
        report.orphans_detached = self.detach_orphans().await;

        if self.inner.settings.auto_open_enabled().await? {
            self.auto_open(&mut report).await?;
        }

        info!(
            pruned = report.pruned_overrides.len(),
            orphans = report.orphans_detached.len(),
            opened = report.opened.len(),
            attached = report.attached.len(),
            "Startup complete"
        );
        Ok(report)
    }

    async fn prune_overrides(&self) -> Result<Vec<TabId>> {
        let mut stale = Vec::new();
        for tab in self.inner.settings.tab_override_ids().await? {
            let keep = match self.inner.host.get(tab).await {
                Ok(Some(info)) => !info.url.starts_with(EXTENSION_SCHEME),
                _ => false,
            };
            if !keep {
                stale.push(tab);
            }
        }
        self.inner.settings.clear_tab_overrides(&stale).await?;
        Ok(stale)
    }

    async fn detach_orphans(&self) -> Vec<TabId> {
        let targets = match self.inner.bridge.targets().await {
            Ok(targets) => targets,
            Err(e) => {
                debug!(error = %e, "Listing debug targets failed");
                return Vec::new();
            }
        };

        let mut detached = Vec::new();
        for target in targets {
            let Some(tab) = target.tab_id else { continue };
            if !target.attached || self.inner.registry.is_tracked(tab) {
                continue;
            }
            if self.inner.bridge.detach(tab).await.is_ok() {
                detached.push(tab);
            }
        }
        detached
    }

    async fn auto_open(&self, report: &mut StartupReport) -> Result<()> {
        let urls = self.inner.settings.auto_open_urls().await?;
        let existing = self.inner.host.list().await?;

        for url in urls {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            let port = url_port(url);
            let open = existing
                .iter()
                .find(|tab| !tab.url.is_empty() && tab.url.starts_with(url));

            let tab = match open {
                Some(tab) => tab.id,
                None => match self.inner.host.open_window(url, false).await {
                    Ok(Some(tab)) => {
                        report.opened.push(tab);
                        tab
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(url, error = %e, "Auto-open failed");
                        continue;
                    }
                },
            };

            let Some(port) = port else { continue };
            match self.auto_attach(tab, port).await {
                Ok(true) => report.attached.push(tab),
                Ok(false) => {}
                Err(e) => warn!(tab = %tab, port, error = %e, "Auto-attach failed"),
            }
        }
        Ok(())
    }

    async fn auto_attach(&self, tab: TabId, port: u16) -> Result<bool> {
        self.inner.settings.assign_tab_port(tab, port).await?;
        let key = self.inner.settings.relay_for_tab(tab).await?;
        if !key.has_credential() {
            debug!(tab = %tab, port, "No credential, not attaching");
            return Ok(false);
        }
        self.ensure_connection(&key).await?;
        self.attach_with_retry(tab, &key).await?;
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================
