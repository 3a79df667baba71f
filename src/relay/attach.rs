//! Attaching and detaching tabs.

use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::bridge::{Debuggee, Indicator, Title};
use crate::config::{DEFAULT_RELAY_PORT, canvas_url};
use crate::error::{Error, Result};
use crate::identifiers::{RelayKey, TabId, TargetId};
use crate::protocol::Outbound;
use crate::session::{AttachGuard, ConnectedTab};

use super::core::Relay;

// ============================================================================
// Types
// ============================================================================

/// Options for a single attach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachOptions {
    /// Do not announce the tab with a synthetic `Target.attachedToTarget`.
    pub silent: bool,
    /// The relay opened this tab itself; a blank or not yet known URL is accepted.
    pub created: bool,
}

/// Result of [`Relay::toggle_active_tab`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// There is no active tab.
    NoActiveTab,
    /// The tab was attached and is now detached.
    Detached(TabId),
    /// The tab is now attached.
    Attached(TabId),
}

fn effective_port(port: u16) -> u16 {
    if port == 0 { DEFAULT_RELAY_PORT } else { port }
}

// ============================================================================
// Relay - Attach
// ============================================================================

impl Relay {
    /// Attaches a tab on the relay for `key` and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Attach`] if an attach is already running for the tab,
    /// the tab is already attached, its URL is restricted or the debugger
    /// reports no target; bridge failures are returned as-is.
    pub async fn attach_tab(&self, tab: TabId, key: &RelayKey) -> Result<ConnectedTab> {
        self.attach_with_options(tab, key, AttachOptions::default())
            .await
    }

    /// Attaches a tab with explicit options.
    ///
    /// On failure the tab's entry is dropped and a debugger attached during
    /// the attempt is released.
    ///
    /// # Errors
    ///
    /// See [`attach_tab`](Self::attach_tab).
    pub async fn attach_with_options(
        &self,
        tab: TabId,
        key: &RelayKey,
        options: AttachOptions,
    ) -> Result<ConnectedTab> {
        let guard = self.inner.registry.begin_attach(tab, key)?;

        let mut bridge_attached = false;
        let result = self
            .run_attach(&guard, key, options, &mut bridge_attached)
            .await;

        match result {
            Ok(connected) => Ok(connected),
            Err(e) => {
                debug!(tab = %tab, error = %e, "Attach failed");
                self.inner.registry.abandon_attach(tab);
                if bridge_attached {
                    let _ = self.inner.bridge.detach(tab).await;
                }
                Err(e)
            }
        }
    }

    async fn run_attach(
        &self,
        guard: &AttachGuard<'_>,
        key: &RelayKey,
        options: AttachOptions,
        bridge_attached: &mut bool,
    ) -> Result<ConnectedTab> {
        let tab = guard.tab();
        let config = &self.inner.config;

        let url = match self.inner.host.get(tab).await {
            Ok(Some(info)) => info.url,
            _ => String::new(),
        };
        let blank = url.is_empty() || url == "about:blank";
        if !(options.created && blank) && config.is_restricted_url(&url) {
            let shown = if url.is_empty() { "unknown" } else { url.as_str() };
            return Err(Error::attach(format!(
                "Cannot attach to restricted URL: {shown}"
            )));
        }

        let debuggee = Debuggee::tab(tab);
        self.inner
            .bridge
            .attach(tab, &config.protocol_version)
            .await?;
        *bridge_attached = true;

        if let Err(e) = self
            .inner
            .bridge
            .send_command(&debuggee, "Page.enable", None)
            .await
        {
            debug!(tab = %tab, error = %e, "Page.enable failed");
        }

        let info = self
            .inner
            .bridge
            .send_command(&debuggee, "Target.getTargetInfo", None)
            .await?;
        let mut target_info = info.get("targetInfo").cloned().unwrap_or(Value::Null);
        let target_id = target_info
            .get("targetId")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if target_id.is_empty() {
            return Err(Error::attach("Target.getTargetInfo returned no targetId"));
        }

        let connected = self
            .inner
            .registry
            .complete_attach(guard, TargetId::new(target_id))?;
        self.inner.host.set_title(tab, Title::Attached);

        if !options.silent {
            if let Value::Object(map) = &mut target_info {
                map.insert("attached".to_string(), Value::Bool(true));
            }
            let announcement = Outbound::lifecycle(
                "Target.attachedToTarget",
                json!({
                    "sessionId": connected.session_id,
                    "targetInfo": target_info,
                    "waitingForDebugger": false,
                }),
            );
            if let Err(e) = self.inner.manager.send(key, &announcement) {
                warn!(tab = %tab, error = %e, "Attach announcement not sent");
            }
        }

        self.inner.host.set_indicator(tab, Indicator::On);
        info!(tab = %tab, session_id = %connected.session_id, key = %key, "Tab attached");
        Ok(connected)
    }

    /// Detaches a tab and announces it. Never fails.
    pub async fn detach_tab(&self, tab: TabId, reason: &str) {
        if let Some(session) = self.inner.registry.remove(tab)
            && let Some(connected) = session.connected()
        {
            let announcement = Outbound::lifecycle(
                "Target.detachedFromTarget",
                json!({
                    "sessionId": connected.session_id,
                    "targetId": connected.target_id,
                    "reason": reason,
                }),
            );
            if let Err(e) = self.inner.manager.send(&session.relay, &announcement) {
                debug!(tab = %tab, error = %e, "Detach announcement not sent");
            }
            info!(tab = %tab, reason, "Tab detached");
        }

        let _ = self.inner.bridge.detach(tab).await;

        let host = &self.inner.host;
        host.set_indicator(tab, Indicator::Off);
        let _ = host.remove_overlay(tab).await;
        host.set_title(tab, Title::Idle);
    }
}

// ============================================================================
// Relay - Attach With Retry
// ============================================================================

impl Relay {
    /// Attaches a tab, retrying with the configured delays.
    ///
    /// Every failed attempt is recorded in `lastAttachError`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Attach`] if another debugger holds the tab or every
    /// attempt failed.
    pub async fn attach_with_retry(&self, tab: TabId, key: &RelayKey) -> Result<()> {
        let config = &self.inner.config;
        let attempts = config.attach_attempts;
        let mut last_error: Option<Error> = None;

        for attempt in 0..attempts {
            debug!(tab = %tab, attempt = attempt + 1, "Attach attempt");

            if let Err(e) = self
                .inner
                .host
                .wait_for_load(tab, config.tab_load_timeout)
                .await
            {
                debug!(tab = %tab, error = %e, "Tab load wait ended");
            }

            if self.bridge_attached(tab).await {
                if self.inner.registry.is_tracked(tab) {
                    self.mark_attached(tab).await;
                    return Ok(());
                }
                let err = Error::attach("Tab already attached by another debugger/extension");
                self.record_attach_failure(tab, &err).await;
                self.inner.host.set_indicator(tab, Indicator::Error);
                return Err(err);
            }

            if attempt > 0 {
                sleep(config.attach_retry_delay(attempt)).await;
            }

            match self.try_attach_once(tab, key).await {
                Ok(()) => {
                    self.mark_attached(tab).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(tab = %tab, attempt = attempt + 1, error = %e, "Attach attempt failed");
                    self.record_attach_failure(tab, &e).await;
                    if attempt + 1 == attempts {
                        self.inner.host.set_indicator(tab, Indicator::Error);
                    }
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(Error::attach(format!(
            "Attach retries exhausted for tab {tab}: {last}"
        )))
    }

    async fn try_attach_once(&self, tab: TabId, key: &RelayKey) -> Result<()> {
        if !self.inner.registry.is_connected(tab) {
            self.attach_tab(tab, key).await?;
        }
        if self.bridge_attached(tab).await {
            Ok(())
        } else {
            Err(Error::attach(
                "Attach did not complete (debugger still unattached)",
            ))
        }
    }

    async fn mark_attached(&self, tab: TabId) {
        self.inner.host.set_indicator(tab, Indicator::On);
        if let Some(session) = self.inner.registry.get(tab) {
            let _ = self
                .inner
                .host
                .show_overlay(tab, session.relay.port(), "attached")
                .await;
        }
    }

    async fn record_attach_failure(&self, tab: TabId, err: &Error) {
        if let Err(e) = self
            .inner
            .settings
            .record_attach_error(tab, &err.to_string())
            .await
        {
            warn!(tab = %tab, error = %e, "Failed to record attach error");
        }
    }
}

// ============================================================================
// Relay - Entry Points
// ============================================================================

impl Relay {
    /// Attaches the active tab to the relay on `port` with the stored credential.
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`] if no credential is stored
    /// - [`Error::Attach`] if there is no active tab, its URL is restricted,
    ///   another debugger holds it or every attempt failed
    /// - connection errors from [`ensure_connection`](Self::ensure_connection)
    pub async fn attach_active_tab(&self, port: u16) -> Result<TabId> {
        let port = effective_port(port);
        let token = self.inner.settings.gateway_token().await?;
        if token.is_empty() {
            return Err(Error::auth("Missing gateway token"));
        }

        let active = self
            .inner
            .host
            .active_tab()
            .await?
            .ok_or_else(|| Error::attach("No active tab found"))?;
        let tab = active.id;

        if self.inner.config.is_restricted_url(&active.url) {
            let shown = if active.url.is_empty() { "unknown" } else { active.url.as_str() };
            return Err(Error::attach(format!(
                "Cannot attach to restricted URL: {shown}"
            )));
        }

        if self.bridge_attached(tab).await && !self.inner.registry.is_tracked(tab) {
            return Err(Error::attach(
                "Debugger already attached by another tool (close DevTools and try again).",
            ));
        }

        self.inner.settings.assign_tab(tab, port, &token).await?;
        let key = RelayKey::new(port, token);
        self.ensure_connection(&key).await?;
        self.attach_with_retry(tab, &key).await?;
        Ok(tab)
    }

    /// Detaches the active tab.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Attach`] if there is no active tab.
    pub async fn detach_active_tab(&self) -> Result<TabId> {
        let active = self
            .inner
            .host
            .active_tab()
            .await?
            .ok_or_else(|| Error::attach("No active tab found"))?;
        self.detach_tab(active.id, "popup").await;
        Ok(active.id)
    }

    /// Detaches the active tab if attached, otherwise attaches it using its
    /// stored relay assignment.
    ///
    /// # Errors
    ///
    /// Returns the connect or attach failure after marking the tab.
    pub async fn toggle_active_tab(&self) -> Result<ToggleOutcome> {
        let Some(active) = self.inner.host.active_tab().await? else {
            return Ok(ToggleOutcome::NoActiveTab);
        };
        let tab = active.id;

        if self.inner.registry.is_connected(tab) {
            self.detach_tab(tab, "toggle").await;
            return Ok(ToggleOutcome::Detached(tab));
        }

        let host = &self.inner.host;
        host.set_indicator(tab, Indicator::Connecting);
        host.set_title(tab, Title::Connecting);

        let outcome = async {
            let key = self.inner.settings.relay_for_tab(tab).await?;
            self.ensure_connection(&key).await?;
            self.attach_with_retry(tab, &key).await?;
            Ok::<u16, Error>(key.port())
        }
        .await;

        match outcome {
            Ok(port) => {
                host.set_indicator(tab, Indicator::Port(port));
                Ok(ToggleOutcome::Attached(tab))
            }
            Err(e) => {
                if !self.inner.registry.is_connected(tab) {
                    self.inner.registry.remove(tab);
                }
                host.set_indicator(tab, Indicator::Error);
                host.set_title(tab, Title::Setup);
                warn!(tab = %tab, error = %e, "Toggle attach failed");
                Err(e)
            }
        }
    }

    /// Opens a focused window, assigns its tab to `port`/`token` and attaches it.
    ///
    /// `url` defaults to the gateway canvas on `port`.
    ///
    /// # Errors
    ///
    /// Returns host, settings, connection or attach failures.
    pub async fn open_relay_window(
        &self,
        port: u16,
        token: &str,
        url: Option<&str>,
    ) -> Result<Option<TabId>> {
        let port = effective_port(port);
        let url = url.map_or_else(|| canvas_url(port), str::to_string);

        let Some(tab) = self.inner.host.open_window(&url, true).await? else {
            return Ok(None);
        };
        debug!(tab = %tab, port, "Relay window opened");

        self.inner.settings.assign_tab(tab, port, token).await?;
        let key = RelayKey::new(port, token);
        self.ensure_connection(&key).await?;
        self.attach_with_retry(tab, &key).await?;
        Ok(Some(tab))
    }
}
