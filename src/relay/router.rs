//! Routing of commands pushed by the relay server.

use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::bridge::Debuggee;
use crate::error::{Error, Result};
use crate::identifiers::{RelayKey, TabId};
use crate::protocol::ForwardedCommand;
use crate::session::ConnectedTab;

use super::attach::AttachOptions;
use super::core::Relay;

// ============================================================================
// Constants
// ============================================================================

const RUNTIME_ENABLE: &str = "Runtime.enable";
const CREATE_TARGET: &str = "Target.createTarget";
const CLOSE_TARGET: &str = "Target.closeTarget";
const ACTIVATE_TARGET: &str = "Target.activateTarget";

// ============================================================================
// Relay - Command Routing
// ============================================================================

impl Relay {
    /// Executes one forwarded command and returns its result.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the method is not allowed
    /// - [`Error::Attach`] if no attached tab matches
    /// - [`Error::RateLimited`] if too many targets were created
    /// - bridge or host failures
    pub(crate) async fn handle_command(
        &self,
        key: &RelayKey,
        command: ForwardedCommand,
    ) -> Result<Value> {
        if !self.inner.allowlist.allows_command(&command.method) {
            debug!(method = %command.method, "Command rejected by allow-list");
            return Err(Error::protocol(format!(
                "CDP method not allowed: {}",
                command.method
            )));
        }

        let target_id = command.target_id();
        let tab = self
            .inner
            .registry
            .resolve_target(
                key,
                command.session_id.as_ref().map(|s| s.as_str()),
                target_id.as_ref(),
            )
            .ok_or_else(|| {
                Error::attach(format!("No attached tab for method {}", command.method))
            })?;

        trace!(tab = %tab, method = %command.method, "Routing command");

        match command.method.as_str() {
            RUNTIME_ENABLE => {
                self.inner
                    .bridge
                    .send_command(&Debuggee::tab(tab), RUNTIME_ENABLE, command.params)
                    .await
            }
            CREATE_TARGET => self.create_target(key, &command).await,
            CLOSE_TARGET => self.close_target(tab, &command).await,
            ACTIVATE_TARGET => self.activate_target(tab, &command).await,
            _ => {
                let debuggee = self.debuggee_for(tab, &command);
                self.inner
                    .bridge
                    .send_command(&debuggee, &command.method, command.params)
                    .await
            }
        }
    }

    /// Addresses the sub-session when the command names one other than the
    /// tab's main session.
    fn debuggee_for(&self, tab: TabId, command: &ForwardedCommand) -> Debuggee {
        let main = self
            .inner
            .registry
            .connected(tab)
            .map(|(_, connected)| connected.session_id);

        match (&command.session_id, main) {
            (Some(session_id), Some(main)) if *session_id != main => {
                Debuggee::session(tab, session_id.clone())
            }
            _ => Debuggee::tab(tab),
        }
    }

    async fn create_target(&self, key: &RelayKey, command: &ForwardedCommand) -> Result<Value> {
        if !self.inner.create_target_limiter.try_acquire() {
            return Err(Error::rate_limited(CREATE_TARGET));
        }

        let url = command.param_str("url").unwrap_or("about:blank");
        let tab = self.inner.host.create(url, false).await?;
        debug!(tab = %tab, url, "Target created");
        sleep(self.inner.config.create_target_settle).await;

        let ConnectedTab { target_id, .. } = self
            .attach_with_options(
                tab,
                key,
                AttachOptions {
                    created: true,
                    ..AttachOptions::default()
                },
            )
            .await?;

        Ok(json!({ "targetId": target_id }))
    }

    async fn close_target(&self, resolved: TabId, command: &ForwardedCommand) -> Result<Value> {
        let tab = self.target_tab(resolved, command);
        let success = match tab {
            Some(tab) => self.inner.host.remove(tab).await.is_ok(),
            None => false,
        };
        Ok(json!({ "success": success }))
    }

    async fn activate_target(&self, resolved: TabId, command: &ForwardedCommand) -> Result<Value> {
        let Some(tab) = self.target_tab(resolved, command) else {
            return Ok(json!({}));
        };

        let Ok(Some(info)) = self.inner.host.get(tab).await else {
            return Ok(json!({}));
        };
        if let Some(window_id) = info.window_id {
            let _ = self.inner.host.focus_window(window_id).await;
        }
        let _ = self.inner.host.activate(tab).await;
        Ok(json!({}))
    }

    /// Tab named by `params.targetId`, falling back to the resolved tab when
    /// no target id is given.
    fn target_tab(&self, resolved: TabId, command: &ForwardedCommand) -> Option<TabId> {
        match command.target_id() {
            Some(target_id) if !target_id.as_str().is_empty() => {
                self.inner.registry.tab_for_target(&target_id)
            }
            _ => Some(resolved),
        }
    }
}
