//! Fixed command and event allow-lists.
//!
//! Only the methods listed here cross the relay in either direction.
//! The tables are process-wide and immutable.

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use rustc_hash::FxHashSet;

// ============================================================================
// Constants
// ============================================================================

/// Version string written to the feature marker.
pub const FEATURE_VERSION: &str = "openclaw-relay-fork-v1";

/// Commands the relay may forward to a tab.
pub const ALLOWED_COMMANDS: &[&str] = &[
    // Runtime
    "Runtime.enable",
    "Runtime.evaluate",
    "Runtime.callFunctionOn",
    "Runtime.getProperties",
    "Runtime.releaseObject",
    "Runtime.releaseObjectGroup",
    "Runtime.runIfWaitingForDebugger",
    "Runtime.getIsolateId",
    "Runtime.getHeapUsage",
    // Page
    "Page.enable",
    "Page.bringToFront",
    "Page.captureSnapshot",
    "Page.getLayoutMetrics",
    "Page.getNavigationHistory",
    "Page.navigate",
    "Page.reload",
    "Page.captureScreenshot",
    "Page.getFrameTree",
    "Page.getResourceTree",
    "Page.getResourceContent",
    "Page.stopLoading",
    "Page.printToPDF",
    "Page.setLifecycleEventsEnabled",
    // Network
    "Network.enable",
    "Network.disable",
    "Network.getResponseBody",
    "Network.getAllCookies",
    "Network.getCookies",
    "Network.setCookie",
    "Network.setCookies",
    "Network.deleteCookies",
    "Network.clearBrowserCookies",
    "Network.setExtraHTTPHeaders",
    "Network.setBlockedURLs",
    "Network.emulateNetworkConditions",
    "Network.setCacheDisabled",
    "Network.getSecurityIsolationStatus",
    "Network.getCertificate",
    "Network.setUserAgentOverride",
    "Network.getUserAgentOverride",
    "Network.setBypassServiceWorker",
    "Network.clearBrowserCache",
    // Target
    "Target.getTargetInfo",
    "Target.getTargets",
    "Target.attachToTarget",
    "Target.detachFromTarget",
    "Target.setDiscoverTargets",
    "Target.createTarget",
    "Target.closeTarget",
    "Target.activateTarget",
    // DOM
    "DOM.enable",
    "DOM.disable",
    "DOM.getDocument",
    "DOM.querySelector",
    "DOM.querySelectorAll",
    "DOM.getOuterHTML",
    "DOM.getAttributes",
    "DOM.resolveNode",
    "DOM.focus",
    "DOM.scrollIntoViewIfNeeded",
    // CSS
    "CSS.enable",
    "CSS.disable",
    "CSS.getComputedStyleForNode",
    "CSS.getMatchedStylesForNode",
    "CSS.getInlineStylesForNode",
    // Log
    "Log.enable",
    "Log.disable",
    // Input
    "Input.dispatchMouseEvent",
    "Input.dispatchKeyEvent",
    "Input.insertText",
    // Emulation
    "Emulation.setDeviceMetricsOverride",
    "Emulation.setUserAgentOverride",
    "Emulation.setGeolocationOverride",
    "Emulation.clearGeolocationOverride",
    "Emulation.setTouchEmulationEnabled",
    "Emulation.setLocaleOverride",
    "Emulation.setTimezoneOverride",
];

/// Events the relay may forward from a tab.
///
/// The two `Target` events carry child-session bookkeeping.
pub const ALLOWED_EVENTS: &[&str] = &[
    "Page.frameNavigated",
    "Page.loadEventFired",
    "Runtime.exceptionThrown",
    "Runtime.consoleAPICalled",
    "Target.attachedToTarget",
    "Target.detachedFromTarget",
];

static STANDARD: LazyLock<Allowlist> =
    LazyLock::new(|| Allowlist::new(ALLOWED_COMMANDS, ALLOWED_EVENTS));

// ============================================================================
// Allowlist
// ============================================================================

/// Sets of permitted command and event names.
#[derive(Debug, Clone)]
pub struct Allowlist {
    commands: FxHashSet<&'static str>,
    events: FxHashSet<&'static str>,
}

impl Allowlist {
    /// Builds an allow-list from explicit tables.
    #[must_use]
    pub fn new(commands: &[&'static str], events: &[&'static str]) -> Self {
        Self {
            commands: commands.iter().copied().collect(),
            events: events.iter().copied().collect(),
        }
    }

    /// Returns the shared production allow-list.
    #[inline]
    #[must_use]
    pub fn standard() -> &'static Self {
        &STANDARD
    }

    /// Returns `true` if the command may be forwarded.
    #[inline]
    #[must_use]
    pub fn allows_command(&self, method: &str) -> bool {
        self.commands.contains(method)
    }

    /// Returns `true` if the event may be forwarded.
    #[inline]
    #[must_use]
    pub fn allows_event(&self, method: &str) -> bool {
        self.events.contains(method)
    }

    /// Returns the number of allowed commands.
    #[inline]
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        let list = Allowlist::standard();
        assert!(list.allows_command("Runtime.evaluate"));
        assert!(list.allows_command("Target.createTarget"));
        assert!(list.allows_command("Emulation.setTimezoneOverride"));
        assert!(!list.allows_command("Browser.close"));
        assert!(!list.allows_command("runtime.evaluate"));
        assert!(!list.allows_command(""));
    }

    #[test]
    fn test_events() {
        let list = Allowlist::standard();
        assert!(list.allows_event("Page.loadEventFired"));
        assert!(list.allows_event("Target.attachedToTarget"));
        assert!(!list.allows_event("Network.requestWillBeSent"));
    }

    #[test]
    fn test_no_duplicate_entries() {
        assert_eq!(Allowlist::standard().command_count(), ALLOWED_COMMANDS.len());
    }
}
