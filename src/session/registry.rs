//! Tab to session bookkeeping.
//!
//! The registry tracks every tab the relay manages and keeps two reverse
//! maps in step with it:
//!
//! | Map | From | To |
//! |-----|------|----|
//! | tabs | [`TabId`] | [`TabSession`] |
//! | sessions | main [`SessionId`] | [`TabId`] |
//! | children | child [`SessionId`] | [`TabId`] |
//!
//! Removing a tab removes its session and all of its children in the same
//! critical section, so no reverse entry ever points at a missing tab.
//!
//! At most one attach runs per tab; [`AttachGuard`] marks the tab while it
//! does.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{RelayKey, SessionId, TabId, TargetId};

// ============================================================================
// Types
// ============================================================================

/// Identity of an attached tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedTab {
    /// Main session handed to the relay server.
    pub session_id: SessionId,
    /// Debugger target of the tab.
    pub target_id: TargetId,
    /// Position in attach order; later attaches compare greater.
    pub attach_order: u64,
}

/// Attachment state of a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabState {
    /// Attach in progress.
    Connecting,
    /// Attached.
    Connected(ConnectedTab),
}

/// A tab managed by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSession {
    /// Host tab id.
    pub tab_id: TabId,
    /// Relay connection the tab is bound to.
    pub relay: RelayKey,
    /// Attachment state.
    pub state: TabState,
}

impl TabSession {
    /// Returns the attach identity when connected.
    #[inline]
    #[must_use]
    pub fn connected(&self) -> Option<&ConnectedTab> {
        match &self.state {
            TabState::Connected(tab) => Some(tab),
            TabState::Connecting => None,
        }
    }
}

/// Which map a session id was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// A tab's main session.
    Main,
    /// A sub-target session reported by the debugger.
    Child,
}

#[derive(Debug)]
struct RegistryState {
    tabs: FxHashMap<TabId, TabSession>,
    sessions: FxHashMap<SessionId, TabId>,
    children: FxHashMap<SessionId, TabId>,
    attaching: FxHashSet<TabId>,
    next_session: u64,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            tabs: FxHashMap::default(),
            sessions: FxHashMap::default(),
            children: FxHashMap::default(),
            attaching: FxHashSet::default(),
            next_session: 1,
        }
    }
}

impl RegistryState {
    fn purge(&mut self, tab: TabId) -> Option<TabSession> {
        let removed = self.tabs.remove(&tab)?;
        if let TabState::Connected(connected) = &removed.state {
            self.sessions.remove(&connected.session_id);
        }
        self.children.retain(|_, parent| *parent != tab);
        Some(removed)
    }
}

// ============================================================================
// AttachGuard
// ============================================================================

/// Marks a tab as mid-attach until dropped.
#[derive(Debug)]
pub struct AttachGuard<'a> {
    registry: &'a SessionRegistry,
    tab: TabId,
}

impl AttachGuard<'_> {
    /// Returns the guarded tab.
    #[inline]
    #[must_use]
    pub fn tab(&self) -> TabId {
        self.tab
    }
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        self.registry.state.lock().attaching.remove(&self.tab);
    }
}

// ============================================================================
// SessionRegistry
// ============================================================================

/// Tab, session and child-session maps.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Attach
    // ========================================================================

    /// Starts an attach: marks the tab connecting and bound to `relay`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Attach`] if an attach is already running for the tab
    /// or the tab is already attached.
    pub fn begin_attach(&self, tab: TabId, relay: &RelayKey) -> Result<AttachGuard<'_>> {
        let mut state = self.state.lock();

        if state.attaching.contains(&tab) {
            return Err(Error::attach(format!(
                "Attach already in progress for tab {tab}"
            )));
        }
        if state
            .tabs
            .get(&tab)
            .is_some_and(|session| session.connected().is_some())
        {
            return Err(Error::attach(format!("Tab {tab} is already attached")));
        }

        state.attaching.insert(tab);
        state.tabs.insert(
            tab,
            TabSession {
                tab_id: tab,
                relay: relay.clone(),
                state: TabState::Connecting,
            },
        );

        Ok(AttachGuard {
            registry: self,
            tab,
        })
    }

    /// Finishes an attach: allocates the session id and marks the tab connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Attach`] if the tab was dropped while attaching.
    pub fn complete_attach(&self, guard: &AttachGuard<'_>, target_id: TargetId) -> Result<ConnectedTab> {
        let mut state = self.state.lock();
        let tab = guard.tab;

        if !matches!(
            state.tabs.get(&tab),
            Some(TabSession {
                state: TabState::Connecting,
                ..
            })
        ) {
            return Err(Error::attach(format!("Tab {tab} went away during attach")));
        }

        let order = state.next_session;
        state.next_session += 1;
        let connected = ConnectedTab {
            session_id: SessionId::for_tab(order),
            target_id,
            attach_order: order,
        };

        state.sessions.insert(connected.session_id.clone(), tab);
        if let Some(session) = state.tabs.get_mut(&tab) {
            session.state = TabState::Connected(connected.clone());
        }

        debug!(tab = %tab, session_id = %connected.session_id, "Tab connected");
        Ok(connected)
    }

    /// Drops the entry of a failed attach. Connected tabs are left alone.
    pub fn abandon_attach(&self, tab: TabId) {
        let mut state = self.state.lock();
        if matches!(
            state.tabs.get(&tab),
            Some(TabSession {
                state: TabState::Connecting,
                ..
            })
        ) {
            state.tabs.remove(&tab);
        }
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Removes a tab with its session and children.
    pub fn remove(&self, tab: TabId) -> Option<TabSession> {
        self.state.lock().purge(tab)
    }

    /// Removes every tab bound to `relay`.
    pub fn drop_relay(&self, relay: &RelayKey) -> Vec<TabSession> {
        let mut state = self.state.lock();
        let doomed: Vec<TabId> = state
            .tabs
            .values()
            .filter(|session| &session.relay == relay)
            .map(|session| session.tab_id)
            .collect();

        doomed
            .into_iter()
            .filter_map(|tab| state.purge(tab))
            .collect()
    }

    // ========================================================================
    // Child Sessions
    // ========================================================================

    /// Records a child session of a connected tab.
    ///
    /// Returns `false` if the tab is not connected.
    pub fn register_child(&self, child: SessionId, tab: TabId) -> bool {
        let mut state = self.state.lock();
        let live = state
            .tabs
            .get(&tab)
            .is_some_and(|session| session.connected().is_some());
        if live {
            state.children.insert(child, tab);
        }
        live
    }

    /// Forgets a child session.
    pub fn remove_child(&self, child: &str) -> Option<TabId> {
        self.state.lock().children.remove(child)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Finds the tab owning a main or child session.
    #[must_use]
    pub fn tab_for_session(&self, session_id: &str) -> Option<(TabId, SessionKind)> {
        let state = self.state.lock();
        state
            .sessions
            .get(session_id)
            .map(|tab| (*tab, SessionKind::Main))
            .or_else(|| {
                state
                    .children
                    .get(session_id)
                    .map(|tab| (*tab, SessionKind::Child))
            })
    }

    /// Finds the tab attached to a debugger target.
    #[must_use]
    pub fn tab_for_target(&self, target_id: &TargetId) -> Option<TabId> {
        self.state
            .lock()
            .tabs
            .values()
            .find(|session| {
                session
                    .connected()
                    .is_some_and(|connected| &connected.target_id == target_id)
            })
            .map(|session| session.tab_id)
    }

    /// Picks the tab a command addresses.
    ///
    /// Session id first (main, then child), then target id, then the most
    /// recently attached connected tab on `relay`.
    #[must_use]
    pub fn resolve_target(
        &self,
        relay: &RelayKey,
        session_id: Option<&str>,
        target_id: Option<&TargetId>,
    ) -> Option<TabId> {
        if let Some(session_id) = session_id
            && let Some((tab, _)) = self.tab_for_session(session_id)
        {
            return Some(tab);
        }
        if let Some(target_id) = target_id
            && let Some(tab) = self.tab_for_target(target_id)
        {
            return Some(tab);
        }

        self.state
            .lock()
            .tabs
            .values()
            .filter(|session| &session.relay == relay)
            .filter_map(|session| {
                session
                    .connected()
                    .map(|connected| (connected.attach_order, session.tab_id))
            })
            .max_by_key(|(order, _)| *order)
            .map(|(_, tab)| tab)
    }

    /// Returns a copy of a tab's entry.
    #[must_use]
    pub fn get(&self, tab: TabId) -> Option<TabSession> {
        self.state.lock().tabs.get(&tab).cloned()
    }

    /// Returns the relay and identity of a connected tab.
    #[must_use]
    pub fn connected(&self, tab: TabId) -> Option<(RelayKey, ConnectedTab)> {
        let state = self.state.lock();
        let session = state.tabs.get(&tab)?;
        session
            .connected()
            .map(|connected| (session.relay.clone(), connected.clone()))
    }

    /// Returns `true` if the tab has an entry in any state.
    #[inline]
    #[must_use]
    pub fn is_tracked(&self, tab: TabId) -> bool {
        self.state.lock().tabs.contains_key(&tab)
    }

    /// Returns `true` if the tab is attached.
    #[inline]
    #[must_use]
    pub fn is_connected(&self, tab: TabId) -> bool {
        self.state
            .lock()
            .tabs
            .get(&tab)
            .is_some_and(|session| session.connected().is_some())
    }

    /// Returns `true` while an attach runs for the tab.
    #[inline]
    #[must_use]
    pub fn is_attaching(&self, tab: TabId) -> bool {
        self.state.lock().attaching.contains(&tab)
    }

    /// Returns the tabs bound to `relay`.
    #[must_use]
    pub fn tabs_on(&self, relay: &RelayKey) -> Vec<TabId> {
        self.state
            .lock()
            .tabs
            .values()
            .filter(|session| &session.relay == relay)
            .map(|session| session.tab_id)
            .collect()
    }

    /// Returns the number of tracked tabs.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tabs.len()
    }

    /// Returns `true` if no tab is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().tabs.is_empty()
    }

    /// Returns the number of main sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Returns the number of child sessions.
    #[inline]
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.state.lock().children.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: u32) -> TabId {
        TabId::new(id).unwrap()
    }

    fn key() -> RelayKey {
        RelayKey::new(9222, "tok")
    }

    fn attach(registry: &SessionRegistry, id: u32, relay: &RelayKey) -> ConnectedTab {
        let guard = registry.begin_attach(tab(id), relay).unwrap();
        registry
            .complete_attach(&guard, TargetId::new(format!("T{id}")))
            .unwrap()
    }

    #[test]
    fn test_attach_allocates_sessions() {
        let registry = SessionRegistry::new();
        let first = attach(&registry, 1, &key());
        let second = attach(&registry, 2, &key());

        assert_eq!(first.session_id.as_str(), "cb-tab-1");
        assert_eq!(second.session_id.as_str(), "cb-tab-2");
        assert!(second.attach_order > first.attach_order);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn test_second_attach_rejected_while_in_flight() {
        let registry = SessionRegistry::new();
        let _guard = registry.begin_attach(tab(1), &key()).unwrap();

        let err = registry.begin_attach(tab(1), &key()).unwrap_err();
        assert!(err.is_attach_error());
        assert!(registry.is_attaching(tab(1)));
    }

    #[test]
    fn test_guard_released_on_drop() {
        let registry = SessionRegistry::new();
        {
            let _guard = registry.begin_attach(tab(1), &key()).unwrap();
        }
        assert!(!registry.is_attaching(tab(1)));
        registry.abandon_attach(tab(1));
        assert!(!registry.is_tracked(tab(1)));
    }

    #[test]
    fn test_connected_tab_cannot_reattach() {
        let registry = SessionRegistry::new();
        attach(&registry, 1, &key());
        assert!(registry.begin_attach(tab(1), &key()).is_err());
    }

    #[test]
    fn test_complete_after_removal_fails() {
        let registry = SessionRegistry::new();
        let guard = registry.begin_attach(tab(1), &key()).unwrap();
        registry.drop_relay(&key());

        assert!(registry.complete_attach(&guard, TargetId::new("T1")).is_err());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_remove_purges_children() {
        let registry = SessionRegistry::new();
        attach(&registry, 1, &key());
        assert!(registry.register_child(SessionId::new("child-a"), tab(1)));
        assert!(!registry.register_child(SessionId::new("child-b"), tab(9)));

        let removed = registry.remove(tab(1)).unwrap();
        assert_eq!(removed.tab_id, tab(1));
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.child_count(), 0);
    }

    #[test]
    fn test_drop_relay_only_touches_its_tabs() {
        let registry = SessionRegistry::new();
        let other = RelayKey::new(9333, "tok");
        attach(&registry, 1, &key());
        attach(&registry, 2, &other);
        registry.register_child(SessionId::new("c1"), tab(1));

        let dropped = registry.drop_relay(&key());
        assert_eq!(dropped.len(), 1);
        assert!(registry.is_connected(tab(2)));
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.child_count(), 0);
        assert!(registry.tab_for_session("cb-tab-1").is_none());
    }

    #[test]
    fn test_resolve_prefers_session_over_target() {
        let registry = SessionRegistry::new();
        attach(&registry, 1, &key());
        attach(&registry, 2, &key());

        let resolved = registry.resolve_target(&key(), Some("cb-tab-1"), Some(&TargetId::new("T2")));
        assert_eq!(resolved, Some(tab(1)));
    }

    #[test]
    fn test_resolve_child_session() {
        let registry = SessionRegistry::new();
        attach(&registry, 1, &key());
        registry.register_child(SessionId::new("child"), tab(1));

        assert_eq!(
            registry.tab_for_session("child"),
            Some((tab(1), SessionKind::Child))
        );
        assert_eq!(registry.resolve_target(&key(), Some("child"), None), Some(tab(1)));
    }

    #[test]
    fn test_resolve_by_target() {
        let registry = SessionRegistry::new();
        attach(&registry, 1, &key());
        attach(&registry, 2, &key());

        let resolved = registry.resolve_target(&key(), Some("unknown"), Some(&TargetId::new("T1")));
        assert_eq!(resolved, Some(tab(1)));
    }

    #[test]
    fn test_fallback_picks_most_recent_on_relay() {
        let registry = SessionRegistry::new();
        let other = RelayKey::new(1, "x");
        attach(&registry, 5, &key());
        attach(&registry, 3, &key());
        attach(&registry, 7, &other);

        assert_eq!(registry.resolve_target(&key(), None, None), Some(tab(3)));
        assert_eq!(registry.resolve_target(&other, None, None), Some(tab(7)));
        assert_eq!(
            registry.resolve_target(&RelayKey::new(2, "y"), None, None),
            None
        );
    }

    #[test]
    fn test_fallback_ignores_connecting_tabs() {
        let registry = SessionRegistry::new();
        let _guard = registry.begin_attach(tab(1), &key()).unwrap();
        assert_eq!(registry.resolve_target(&key(), None, None), None);
    }
}
