//! Presence tracking.
//!
//! [`PresenceRegistry`] is the client's view: a server-driven set replaced
//! wholesale by every `update_online_users` snapshot. [`PresenceTracker`]
//! is the authoritative side that derives those snapshots from open
//! connections, per tenant.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use huddle_shared::{ServerEvent, TenantId, UserId};

/// Identifies one open channel connection.
pub type ConnectionId = Uuid;

// ---------------------------------------------------------------------------
// Client view
// ---------------------------------------------------------------------------

/// Set of online users in the caller's tenant.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    online: HashSet<UserId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set with a server snapshot. Returns whether
    /// membership changed.
    pub fn apply_snapshot(&mut self, users: Vec<UserId>) -> bool {
        let next: HashSet<UserId> = users.into_iter().collect();
        if next == self.online {
            return false;
        }
        debug!(online = next.len(), "Presence snapshot applied");
        self.online = next;
        true
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    /// Online users, sorted for stable display.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.online.iter().copied().collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Authoritative tracker
// ---------------------------------------------------------------------------

/// Online iff at least one of the user's connections is open.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    tenants: HashMap<TenantId, TenantPresence>,
}

#[derive(Debug, Default)]
struct TenantPresence {
    users: HashMap<UserId, HashSet<ConnectionId>>,
    owners: HashMap<ConnectionId, UserId>,
}

impl TenantPresence {
    fn snapshot(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.keys().copied().collect();
        users.sort();
        users
    }

    fn remove_connection(&mut self, conn: ConnectionId) -> bool {
        let Some(user) = self.owners.remove(&conn) else {
            return false;
        };
        let mut went_offline = false;
        if let Some(conns) = self.users.get_mut(&user) {
            conns.remove(&conn);
            if conns.is_empty() {
                self.users.remove(&user);
                went_offline = true;
            }
        }
        went_offline
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `join` on a connection. A connection re-announcing as a
    /// different user is moved over. Always yields the snapshot to
    /// broadcast so the joiner learns the current set.
    pub fn join(&mut self, tenant: &TenantId, user: UserId, conn: ConnectionId) -> ServerEvent {
        let presence = self.tenants.entry(tenant.clone()).or_default();
        if presence.owners.get(&conn) != Some(&user) {
            presence.remove_connection(conn);
            presence.owners.insert(conn, user);
            presence.users.entry(user).or_default().insert(conn);
            debug!(tenant = %tenant, user = %user, conn = %conn, "Presence join");
        }
        ServerEvent::UpdateOnlineUsers(presence.snapshot())
    }

    /// Forget a connection, whether it left cleanly or dropped. Yields a
    /// snapshot only when the tenant's membership actually changed.
    pub fn disconnect(&mut self, tenant: &TenantId, conn: ConnectionId) -> Option<ServerEvent> {
        let presence = self.tenants.get_mut(tenant)?;
        if !presence.remove_connection(conn) {
            return None;
        }
        debug!(tenant = %tenant, conn = %conn, "Presence left");
        let snapshot = presence.snapshot();
        if presence.users.is_empty() {
            self.tenants.remove(tenant);
        }
        Some(ServerEvent::UpdateOnlineUsers(snapshot))
    }

    pub fn is_online(&self, tenant: &TenantId, user: UserId) -> bool {
        self.tenants
            .get(tenant)
            .is_some_and(|p| p.users.contains_key(&user))
    }

    pub fn online_users(&self, tenant: &TenantId) -> Vec<UserId> {
        self.tenants
            .get(tenant)
            .map(TenantPresence::snapshot)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_replaces_not_merges() {
        let mut registry = PresenceRegistry::new();
        assert!(registry.apply_snapshot(vec![UserId(1), UserId(2)]));
        assert!(registry.apply_snapshot(vec![UserId(2), UserId(3)]));

        assert_eq!(registry.online_users(), vec![UserId(2), UserId(3)]);
        assert!(!registry.is_online(UserId(1)));
        assert!(registry.is_online(UserId(3)));
    }

    #[test]
    fn test_identical_snapshot_is_not_a_change() {
        let mut registry = PresenceRegistry::new();
        registry.apply_snapshot(vec![UserId(1), UserId(2)]);
        assert!(!registry.apply_snapshot(vec![UserId(2), UserId(1)]));
        assert!(registry.apply_snapshot(Vec::new()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_online_until_last_connection_closes() {
        let mut tracker = PresenceTracker::new();
        let tenant = TenantId::new("acme");
        let laptop = Uuid::new_v4();
        let phone = Uuid::new_v4();

        tracker.join(&tenant, UserId(5), laptop);
        tracker.join(&tenant, UserId(5), phone);
        assert!(tracker.is_online(&tenant, UserId(5)));

        // Still one connection open: no membership change
        assert!(tracker.disconnect(&tenant, laptop).is_none());
        assert!(tracker.is_online(&tenant, UserId(5)));

        assert_eq!(
            tracker.disconnect(&tenant, phone),
            Some(ServerEvent::UpdateOnlineUsers(Vec::new()))
        );
        assert!(!tracker.is_online(&tenant, UserId(5)));
    }

    #[test]
    fn test_rejoin_on_same_connection_is_idempotent() {
        let mut tracker = PresenceTracker::new();
        let tenant = TenantId::new("acme");
        let conn = Uuid::new_v4();

        tracker.join(&tenant, UserId(1), conn);
        let snapshot = tracker.join(&tenant, UserId(1), conn);
        assert_eq!(snapshot, ServerEvent::UpdateOnlineUsers(vec![UserId(1)]));

        assert!(tracker.disconnect(&tenant, conn).is_some());
        assert!(!tracker.is_online(&tenant, UserId(1)));
    }

    #[test]
    fn test_tenants_are_isolated() {
        let mut tracker = PresenceTracker::new();
        let acme = TenantId::new("acme");
        let globex = TenantId::new("globex");

        tracker.join(&acme, UserId(1), Uuid::new_v4());
        let snapshot = tracker.join(&globex, UserId(2), Uuid::new_v4());

        assert_eq!(snapshot, ServerEvent::UpdateOnlineUsers(vec![UserId(2)]));
        assert!(!tracker.is_online(&globex, UserId(1)));
        assert_eq!(tracker.online_users(&acme), vec![UserId(1)]);
    }

    #[test]
    fn test_unknown_connection_disconnect_is_ignored() {
        let mut tracker = PresenceTracker::new();
        let tenant = TenantId::new("acme");
        assert!(tracker.disconnect(&tenant, Uuid::new_v4()).is_none());
    }
}
