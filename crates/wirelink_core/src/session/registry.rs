use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::connection::{Connection, ConnectionId};
use crate::error::RegistryError;

/// Outcome of [`SessionRegistry::deregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deregistration {
    /// The connection was not registered for its session.
    NotRegistered,
    /// The session is still held by this many connections.
    Remaining(usize),
    /// The last connection left; the session may be restored later.
    Deactivated,
    /// The last connection left and the session is to be destroyed.
    Destroyed,
}

/// Tracks which live connections hold which session.
///
/// Every connection registered under a key has the session with that key
/// attached. A key is removed as soon as its last connection deregisters.
/// Operations on the same key are serialized by the map's shard lock; no I/O
/// happens while it is held.
pub struct SessionRegistry {
    max_conns: usize,
    sessions: DashMap<String, HashMap<ConnectionId, Arc<Connection>>, ahash::RandomState>,
}

impl SessionRegistry {
    /// `max_conns` limits connections per session; 0 means unlimited.
    pub fn new(max_conns: usize) -> Self {
        Self {
            max_conns,
            sessions: DashMap::default(),
        }
    }

    pub fn max_conns(&self) -> usize {
        self.max_conns
    }

    /// Add a connection to the set of its attached session.
    ///
    /// Registering an already registered connection is a no-op.
    pub fn register(&self, connection: &Arc<Connection>) -> Result<(), RegistryError> {
        let key = connection.session_key().ok_or(RegistryError::NoSession)?;

        match self.sessions.entry(key) {
            Entry::Occupied(mut slot) => {
                let connections = slot.get_mut();
                if connections.contains_key(&connection.id()) {
                    return Ok(());
                }
                if self.max_conns > 0 && connections.len() + 1 > self.max_conns {
                    return Err(RegistryError::MaxConnectionsReached {
                        key: slot.key().clone(),
                        max: self.max_conns,
                    });
                }
                connections.insert(connection.id(), Arc::clone(connection));
            }
            Entry::Vacant(slot) => {
                slot.insert(HashMap::from([(connection.id(), Arc::clone(connection))]));
            }
        }

        Ok(())
    }

    /// Remove a connection from the set of its attached session.
    ///
    /// The key is dropped once its set is empty; `destroy_if_last` selects
    /// whether that is reported as [`Deregistration::Destroyed`] or
    /// [`Deregistration::Deactivated`].
    pub fn deregister(&self, connection: &Connection, destroy_if_last: bool) -> Deregistration {
        match connection.session_key() {
            Some(key) => self.deregister_key(&key, connection.id(), destroy_if_last),
            None => Deregistration::NotRegistered,
        }
    }

    /// Remove connection `id` from the set of `key`, whatever session the
    /// connection holds now.
    pub fn deregister_key(
        &self,
        key: &str,
        id: ConnectionId,
        destroy_if_last: bool,
    ) -> Deregistration {
        let Entry::Occupied(mut slot) = self.sessions.entry(key.to_owned()) else {
            return Deregistration::NotRegistered;
        };

        if slot.get_mut().remove(&id).is_none() {
            return Deregistration::NotRegistered;
        }

        let remaining = slot.get().len();
        if remaining > 0 {
            return Deregistration::Remaining(remaining);
        }

        slot.remove();
        if destroy_if_last {
            Deregistration::Destroyed
        } else {
            Deregistration::Deactivated
        }
    }

    /// Number of connections holding `key`, or `None` for an unknown key.
    pub fn session_connections_num(&self, key: &str) -> Option<usize> {
        self.sessions.get(key).map(|connections| connections.len())
    }

    /// Whether one more connection may attach to `key`.
    pub fn has_capacity(&self, key: &str) -> bool {
        match self.session_connections_num(key) {
            Some(count) => self.max_conns == 0 || count < self.max_conns,
            None => true,
        }
    }

    /// Snapshot of the connections holding `key`.
    pub fn session_connections(&self, key: &str) -> Vec<Arc<Connection>> {
        self.sessions
            .get(key)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_sessions_num(&self) -> usize {
        self.sessions.len()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("max_conns", &self.max_conns)
            .field("active_sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::testutil;

    fn attach(connection: &Connection, key: &str) {
        connection.set_session(Some(Arc::new(Session::new(key, None))));
    }

    #[tokio::test]
    async fn test_max_connections_scenario() {
        let registry = SessionRegistry::new(2);
        let (c1, _k1) = testutil::connection(1);
        let (c2, _k2) = testutil::connection(2);
        let (c3, _k3) = testutil::connection(3);
        for c in [&c1, &c2, &c3] {
            attach(c, "abc");
        }

        registry.register(&c1).unwrap();
        registry.register(&c2).unwrap();
        assert_eq!(registry.session_connections_num("abc"), Some(2));
        assert_eq!(registry.active_sessions_num(), 1);

        assert_eq!(
            registry.register(&c3),
            Err(RegistryError::MaxConnectionsReached {
                key: "abc".into(),
                max: 2
            })
        );
        assert_eq!(registry.session_connections_num("abc"), Some(2));

        assert_eq!(registry.deregister(&c1, false), Deregistration::Remaining(1));
        assert_eq!(registry.session_connections_num("abc"), Some(1));
        assert_eq!(registry.active_sessions_num(), 1);

        assert_eq!(registry.deregister(&c2, true), Deregistration::Destroyed);
        assert_eq!(registry.session_connections_num("abc"), None);
        assert_eq!(registry.active_sessions_num(), 0);
    }

    #[tokio::test]
    async fn test_last_connection_removes_session() {
        let registry = SessionRegistry::new(0);
        let before = registry.active_sessions_num();
        let (conn, _client) = testutil::connection(1);
        attach(&conn, "fresh");

        registry.register(&conn).unwrap();
        assert_eq!(registry.active_sessions_num(), before + 1);

        assert_eq!(registry.deregister(&conn, true), Deregistration::Destroyed);
        assert_eq!(registry.active_sessions_num(), before);
        assert_eq!(registry.session_connections_num("fresh"), None);
    }

    #[tokio::test]
    async fn test_last_connection_without_destroy_deactivates() {
        let registry = SessionRegistry::new(0);
        let (conn, _client) = testutil::connection(1);
        attach(&conn, "k");

        registry.register(&conn).unwrap();
        assert_eq!(registry.deregister(&conn, false), Deregistration::Deactivated);
        assert_eq!(registry.session_connections_num("k"), None);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = SessionRegistry::new(1);
        let (conn, _client) = testutil::connection(1);
        attach(&conn, "k");

        registry.register(&conn).unwrap();
        registry.register(&conn).unwrap();
        assert_eq!(registry.session_connections_num("k"), Some(1));

        assert_eq!(registry.deregister(&conn, false), Deregistration::Deactivated);
        assert_eq!(registry.deregister(&conn, false), Deregistration::NotRegistered);
    }

    #[tokio::test]
    async fn test_register_without_session_fails() {
        let registry = SessionRegistry::new(0);
        let (conn, _client) = testutil::connection(1);

        assert_eq!(registry.register(&conn), Err(RegistryError::NoSession));
        assert_eq!(registry.deregister(&conn, true), Deregistration::NotRegistered);
        assert_eq!(registry.active_sessions_num(), 0);
    }

    #[tokio::test]
    async fn test_session_connections_snapshot() {
        let registry = SessionRegistry::new(0);
        let (c1, _k1) = testutil::connection(1);
        let (c2, _k2) = testutil::connection(2);
        attach(&c1, "shared");
        attach(&c2, "shared");
        registry.register(&c1).unwrap();
        registry.register(&c2).unwrap();

        let mut ids: Vec<_> = registry
            .session_connections("shared")
            .iter()
            .map(|c| c.id())
            .collect();
        ids.sort();
        assert_eq!(ids, vec![c1.id(), c2.id()]);
        assert!(registry.session_connections("missing").is_empty());
    }

    #[tokio::test]
    async fn test_capacity_check() {
        let registry = SessionRegistry::new(1);
        assert!(registry.has_capacity("k"));

        let (conn, _client) = testutil::connection(1);
        attach(&conn, "k");
        registry.register(&conn).unwrap();
        assert!(!registry.has_capacity("k"));
        assert!(SessionRegistry::new(0).has_capacity("k"));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_respect_limit() {
        let registry = Arc::new(SessionRegistry::new(3));
        let connections: Vec<_> = (0..16)
            .map(|id| {
                let (conn, client) = testutil::connection(id);
                attach(&conn, "hot");
                (conn, client)
            })
            .collect();

        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = connections
                .iter()
                .map(|(conn, _)| {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || registry.register(conn).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .filter(|result| matches!(result, Ok(true)))
                .count()
        });

        assert_eq!(accepted, 3);
        assert_eq!(registry.session_connections_num("hot"), Some(3));
    }
}
