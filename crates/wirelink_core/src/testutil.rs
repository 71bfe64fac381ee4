use std::sync::Arc;

use crate::connection::{Connection, ConnectionId, ConnectionInfo};
use crate::session::{
    InMemorySessionManager, SessionContext, SessionManager, SessionRegistry, UuidKeyGenerator,
};
use crate::transport::{MemoryClient, memory_pair};

pub(crate) fn context(
    manager: Option<Arc<dyn SessionManager>>,
    max_conns: usize,
) -> Arc<SessionContext> {
    Arc::new(SessionContext {
        registry: SessionRegistry::new(max_conns),
        manager,
        key_generator: Arc::new(UuidKeyGenerator),
        info_parser: None,
    })
}

pub(crate) fn connection_with(
    id: u64,
    sessions: &Arc<SessionContext>,
) -> (Arc<Connection>, MemoryClient) {
    let (socket, client) = memory_pair(None);
    let connection = Connection::new(
        ConnectionId(id),
        ConnectionInfo::default(),
        Arc::new(socket),
        Arc::clone(sessions),
    );
    (Arc::new(connection), client)
}

/// A connection with sessions enabled, backed by its own in-memory manager.
pub(crate) fn connection(id: u64) -> (Arc<Connection>, MemoryClient) {
    let sessions = context(Some(Arc::new(InMemorySessionManager::new())), 0);
    connection_with(id, &sessions)
}
