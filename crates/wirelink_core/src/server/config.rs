use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::message::{PROTOCOL_MAJOR, PROTOCOL_MINOR, ServerConfig};
use crate::session::{SessionInfoParser, SessionKeyGenerator, SessionManager, UuidKeyGenerator};

/// Configuration for a [`Server`](crate::server::Server).
#[derive(Clone)]
pub struct ServerOptions {
    /// Maximum number of connections sharing one session. 0 means unlimited.
    pub max_session_connections: usize,

    /// Size of each message buffer; larger frames are dropped.
    pub message_buffer_size: usize,

    /// Number of pooled message buffers.
    pub message_pool_capacity: usize,

    /// Read timeout announced to clients and enforced by transports that
    /// can detect silent peers. Zero disables it.
    pub read_timeout: Duration,

    /// Sub-protocol name announced to clients.
    pub sub_protocol: Option<Bytes>,

    /// Session persistence. Sessions are disabled when unset.
    pub session_manager: Option<Arc<dyn SessionManager>>,

    pub session_key_generator: Arc<dyn SessionKeyGenerator>,

    /// Turns stored session info into the application's type. When unset the
    /// raw JSON map is used.
    pub session_info_parser: Option<SessionInfoParser>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_session_connections: 0,
            message_buffer_size: 8 * 1024,
            message_pool_capacity: 1024,
            read_timeout: Duration::from_secs(60),
            sub_protocol: None,
            session_manager: None,
            session_key_generator: Arc::new(UuidKeyGenerator),
            session_info_parser: None,
        }
    }
}

impl ServerOptions {
    pub fn with_max_session_connections(mut self, max: usize) -> Self {
        self.max_session_connections = max;
        self
    }

    pub fn with_message_buffer_size(mut self, size: usize) -> Self {
        self.message_buffer_size = size;
        self
    }

    pub fn with_message_pool_capacity(mut self, capacity: usize) -> Self {
        self.message_pool_capacity = capacity;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_sub_protocol(mut self, name: impl Into<Bytes>) -> Self {
        self.sub_protocol = Some(name.into());
        self
    }

    /// Enable sessions, persisted through `manager`.
    pub fn with_session_manager(mut self, manager: Arc<dyn SessionManager>) -> Self {
        self.session_manager = Some(manager);
        self
    }

    pub fn with_session_key_generator(mut self, generator: Arc<dyn SessionKeyGenerator>) -> Self {
        self.session_key_generator = generator;
        self
    }

    pub fn with_session_info_parser(mut self, parser: SessionInfoParser) -> Self {
        self.session_info_parser = Some(parser);
        self
    }

    /// The configuration announced to clients on accept.
    pub(crate) fn server_config(&self) -> ServerConfig {
        ServerConfig {
            major_version: PROTOCOL_MAJOR,
            minor_version: PROTOCOL_MINOR,
            read_timeout: self.read_timeout,
            message_buffer_size: u32::try_from(self.message_buffer_size).unwrap_or(u32::MAX),
            sub_protocol: self.sub_protocol.clone(),
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("max_session_connections", &self.max_session_connections)
            .field("message_buffer_size", &self.message_buffer_size)
            .field("message_pool_capacity", &self.message_pool_capacity)
            .field("read_timeout", &self.read_timeout)
            .field("sub_protocol", &self.sub_protocol)
            .field("sessions_enabled", &self.session_manager.is_some())
            .field("session_info_parser", &self.session_info_parser.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionManager;

    #[test]
    fn test_defaults() {
        let options = ServerOptions::default();
        assert_eq!(options.max_session_connections, 0);
        assert_eq!(options.message_buffer_size, 8192);
        assert!(options.session_manager.is_none());
    }

    #[test]
    fn test_server_config_reflects_options() {
        let options = ServerOptions::default()
            .with_read_timeout(Duration::from_millis(1500))
            .with_message_buffer_size(4096)
            .with_sub_protocol("chat")
            .with_session_manager(Arc::new(InMemorySessionManager::new()));

        let config = options.server_config();
        assert_eq!(config.major_version, PROTOCOL_MAJOR);
        assert_eq!(config.read_timeout, Duration::from_millis(1500));
        assert_eq!(config.message_buffer_size, 4096);
        assert_eq!(config.sub_protocol.as_deref(), Some(&b"chat"[..]));
        assert!(options.session_manager.is_some());
    }
}
