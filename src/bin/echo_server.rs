use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use wirelink::{WsTransport, init_tracing};
use wirelink_core::{
    Connection, HandlerError, InMemorySessionManager, Message, Payload, Server,
    ServerImplementation, ServerOptions, SocketError,
};

/// Echoes requests and lets clients manage a session.
///
/// `session.create` and `session.close` act on the caller's session; every
/// other request is answered with its own payload.
struct Echo;

#[async_trait]
impl ServerImplementation for Echo {
    async fn on_client_connected(&self, connection: &Arc<Connection>) {
        info!(
            connection = %connection.id(),
            user_agent = ?connection.info().user_agent,
            "Client connected"
        );
    }

    async fn on_client_disconnected(
        &self,
        connection: &Arc<Connection>,
        reason: Option<&SocketError>,
    ) {
        info!(connection = %connection.id(), ?reason, "Client disconnected");
    }

    async fn on_signal(&self, connection: &Arc<Connection>, message: &Message) {
        info!(
            connection = %connection.id(),
            name = %String::from_utf8_lossy(message.name()),
            len = message.payload().len(),
            "Signal received"
        );
    }

    async fn on_request(
        &self,
        connection: &Arc<Connection>,
        message: &Message,
    ) -> Result<Payload, HandlerError> {
        match message.name() {
            b"session.create" => {
                let session = connection
                    .create_session(None)
                    .await
                    .map_err(|err| HandlerError::request("SESSION", err.to_string()))?;
                Ok(Payload::utf8(session.key.clone()))
            }
            b"session.close" => {
                connection
                    .close_session()
                    .await
                    .map_err(|err| HandlerError::request("SESSION", err.to_string()))?;
                Ok(Payload::default())
            }
            _ => Ok(message.to_payload()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let addr = std::env::var("WIRELINK_ADDR").unwrap_or_else(|_| "127.0.0.1:8081".to_string());
    let max_session_connections = std::env::var("WIRELINK_MAX_SESSION_CONNECTIONS")
        .ok()
        .map(|value| value.parse::<usize>())
        .transpose()
        .context("WIRELINK_MAX_SESSION_CONNECTIONS must be a number")?
        .unwrap_or(0);

    let transport = WsTransport::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let options = ServerOptions::default()
        .with_max_session_connections(max_session_connections)
        .with_session_manager(Arc::new(InMemorySessionManager::new()));
    let server = Arc::new(Server::new(Arc::new(Echo), options, transport)?);

    info!(
        address = ?server.address().map(|url| url.to_string()),
        max_session_connections,
        "Echo server starting"
    );

    let runner = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    server.shutdown().await?;
    runner.await??;

    Ok(())
}
