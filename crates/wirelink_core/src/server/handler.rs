use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::error::{HandlerError, ReplyError, ServerError, SocketError};
use crate::message::{Message, build};
use crate::payload::Payload;

/// Application callbacks invoked by the server.
///
/// Callbacks for one connection are invoked serially, in the order the
/// client's frames arrived. A panicking request handler is answered with an
/// internal error; the connection survives.
#[async_trait]
pub trait ServerImplementation: Send + Sync + 'static {
    /// A client was accepted and received the server configuration.
    async fn on_client_connected(&self, _connection: &Arc<Connection>) {}

    /// A client went away. `reason` is `None` for a clean close.
    async fn on_client_disconnected(
        &self,
        _connection: &Arc<Connection>,
        _reason: Option<&SocketError>,
    ) {
    }

    /// A client sent a signal.
    async fn on_signal(&self, connection: &Arc<Connection>, message: &Message);

    /// A client sent a request. The returned payload becomes the reply.
    async fn on_request(
        &self,
        connection: &Arc<Connection>,
        message: &Message,
    ) -> Result<Payload, HandlerError>;
}

/// Run the request handler and send its reply.
pub(crate) async fn handle_request(
    implementation: &dyn ServerImplementation,
    connection: &Arc<Connection>,
    message: Message,
) -> Result<(), ServerError> {
    let Some(identifier) = message.identifier() else {
        return Ok(());
    };

    let result = AssertUnwindSafe(implementation.on_request(connection, &message))
        .catch_unwind()
        .await;

    let frame = match result {
        Ok(Ok(payload)) => build::reply(identifier, &payload),
        Ok(Err(HandlerError::Request { code, message: text })) => {
            match build::error_reply(identifier, &code, &text) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(
                        connection = %connection.id(),
                        error = %err,
                        "Request handler returned an unusable error code"
                    );
                    build::failure(identifier, &ReplyError::Internal)?
                }
            }
        }
        Ok(Err(HandlerError::Internal(err))) => {
            error!(
                connection = %connection.id(),
                name = %String::from_utf8_lossy(message.name()),
                error = %err,
                "Request handler failed"
            );
            build::failure(identifier, &ReplyError::Internal)?
        }
        Err(_) => {
            error!(
                connection = %connection.id(),
                name = %String::from_utf8_lossy(message.name()),
                "Request handler panicked"
            );
            build::failure(identifier, &ReplyError::Internal)?
        }
    };
    message.close();

    connection.write(frame).await?;
    Ok(())
}

/// Run the signal handler. Signals are never answered.
pub(crate) async fn handle_signal(
    implementation: &dyn ServerImplementation,
    connection: &Arc<Connection>,
    message: Message,
) {
    let result = AssertUnwindSafe(implementation.on_signal(connection, &message))
        .catch_unwind()
        .await;

    if result.is_err() {
        error!(
            connection = %connection.id(),
            name = %String::from_utf8_lossy(message.name()),
            "Signal handler panicked"
        );
    } else {
        debug!(connection = %connection.id(), "Signal handled");
    }
}

/// Answer a message that would start new work with a shutdown reply.
pub(crate) async fn refuse(connection: &Connection, message: Message) -> Result<(), ServerError> {
    let Some(identifier) = message.identifier() else {
        return Ok(());
    };
    message.close();

    debug!(connection = %connection.id(), "Refused message during shutdown");
    connection
        .write(build::failure(identifier, &ReplyError::Shutdown)?)
        .await?;
    Ok(())
}
