use std::sync::Arc;

use tracing::{debug, error};

use crate::connection::Connection;
use crate::error::{ReplyError, ServerError};
use crate::message::{Message, build};
use crate::payload::{Encoding, Payload};
use crate::session::{JsonSession, Session, SessionContext};

enum RestoreError {
    Reply(ReplyError),
    /// Registration failed although the limit check passed.
    LimitRace(String),
}

impl From<ReplyError> for RestoreError {
    fn from(err: ReplyError) -> Self {
        RestoreError::Reply(err)
    }
}

/// Restore the session named by the message payload onto `connection`.
///
/// Replies with the JSON session on success and with a typed failure
/// otherwise. A failed registration after a passed limit check is answered
/// with an internal error and reported as [`ServerError::SessionLimitRace`].
pub(crate) async fn handle_session_restore(
    sessions: &SessionContext,
    connection: &Arc<Connection>,
    message: Message,
) -> Result<(), ServerError> {
    let Some(identifier) = message.identifier() else {
        return Ok(());
    };
    let key = std::str::from_utf8(message.payload()).map(str::to_owned).ok();
    message.close();

    let result = restore(sessions, connection, key).await;
    let frame = match &result {
        Ok(payload) => build::reply(identifier, payload),
        Err(RestoreError::Reply(err)) => build::failure(identifier, err)?,
        Err(RestoreError::LimitRace(_)) => build::failure(identifier, &ReplyError::Internal)?,
    };
    connection.write(frame).await?;

    match result {
        Err(RestoreError::LimitRace(key)) => Err(ServerError::SessionLimitRace { key }),
        _ => Ok(()),
    }
}

async fn restore(
    sessions: &SessionContext,
    connection: &Arc<Connection>,
    key: Option<String>,
) -> Result<Payload, RestoreError> {
    let Some(manager) = &sessions.manager else {
        return Err(ReplyError::SessionsDisabled.into());
    };
    let Some(key) = key else {
        return Err(ReplyError::Protocol.into());
    };
    if connection.has_session() {
        return Err(ReplyError::Protocol.into());
    }
    if !sessions.registry.has_capacity(&key) {
        return Err(ReplyError::MaxSessionConnectionsReached.into());
    }

    let record = match manager.on_session_lookup(&key).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(ReplyError::SessionNotFound.into()),
        Err(err) => {
            error!(
                connection = %connection.id(),
                session = %key,
                error = %err,
                "Session lookup failed"
            );
            return Err(ReplyError::Internal.into());
        }
    };

    // Clients get the stored info as is, whether or not a parser is configured
    let encoded = serde_json::to_vec(&JsonSession {
        key: key.clone(),
        creation: record.creation,
        last_lookup: record.last_lookup,
        info: record.info.clone(),
    });
    let encoded = match encoded {
        Ok(encoded) => encoded,
        Err(err) => {
            error!(
                connection = %connection.id(),
                session = %key,
                error = %err,
                "Failed to encode restored session"
            );
            return Err(ReplyError::Internal.into());
        }
    };

    let session = Arc::new(Session {
        key: key.clone(),
        creation: record.creation,
        last_lookup: record.last_lookup,
        info: sessions.parse_info(record.info.as_ref()),
    });
    connection
        .attach_session(session)
        .map_err(|_| ReplyError::Protocol)?;

    if let Err(err) = sessions.registry.register(connection) {
        connection.set_session(None);
        error!(
            connection = %connection.id(),
            session = %key,
            error = %err,
            "Session registration failed after the limit check"
        );
        return Err(RestoreError::LimitRace(key));
    }

    debug!(connection = %connection.id(), session = %key, "Session restored");
    Ok(Payload::new(Encoding::Utf8, encoded))
}

/// Close the connection's session, destroying it if this was its last
/// connection. Closing without a session succeeds without effect.
pub(crate) async fn handle_session_closure(
    sessions: &SessionContext,
    connection: &Arc<Connection>,
    message: Message,
) -> Result<(), ServerError> {
    let Some(identifier) = message.identifier() else {
        return Ok(());
    };
    message.close();

    let frame = if sessions.enabled() {
        sessions.detach(connection, true).await;
        build::reply(identifier, &Payload::default())
    } else {
        build::failure(identifier, &ReplyError::SessionsDisabled)?
    };

    connection.write(frame).await?;
    Ok(())
}
