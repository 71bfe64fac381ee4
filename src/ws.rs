//! WebSocket transport on top of `tokio-tungstenite`.
//!
//! Every binary WebSocket message carries exactly one protocol frame.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use wirelink_core::transport::{Acceptor, Socket, Transport};
use wirelink_core::{ConnectionInfo, SocketError, TransportError};

type WsStream = WebSocketStream<TcpStream>;

/// Accepts WebSocket connections on a TCP listener.
pub struct WsTransport {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    acceptor: OnceLock<Acceptor>,
    cancel: CancellationToken,
}

impl WsTransport {
    /// Bind the listening socket. Connections are accepted once the server
    /// runs.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            acceptor: OnceLock::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("local_addr", &self.local_addr)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn initialize(&self, acceptor: Acceptor) -> Result<(), TransportError> {
        if self.acceptor.set(acceptor).is_err() {
            warn!("WebSocket transport already initialized");
        }
        Ok(())
    }

    async fn serve(&self) -> Result<(), TransportError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or(TransportError::Closed)?;
        let acceptor = self.acceptor.get().cloned().ok_or(TransportError::Closed)?;

        info!(address = %self.local_addr, "WebSocket transport listening");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(upgrade(stream, addr, acceptor.clone()));
                    }
                    Err(err) => warn!(error = %err, "Failed to accept TCP connection"),
                },
            }
        }

        info!(address = %self.local_addr, "WebSocket transport stopped");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.cancel.cancel();
        Ok(())
    }

    fn address(&self) -> Option<Url> {
        Url::parse(&format!("ws://{}", self.local_addr)).ok()
    }
}

/// Run the WebSocket handshake and hand the socket to the server.
async fn upgrade(stream: TcpStream, addr: SocketAddr, acceptor: Acceptor) {
    let mut user_agent = None;

    let handshake = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if acceptor.is_shutting_down() {
                let mut refusal = ErrorResponse::new(Some("server is shutting down".into()));
                *refusal.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                return Err(refusal);
            }
            user_agent = req
                .headers()
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            Ok(response)
        },
    )
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(err) => {
            debug!(remote_addr = %addr, error = %err, "WebSocket handshake failed");
            return;
        }
    };

    let info = ConnectionInfo::builder()
        .maybe_user_agent(user_agent)
        .remote_addr(addr)
        .build();

    let socket = WsSocket::new(ws, addr, acceptor.read_timeout());
    if let Err(err) = acceptor.accept(info, Arc::new(socket)) {
        warn!(remote_addr = %addr, error = %err, "Server refused connection");
    }
}

/// A server-side WebSocket connection.
///
/// A peer that sends nothing, not even a ping or pong, for longer than the
/// read timeout is dropped.
pub struct WsSocket {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    stream: Mutex<SplitStream<WsStream>>,
    remote_addr: SocketAddr,
    read_timeout: Duration,
    closed: CancellationToken,
}

impl WsSocket {
    fn new(ws: WsStream, remote_addr: SocketAddr, read_timeout: Duration) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            remote_addr,
            read_timeout,
            closed: CancellationToken::new(),
        }
    }

    /// Next WebSocket message, bounded by the read timeout.
    async fn next_message(
        &self,
        stream: &mut SplitStream<WsStream>,
    ) -> Result<Option<Result<WsMessage, WsError>>, SocketError> {
        if self.read_timeout.is_zero() {
            return Ok(stream.next().await);
        }
        tokio::time::timeout(self.read_timeout, stream.next())
            .await
            .map_err(|_| {
                SocketError::Abnormal(format!("no message for {:?}", self.read_timeout))
            })
    }
}

fn socket_error(err: WsError) -> SocketError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => SocketError::Closed,
        other => SocketError::Abnormal(other.to_string()),
    }
}

#[async_trait]
impl Socket for WsSocket {
    async fn read(&self) -> Result<Bytes, SocketError> {
        if self.closed.is_cancelled() {
            return Err(SocketError::Closed);
        }

        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => return Err(SocketError::Closed),
                next = self.next_message(&mut stream) => next?,
            };

            match next {
                Some(Ok(WsMessage::Binary(data))) => return Ok(data),
                Some(Ok(WsMessage::Text(_))) => {
                    return Err(SocketError::WrongMessageType("text".into()));
                }
                // Pings are answered by tungstenite itself
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => return Err(SocketError::Closed),
                Some(Err(err)) => return Err(socket_error(err)),
            }
        }
    }

    async fn write(&self, frame: Bytes) -> Result<(), SocketError> {
        self.sink
            .lock()
            .await
            .send(WsMessage::Binary(frame))
            .await
            .map_err(socket_error)
    }

    async fn close(&self) -> Result<(), SocketError> {
        self.closed.cancel();

        let closing = async { self.sink.lock().await.close().await };
        let result = if self.read_timeout.is_zero() {
            closing.await
        } else {
            // A peer that stopped reading must not block the close
            tokio::time::timeout(self.read_timeout, closing)
                .await
                .map_err(|_| SocketError::Abnormal("close timed out".into()))?
        };
        match result.map_err(socket_error) {
            Err(SocketError::Closed) => Ok(()),
            result => result,
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::connect_async;
    use wirelink_core::message::{ServerConfig, build};
    use wirelink_core::{
        Connection, HandlerError, Identifier, Message, MessageType, Payload, Server,
        ServerImplementation, ServerOptions,
    };

    struct Echo;

    #[async_trait]
    impl ServerImplementation for Echo {
        async fn on_signal(&self, _connection: &Arc<Connection>, _message: &Message) {}

        async fn on_request(
            &self,
            connection: &Arc<Connection>,
            message: &Message,
        ) -> Result<Payload, HandlerError> {
            match message.name() {
                b"addr" => Ok(Payload::utf8(
                    connection
                        .info()
                        .remote_addr
                        .map(|addr| addr.to_string())
                        .unwrap_or_default(),
                )),
                _ => Ok(message.to_payload()),
            }
        }
    }

    async fn next_binary(
        ws: &mut WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    ) -> Bytes {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .unwrap()
            {
                Some(Ok(WsMessage::Binary(data))) => return data,
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_request_over_websocket() {
        let transport = WsTransport::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(
            Server::new(Arc::new(Echo), ServerOptions::default(), transport).unwrap(),
        );
        let runner = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });

        let url = server.address().unwrap();
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        let conf = Message::parse(next_binary(&mut ws).await).unwrap();
        assert_eq!(ServerConfig::from_message(&conf).unwrap().message_buffer_size, 8192);

        let frame = build::request(Identifier::from(1), b"echo", &Payload::utf8("hi")).unwrap();
        ws.send(WsMessage::Binary(frame)).await.unwrap();
        let reply = Message::parse(next_binary(&mut ws).await).unwrap();
        assert_eq!(reply.kind(), MessageType::ReplyUtf8);
        assert_eq!(reply.payload(), b"hi");

        // Text messages are not frames and are skipped
        ws.send(WsMessage::text("hello")).await.unwrap();
        let frame = build::request(Identifier::from(2), b"echo", &Payload::default()).unwrap();
        ws.send(WsMessage::Binary(frame)).await.unwrap();
        let reply = Message::parse(next_binary(&mut ws).await).unwrap();
        assert_eq!(reply.identifier(), Some(Identifier::from(2)));

        let frame = build::request(Identifier::from(3), b"addr", &Payload::default()).unwrap();
        ws.send(WsMessage::Binary(frame)).await.unwrap();
        let reply = Message::parse(next_binary(&mut ws).await).unwrap();
        assert!(String::from_utf8_lossy(reply.payload()).starts_with("127.0.0.1:"));

        server.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_connections_refused_after_shutdown() {
        let transport = WsTransport::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(
            Server::new(Arc::new(Echo), ServerOptions::default(), transport).unwrap(),
        );
        let url = server.address().unwrap();
        let runner = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });

        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        next_binary(&mut ws).await;
        server.shutdown().await.unwrap();
        runner.await.unwrap().unwrap();

        // The open connection is closed by the server
        loop {
            match tokio::time::timeout(Duration::from_secs(2), ws.next()).await.unwrap() {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
        assert!(connect_async(url.as_str()).await.is_err());
    }

    async fn start(options: ServerOptions) -> Arc<Server<WsTransport>> {
        let transport = WsTransport::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(Server::new(Arc::new(Echo), options, transport).unwrap());
        tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });
        server
    }

    async fn wait_for_connections(server: &Server<WsTransport>, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.connections_num() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {expected} connections, have {}",
                server.connections_num()
            )
        });
    }

    #[tokio::test]
    async fn test_shutdown_ends_connections_of_unresponsive_clients() {
        let server = start(ServerOptions::default()).await;
        let url = server.address().unwrap();

        // Never polled after the handshake, so the close is never answered
        let (_ws, _) = connect_async(url.as_str()).await.unwrap();
        wait_for_connections(&server, 1).await;

        server.shutdown().await.unwrap();
        wait_for_connections(&server, 0).await;
    }

    #[tokio::test]
    async fn test_silent_client_is_dropped_after_read_timeout() {
        let options = ServerOptions::default().with_read_timeout(Duration::from_millis(150));
        let server = start(options).await;
        let url = server.address().unwrap();

        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        let conf = Message::parse(next_binary(&mut ws).await).unwrap();
        assert_eq!(
            ServerConfig::from_message(&conf).unwrap().read_timeout,
            Duration::from_millis(150)
        );
        wait_for_connections(&server, 1).await;

        wait_for_connections(&server, 0).await;
    }

    #[tokio::test]
    async fn test_pings_keep_client_alive() {
        let options = ServerOptions::default().with_read_timeout(Duration::from_millis(300));
        let server = start(options).await;
        let url = server.address().unwrap();

        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        wait_for_connections(&server, 1).await;

        for _ in 0..15 {
            ws.send(WsMessage::Ping(Bytes::new())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert_eq!(server.connections_num(), 1);

        server.shutdown().await.unwrap();
    }
}
