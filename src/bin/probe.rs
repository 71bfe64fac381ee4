use anyhow::{Result, bail};
use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use wirelink_core::message::{ServerConfig, build};
use wirelink_core::{Identifier, Message, MessageType, Payload, ReplyError};

/// Read the next binary frame, skipping control messages.
async fn next_frame<S>(ws: &mut S) -> Result<Bytes>
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = ws.next().await {
        match message? {
            WsMessage::Binary(data) => return Ok(data),
            WsMessage::Close(frame) => bail!("server closed the connection: {frame:?}"),
            _ => continue,
        }
    }
    bail!("connection ended")
}

/// Send one request to a server and print the reply.
///
/// Usage: `probe [name] [payload]`, connecting to `WIRELINK_URL`.
#[tokio::main]
async fn main() -> Result<()> {
    let url = std::env::var("WIRELINK_URL").unwrap_or_else(|_| "ws://127.0.0.1:8081".to_string());
    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "echo".to_string());
    let payload = args.next().unwrap_or_else(|| "ping".to_string());

    let (mut ws, _) = connect_async(url.as_str()).await?;

    let conf = Message::parse(next_frame(&mut ws).await?)?;
    let conf = ServerConfig::from_message(&conf)?;
    println!(
        "connected to {url} (protocol {}.{}, buffer {} bytes)",
        conf.major_version, conf.minor_version, conf.message_buffer_size
    );

    let identifier = Identifier::from(1);
    let frame = build::request(identifier, name.as_bytes(), &Payload::utf8(payload))?;
    ws.send(WsMessage::Binary(frame)).await?;

    loop {
        let message = Message::parse(next_frame(&mut ws).await?)?;
        if message.identifier() != Some(identifier) {
            println!("{message:?}");
            continue;
        }

        match message.kind() {
            MessageType::ReplyBinary | MessageType::ReplyUtf8 => {
                println!("{}", String::from_utf8_lossy(message.payload()));
            }
            MessageType::ErrorReply => {
                println!(
                    "error {}: {}",
                    String::from_utf8_lossy(message.name()),
                    String::from_utf8_lossy(message.payload())
                );
            }
            kind => match ReplyError::from_message_type(kind) {
                Some(err) => println!("failed: {err}"),
                None => println!("unexpected reply: {kind:?}"),
            },
        }
        break;
    }

    ws.close(None).await?;
    Ok(())
}
