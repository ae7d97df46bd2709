//! Bridges axum's `WebSocket` to the tungstenite message type the hub pumps
//! speak.

use axum::extract::ws::{self, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use notify_hub::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Wrap an upgraded axum socket so it streams and accepts [`Message`]s.
pub fn adapt(
    socket: WebSocket,
) -> impl Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Send + 'static
{
    socket
        .with(|msg: Message| future::ready(to_axum(msg)))
        .map(|res| res.map(from_axum))
}

fn to_axum(msg: Message) -> Result<ws::Message, axum::Error> {
    Ok(match msg {
        Message::Text(text) => ws::Message::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => ws::Message::Binary(data),
        Message::Ping(data) => ws::Message::Ping(data),
        Message::Pong(data) => ws::Message::Pong(data),
        Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        })),
        Message::Frame(_) => return Err(axum::Error::new("raw frames cannot be sent")),
    })
}

fn from_axum(msg: ws::Message) -> Message {
    match msg {
        ws::Message::Text(text) => Message::Text(text.as_str().to_owned().into()),
        ws::Message::Binary(data) => Message::Binary(data),
        ws::Message::Ping(data) => Message::Ping(data),
        ws::Message::Pong(data) => Message::Pong(data),
        ws::Message::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}
