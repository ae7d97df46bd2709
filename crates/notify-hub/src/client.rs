//! One upgraded WebSocket bound to the hub.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, Stream, StreamExt};
use notify_core::{Result, UserId};
use notify_settings::ConnectionSettings;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use crate::connection::Connection;
use crate::hub::HubHandle;
use crate::keepalive::Keepalive;
use crate::pump::{PumpExit, read_pump, write_pump};

/// A connected client that has not started serving yet.
pub struct Client<S> {
    conn: Arc<Connection>,
    send_rx: mpsc::Receiver<Utf8Bytes>,
    hub: HubHandle,
    stream: S,
    keepalive: Keepalive,
}

/// Join handles for a serving client's pumps.
#[derive(Debug)]
pub struct ClientTasks {
    /// The write pump.
    pub writer: JoinHandle<PumpExit>,
    /// The read pump.
    pub reader: JoinHandle<PumpExit>,
}

impl ClientTasks {
    /// Wait for both pumps. Returns `(writer, reader)` exits.
    pub async fn join(self) -> (PumpExit, PumpExit) {
        let (writer, reader) = tokio::join!(self.writer, self.reader);
        let flatten = |res: std::result::Result<PumpExit, tokio::task::JoinError>| {
            res.unwrap_or_else(|e| PumpExit::Aborted(e.to_string()))
        };
        (flatten(writer), flatten(reader))
    }
}

impl<S, E> Client<S>
where
    S: Stream<Item = std::result::Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
    E: Display + Send + 'static,
{
    /// Wrap an upgraded stream. Allocates the connection id and send buffer.
    pub fn new(
        hub: HubHandle,
        stream: S,
        user_id: Option<UserId>,
        settings: &ConnectionSettings,
    ) -> Self {
        let (conn, send_rx) = Connection::new(user_id, settings.send_buffer_capacity);
        Self {
            conn,
            send_rx,
            hub,
            stream,
            keepalive: Keepalive::from(settings),
        }
    }

    /// The hub-facing connection handle.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Register with the hub, then start both pumps.
    ///
    /// Fails only if the hub has stopped, in which case the stream is
    /// dropped without serving.
    pub async fn serve(self) -> Result<ClientTasks> {
        self.hub.register(self.conn.clone()).await?;

        let span = info_span!("client", conn_id = %self.conn.id(), user = %self.conn.user_label());
        let (sink, stream) = self.stream.split();
        let writer_done = CancellationToken::new();

        let writer = {
            let guard = writer_done.clone().drop_guard();
            let pump = write_pump(self.conn.clone(), sink, self.send_rx, self.keepalive);
            tokio::spawn(
                async move {
                    let exit = pump.await;
                    drop(guard);
                    exit
                }
                .instrument(span.clone()),
            )
        };
        let reader = tokio::spawn(
            read_pump(self.conn, self.hub, stream, self.keepalive, writer_done).instrument(span),
        );

        Ok(ClientTasks { writer, reader })
    }
}
