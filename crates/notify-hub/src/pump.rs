//! The two per-connection tasks.
//!
//! The write pump is the only writer on a stream and the read pump the only
//! reader. Both are generic over the transport so any framed WebSocket
//! half works: tokio-tungstenite's split stream directly, or an adapter over
//! another server's socket type.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::hub::HubHandle;
use crate::keepalive::Keepalive;

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The hub closed the send buffer; a close frame was sent.
    BufferClosed,
    /// A frame write missed the write deadline.
    WriteTimeout,
    /// Nothing arrived from the peer within the liveness deadline.
    ReadTimeout,
    /// The peer sent a close frame.
    PeerClosed,
    /// The transport ended without a close frame.
    StreamEnded,
    /// The peer sent a message above the size limit.
    MessageTooLarge {
        /// Size of the offending message in bytes.
        size: usize,
    },
    /// The write side stopped first.
    WriterStopped,
    /// The transport reported an error.
    Transport(String),
    /// The pump task panicked or was cancelled.
    Aborted(String),
}

impl PumpExit {
    /// Whether this exit is worth a warning rather than a debug line.
    pub fn is_abnormal(&self) -> bool {
        !matches!(
            self,
            Self::BufferClosed | Self::PeerClosed | Self::StreamEnded | Self::WriterStopped
        )
    }
}

/// Drain the send buffer into `sink` and keep the peer alive with pings.
///
/// Each queued payload becomes one text frame. When the buffer closes, a
/// close frame is sent and the pump returns. Any write that misses
/// `keepalive.write_wait` ends the pump.
pub async fn write_pump<W>(
    conn: Arc<Connection>,
    mut sink: W,
    mut send_rx: mpsc::Receiver<Utf8Bytes>,
    keepalive: Keepalive,
) -> PumpExit
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let period = keepalive.ping_period();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            payload = send_rx.recv() => {
                let Some(payload) = payload else {
                    let _ = write_frame(&mut sink, Message::Close(None), keepalive.write_wait).await;
                    break PumpExit::BufferClosed;
                };
                if let Err(exit) = write_frame(&mut sink, Message::Text(payload), keepalive.write_wait).await {
                    break exit;
                }
            }
            _ = ticker.tick() => {
                trace!("sending ping");
                if let Err(exit) = write_frame(&mut sink, Message::Ping(Default::default()), keepalive.write_wait).await {
                    break exit;
                }
            }
        }
    };

    let _ = timeout(keepalive.write_wait, sink.close()).await;
    log_exit("write", &conn, &exit);
    exit
}

async fn write_frame<W>(sink: &mut W, msg: Message, wait: Duration) -> Result<(), PumpExit>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(wait, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PumpExit::Transport(e.to_string())),
        Err(_) => Err(PumpExit::WriteTimeout),
    }
}

/// Read from the peer until it closes, errors, goes quiet, or oversteps the
/// size limit, then unregister the connection.
///
/// Every inbound frame resets the liveness deadline. Application messages
/// from the peer are discarded. Unregistration happens exactly once, on
/// every exit path.
pub async fn read_pump<R, E>(
    conn: Arc<Connection>,
    hub: HubHandle,
    mut stream: R,
    keepalive: Keepalive,
    writer_done: CancellationToken,
) -> PumpExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let exit = loop {
        let next = tokio::select! {
            () = writer_done.cancelled() => break PumpExit::WriterStopped,
            next = timeout(keepalive.pong_wait, stream.next()) => next,
        };
        let msg = match next {
            Err(_) => break PumpExit::ReadTimeout,
            Ok(None) => break PumpExit::StreamEnded,
            Ok(Some(Err(e))) => break PumpExit::Transport(e.to_string()),
            Ok(Some(Ok(msg))) => msg,
        };

        let size = msg.len();
        if size > keepalive.max_message_size {
            break PumpExit::MessageTooLarge { size };
        }
        match msg {
            Message::Close(frame) => {
                debug!(?frame, "peer sent close");
                break PumpExit::PeerClosed;
            }
            Message::Pong(_) => trace!("pong received"),
            Message::Ping(_) => trace!("ping received"),
            Message::Text(_) | Message::Binary(_) => {
                debug!(size, "discarding inbound message");
            }
            Message::Frame(_) => {}
        }
    };

    log_exit("read", &conn, &exit);
    if hub.unregister(conn.clone()).await.is_err() {
        debug!(conn_id = %conn.id(), "hub already stopped, skipping unregister");
    }
    exit
}

fn log_exit(side: &str, conn: &Connection, exit: &PumpExit) {
    if exit.is_abnormal() {
        warn!(conn_id = %conn.id(), side, ?exit, "pump stopped");
    } else {
        debug!(conn_id = %conn.id(), side, ?exit, "pump stopped");
    }
}
