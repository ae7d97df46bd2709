//! The dispatch loop and its handle.
//!
//! [`Hub::run`] is the only place the [`Registry`] is written. Everything else
//! talks to it through [`HubHandle`], which enqueues onto three bounded
//! intakes: registration, unregistration and broadcast dispatch. Fan-out
//! takes the registry's read lock so queries from other tasks can proceed
//! concurrently.

use std::sync::Arc;

use notify_core::{ConnectionId, Envelope, HubError, Result, UserId};
use notify_settings::HubSettings;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, SendOutcome};
use crate::registry::Registry;

/// The dispatch loop. Construct with [`Hub::new`], then spawn [`Hub::run`].
pub struct Hub {
    registry: Arc<RwLock<Registry>>,
    register_rx: mpsc::Receiver<Arc<Connection>>,
    unregister_rx: mpsc::Receiver<Arc<Connection>>,
    broadcast_rx: mpsc::Receiver<Envelope>,
}

/// Cloneable entry point for producers and transports.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Arc<Connection>>,
    unregister_tx: mpsc::Sender<Arc<Connection>>,
    broadcast_tx: mpsc::Sender<Envelope>,
    registry: Arc<RwLock<Registry>>,
}

impl Hub {
    /// Create the loop and its first handle.
    pub fn new(settings: &HubSettings) -> (Self, HubHandle) {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let (register_tx, register_rx) = mpsc::channel(settings.intake_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(settings.intake_capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(settings.broadcast_capacity);

        let hub = Self {
            registry: registry.clone(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            registry,
        };
        (hub, handle)
    }

    /// Process intake events until `shutdown` fires or every handle is dropped.
    ///
    /// On exit every remaining connection's send buffer is closed so its write
    /// pump sends a close frame. This includes connections whose registration
    /// was still queued.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("hub dispatch loop started");
        loop {
            // Registrations drain before unregistrations and dispatches that
            // were enqueued after them.
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("hub shutdown requested");
                    break;
                }
                conn = self.register_rx.recv() => match conn {
                    Some(conn) => self.register(conn).await,
                    None => break,
                },
                conn = self.unregister_rx.recv() => match conn {
                    Some(conn) => self.unregister(&conn).await,
                    None => break,
                },
                envelope = self.broadcast_rx.recv() => match envelope {
                    Some(envelope) => self.dispatch(&envelope).await,
                    None => break,
                },
            }
        }
        self.close_all().await;
    }

    async fn register(&self, conn: Arc<Connection>) {
        let fresh = self.registry.write().await.insert(conn.clone());
        if !fresh {
            warn!(conn_id = %conn.id(), "connection registered twice");
        }
        info!(conn_id = %conn.id(), user = %conn.user_label(), "client registered");
    }

    async fn unregister(&self, conn: &Arc<Connection>) {
        let mut registry = self.registry.write().await;
        if registry.remove(conn) {
            let _ = conn.close();
            drop(registry);
            info!(
                conn_id = %conn.id(),
                user = %conn.user_label(),
                dropped = conn.drop_count(),
                connected_for = ?conn.age(),
                "client unregistered"
            );
        } else {
            debug!(conn_id = %conn.id(), "unregister for inactive client ignored");
        }
    }

    async fn dispatch(&self, envelope: &Envelope) {
        let text = match envelope.encode() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                error!(event_type = %envelope.event_type, error = %e, "failed to serialize envelope");
                return;
            }
        };

        let registry = self.registry.read().await;
        let (recipients, dropped) = match envelope.user_id {
            Some(user) => fan_out(registry.user_connections(&user).iter(), &text, envelope),
            None => fan_out(registry.connections(), &text, envelope),
        };
        debug!(
            event_type = %envelope.event_type,
            targeted = envelope.is_targeted(),
            recipients,
            dropped,
            "dispatched envelope"
        );
    }

    async fn close_all(&mut self) {
        // Registrations still queued never became active but their write
        // pumps are already running.
        self.register_rx.close();
        let mut pending = 0_usize;
        while let Ok(conn) = self.register_rx.try_recv() {
            let _ = conn.close();
            pending += 1;
        }

        let drained = self.registry.write().await.drain();
        for conn in &drained {
            let _ = conn.close();
        }
        info!(closed = drained.len(), pending, "hub dispatch loop stopped");
    }
}

/// Non-blocking hand-off to each target. Returns `(queued, dropped)`.
fn fan_out<'a>(
    targets: impl Iterator<Item = &'a Arc<Connection>>,
    text: &Utf8Bytes,
    envelope: &Envelope,
) -> (usize, usize) {
    let mut queued = 0;
    let mut dropped = 0;
    for conn in targets {
        match conn.try_send(text.clone()) {
            SendOutcome::Queued => queued += 1,
            SendOutcome::Full => {
                dropped += 1;
                warn!(
                    conn_id = %conn.id(),
                    event_type = %envelope.event_type,
                    "client buffer full, dropping message"
                );
            }
            SendOutcome::Closed => {
                debug!(conn_id = %conn.id(), "send buffer closed, skipping");
            }
        }
    }
    (queued, dropped)
}

impl HubHandle {
    /// Submit a connection to the registration intake.
    ///
    /// Must be called exactly once per connection; the hub does not
    /// deduplicate.
    pub async fn register(&self, conn: Arc<Connection>) -> Result<()> {
        self.register_tx
            .send(conn)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Submit a connection to the unregistration intake. Safe to repeat.
    pub async fn unregister(&self, conn: Arc<Connection>) -> Result<()> {
        self.unregister_tx
            .send(conn)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Send `payload` to every active connection of `user_id`.
    ///
    /// Waits only for room in the dispatch queue. Failures are logged, never
    /// returned.
    pub async fn broadcast_to_user<P>(
        &self,
        user_id: UserId,
        event_type: impl Into<String>,
        payload: &P,
    ) where
        P: Serialize + ?Sized,
    {
        let event_type = event_type.into();
        if let Some(payload) = to_payload(&event_type, payload) {
            self.broadcast(Envelope::to_user(user_id, event_type, payload))
                .await;
        }
    }

    /// Send `payload` to every active connection.
    pub async fn broadcast_to_all<P>(&self, event_type: impl Into<String>, payload: &P)
    where
        P: Serialize + ?Sized,
    {
        let event_type = event_type.into();
        if let Some(payload) = to_payload(&event_type, payload) {
            self.broadcast(Envelope::to_all(event_type, payload)).await;
        }
    }

    /// Enqueue a prebuilt envelope on the dispatch queue.
    pub async fn broadcast(&self, envelope: Envelope) {
        if let Err(e) = self.broadcast_tx.send(envelope).await {
            warn!(event_type = %e.0.event_type, "hub closed, dropping broadcast");
        }
    }

    /// Number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Number of distinct users with at least one active connection.
    pub async fn user_count(&self) -> usize {
        self.registry.read().await.user_count()
    }

    /// Number of active connections owned by `user`.
    pub async fn user_connection_count(&self, user: &UserId) -> usize {
        self.registry.read().await.user_connections(user).len()
    }

    /// Active connections owned by `user`, in registration order.
    pub async fn user_connections(&self, user: &UserId) -> Vec<Arc<Connection>> {
        self.registry.read().await.user_connections(user).to_vec()
    }

    /// Whether the connection `id` is currently active.
    pub async fn is_active(&self, id: &ConnectionId) -> bool {
        self.registry.read().await.contains(id)
    }
}

fn to_payload<P: Serialize + ?Sized>(event_type: &str, payload: &P) -> Option<serde_json::Value> {
    match serde_json::to_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            error!(event_type, error = %e, "failed to serialize payload, dropping broadcast");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::{Value, json};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn_hub() -> (HubHandle, CancellationToken, JoinHandle<()>) {
        let (hub, handle) = Hub::new(&HubSettings::default());
        let token = CancellationToken::new();
        let task = tokio::spawn(hub.run(token.clone()));
        (handle, token, task)
    }

    async fn wait_for_count(hub: &HubHandle, expected: usize) {
        timeout(WAIT, async {
            while hub.connection_count().await != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection count not reached");
    }

    async fn recv_envelope(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Envelope {
        let text = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("send buffer closed");
        Envelope::decode(text.as_str()).unwrap()
    }

    #[test]
    fn new_hub_uses_configured_capacities() {
        let settings = HubSettings {
            broadcast_capacity: 7,
            intake_capacity: 3,
        };
        let (_hub, handle) = Hub::new(&settings);
        assert_eq!(handle.broadcast_tx.max_capacity(), 7);
        assert_eq!(handle.register_tx.max_capacity(), 3);
        assert_eq!(handle.unregister_tx.max_capacity(), 3);
    }

    #[tokio::test]
    async fn register_adds_to_set_and_index() {
        let (hub, _token, _task) = spawn_hub();
        let user = UserId::random();
        let (conn, _rx) = Connection::new(Some(user), 8);
        hub.register(conn.clone()).await.unwrap();
        wait_for_count(&hub, 1).await;
        assert!(hub.is_active(&conn.id()).await);
        assert_eq!(hub.user_connection_count(&user).await, 1);
    }

    #[tokio::test]
    async fn anonymous_connection_not_indexed() {
        let (hub, _token, _task) = spawn_hub();
        let (conn, _rx) = Connection::new(None, 8);
        hub.register(conn).await.unwrap();
        wait_for_count(&hub, 1).await;
        assert_eq!(hub.registry.read().await.user_count(), 0);
    }

    #[tokio::test]
    async fn unregister_removes_and_closes_buffer() {
        let (hub, _token, _task) = spawn_hub();
        let user = UserId::random();
        let (conn, mut rx) = Connection::new(Some(user), 8);
        hub.register(conn.clone()).await.unwrap();
        wait_for_count(&hub, 1).await;

        hub.unregister(conn.clone()).await.unwrap();
        wait_for_count(&hub, 0).await;
        assert_eq!(hub.user_connection_count(&user).await, 0);
        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let (hub, _token, _task) = spawn_hub();
        let user = UserId::random();
        let (a, _rx_a) = Connection::new(Some(user), 8);
        let (b, mut rx_b) = Connection::new(Some(user), 8);
        let (stranger, _rx_s) = Connection::new(Some(user), 8);
        hub.register(a.clone()).await.unwrap();
        hub.register(b.clone()).await.unwrap();
        wait_for_count(&hub, 2).await;

        hub.unregister(a.clone()).await.unwrap();
        hub.unregister(a.clone()).await.unwrap();
        hub.unregister(stranger.clone()).await.unwrap();
        wait_for_count(&hub, 1).await;

        // Unregistrations take priority over dispatch, so once this arrives
        // the repeats have been applied.
        hub.broadcast_to_all("flush", &json!(null)).await;
        assert_eq!(recv_envelope(&mut rx_b).await.event_type, "flush");

        let remaining = hub.user_connections(&user).await;
        assert_eq!(remaining.len(), 1);
        assert!(Arc::ptr_eq(&remaining[0], &b));
        assert!(!stranger.is_closed());
    }

    #[tokio::test]
    async fn broadcast_to_user_reaches_only_that_user() {
        let (hub, _token, _task) = spawn_hub();
        let u1 = UserId::random();
        let u2 = UserId::random();
        let (a, mut rx_a) = Connection::new(Some(u1), 8);
        let (b, mut rx_b) = Connection::new(Some(u1), 8);
        let (c, mut rx_c) = Connection::new(Some(u2), 8);
        let (anon, mut rx_anon) = Connection::new(None, 8);
        for conn in [a, b, c, anon] {
            hub.register(conn).await.unwrap();
        }
        wait_for_count(&hub, 4).await;

        hub.broadcast_to_user(u1, "price_update", &json!({"symbol": "BTC"}))
            .await;
        for rx in [&mut rx_a, &mut rx_b] {
            let env = recv_envelope(rx).await;
            assert_eq!(env.event_type, "price_update");
            assert_eq!(env.user_id, Some(u1));
            assert_eq!(env.payload["symbol"], "BTC");
        }

        // Per-connection FIFO: if the targeted message had reached c or anon,
        // it would arrive before this one.
        hub.broadcast_to_all("maintenance", &json!({"msg": "restart"}))
            .await;
        for rx in [&mut rx_c, &mut rx_anon, &mut rx_a, &mut rx_b] {
            let env = recv_envelope(rx).await;
            assert_eq!(env.event_type, "maintenance");
            assert_eq!(env.user_id, None);
        }
    }

    #[tokio::test]
    async fn broadcast_to_all_omits_user_id_on_wire() {
        let (hub, _token, _task) = spawn_hub();
        let (conn, mut rx) = Connection::new(None, 8);
        hub.register(conn).await.unwrap();
        wait_for_count(&hub, 1).await;

        hub.broadcast_to_all("maintenance", &json!({"msg": "restart"}))
            .await;
        let text = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let raw: Value = serde_json::from_str(text.as_str()).unwrap();
        assert!(raw.get("user_id").is_none());
        assert_eq!(raw["payload"]["msg"], "restart");
    }

    #[tokio::test]
    async fn broadcast_to_user_without_connections_is_noop() {
        let (hub, _token, task) = spawn_hub();
        hub.broadcast_to_user(UserId::random(), "order_filled", &json!({}))
            .await;

        let (conn, mut rx) = Connection::new(None, 8);
        hub.register(conn).await.unwrap();
        wait_for_count(&hub, 1).await;
        hub.broadcast_to_all("after", &json!(null)).await;
        assert_eq!(recv_envelope(&mut rx).await.event_type, "after");
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn full_buffer_drops_for_that_recipient_only() {
        let (hub, _token, _task) = spawn_hub();
        let (slow, mut slow_rx) = Connection::new(None, 1);
        let (fast, mut fast_rx) = Connection::new(None, 8);
        hub.register(slow.clone()).await.unwrap();
        hub.register(fast).await.unwrap();
        wait_for_count(&hub, 2).await;

        hub.broadcast_to_all("first", &json!(1)).await;
        hub.broadcast_to_all("second", &json!(2)).await;

        assert_eq!(recv_envelope(&mut fast_rx).await.event_type, "first");
        assert_eq!(recv_envelope(&mut fast_rx).await.event_type, "second");

        timeout(WAIT, async {
            while slow.drop_count() != 1 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slow client should drop exactly one message");
        assert_eq!(recv_envelope(&mut slow_rx).await.event_type, "first");
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unserializable_payload_is_dropped() {
        let (hub, _token, _task) = spawn_hub();
        let (conn, mut rx) = Connection::new(None, 8);
        hub.register(conn).await.unwrap();
        wait_for_count(&hub, 1).await;

        // Non-string map keys cannot become JSON.
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        let _ = bad.insert((1, 2), 3);
        hub.broadcast_to_all("bad", &bad).await;
        hub.broadcast_to_all("good", &json!({"ok": true})).await;

        assert_eq!(recv_envelope(&mut rx).await.event_type, "good");
    }

    #[tokio::test]
    async fn shutdown_closes_every_connection() {
        let (hub, token, task) = spawn_hub();
        let (a, mut rx_a) = Connection::new(Some(UserId::random()), 8);
        let (b, mut rx_b) = Connection::new(None, 8);
        hub.register(a.clone()).await.unwrap();
        hub.register(b.clone()).await.unwrap();
        wait_for_count(&hub, 2).await;

        token.cancel();
        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(a.is_closed() && b.is_closed());
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_closes_queued_registrations() {
        let (hub, handle) = Hub::new(&HubSettings::default());
        let token = CancellationToken::new();
        let (conn, mut rx) = Connection::new(Some(UserId::random()), 4);
        handle.register(conn.clone()).await.unwrap();

        token.cancel();
        timeout(WAIT, hub.run(token)).await.unwrap();
        assert!(conn.is_closed());
        assert!(rx.recv().await.is_none());
        assert!(!handle.is_active(&conn.id()).await);
        assert_matches!(handle.register(conn).await, Err(HubError::Closed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_leave_registry_empty() {
        let settings = HubSettings {
            broadcast_capacity: 2,
            intake_capacity: 4,
        };
        let (hub, handle) = Hub::new(&settings);
        let token = CancellationToken::new();
        let hub_task = tokio::spawn(hub.run(token.clone()));
        let users: Vec<UserId> = (0..4).map(|_| UserId::random()).collect();

        let producers: Vec<_> = (0..16_usize)
            .map(|i| {
                let handle = handle.clone();
                let user = users[i % users.len()];
                tokio::spawn(async move {
                    for n in 0..50_u32 {
                        let owner = (n % 5 != 0).then_some(user);
                        let (conn, _rx) = Connection::new(owner, 1);
                        handle.register(conn.clone()).await.unwrap();
                        handle
                            .broadcast_to_user(user, "order_filled", &json!({"producer": i, "n": n}))
                            .await;
                        handle.broadcast_to_all("tick", &json!(n)).await;
                        handle.unregister(conn).await.unwrap();
                    }
                })
            })
            .collect();

        let results = timeout(Duration::from_secs(10), futures::future::join_all(producers))
            .await
            .expect("producers stalled");
        for result in results {
            result.unwrap();
        }

        wait_for_count(&handle, 0).await;
        assert_eq!(handle.user_count().await, 0);
        assert!(!hub_task.is_finished());
        token.cancel();
        timeout(WAIT, hub_task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_hub_rejects_registration() {
        let (hub, token, task) = spawn_hub();
        token.cancel();
        timeout(WAIT, task).await.unwrap().unwrap();

        let (conn, _rx) = Connection::new(None, 1);
        assert_matches!(hub.register(conn.clone()).await, Err(HubError::Closed));
        assert_matches!(hub.unregister(conn).await, Err(HubError::Closed));
        // Broadcasts never surface the failure.
        hub.broadcast_to_all("late", &json!(null)).await;
    }

    #[tokio::test]
    async fn loop_exits_when_handles_dropped() {
        let (hub, handle) = Hub::new(&HubSettings::default());
        let task = tokio::spawn(hub.run(CancellationToken::new()));
        drop(handle);
        timeout(WAIT, task).await.unwrap().unwrap();
    }
}
