//! # notify-hub
//!
//! The connection registry and broadcast engine.
//!
//! - [`Hub`]: the single dispatch loop that owns every registry mutation.
//!   Registration, unregistration and broadcasts reach it through bounded
//!   intake queues; fan-out reads the registry under a shared lock.
//! - [`HubHandle`]: cloneable producer/transport API
//!   (`register`, `unregister`, `broadcast_to_user`, `broadcast_to_all`).
//! - [`Connection`]: the registry-facing half of a client (id, optional user,
//!   bounded send buffer).
//! - [`Client`]: owns the stream and runs the read and write pumps with
//!   keepalive timing.
//!
//! Delivery is best-effort: a full send buffer drops the message for that
//! recipient only, and a dead stream is silently unregistered.

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod hub;
pub mod keepalive;
pub mod pump;
pub mod registry;

pub use client::{Client, ClientTasks};
pub use connection::{Connection, SendOutcome};
pub use hub::{Hub, HubHandle};
pub use keepalive::Keepalive;
pub use pump::PumpExit;
pub use registry::Registry;

pub use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
