//! # notify-server
//!
//! Axum HTTP + `WebSocket` front end for the notification hub.
//!
//! - `GET /ws`: upgrade, resolve the caller's identity, hand the socket to a
//!   hub [`Client`](notify_hub::Client)
//! - `GET /health`: liveness plus connection and user counts
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod health;
pub mod identity;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use identity::{Anonymous, IdentityResolver, QueryParamResolver};
pub use server::{AppState, NotifyServer};
pub use shutdown::ShutdownCoordinator;
