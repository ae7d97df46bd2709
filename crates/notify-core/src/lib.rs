//! # notify-core
//!
//! Foundation types shared by every notification hub crate:
//!
//! - **Branded IDs**: [`ConnectionId`] and [`UserId`] newtypes so a connection
//!   id can never be passed where a user identity is expected
//! - **Envelope**: the [`Envelope`] wire unit (`type`, optional `user_id`,
//!   `payload`)
//! - **Errors**: [`HubError`] via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use envelope::Envelope;
pub use errors::{HubError, Result};
pub use ids::{ConnectionId, UserId};
