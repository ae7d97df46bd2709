//! Active-connection set plus the user → connections index.
//!
//! Invariant: a connection is listed under its user if and only if it is in
//! the active set and carries a user identity. Each user's list keeps
//! registration order. Only the hub's dispatch loop mutates a `Registry`.

use std::collections::HashMap;
use std::sync::Arc;

use notify_core::{ConnectionId, UserId};

use crate::connection::Connection;

/// Registry of active connections.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ConnectionId, Arc<Connection>>,
    user_conns: HashMap<UserId, Vec<Arc<Connection>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the active set and append it to its user's list.
    ///
    /// Returns `false` if the id was already active. The insert still
    /// happens: double registration is a caller error and is not repaired
    /// here.
    pub fn insert(&mut self, conn: Arc<Connection>) -> bool {
        let fresh = self
            .clients
            .insert(conn.id(), conn.clone())
            .is_none();
        if let Some(user) = conn.user_id() {
            self.user_conns.entry(user).or_default().push(conn);
        }
        fresh
    }

    /// Remove a connection (matched by identity) from the set and its user's
    /// list. Returns `false` if it was not active.
    pub fn remove(&mut self, conn: &Arc<Connection>) -> bool {
        match self.clients.get(&conn.id()) {
            Some(active) if Arc::ptr_eq(active, conn) => {}
            _ => return false,
        }
        let _ = self.clients.remove(&conn.id());

        if let Some(user) = conn.user_id() {
            if let Some(conns) = self.user_conns.get_mut(&user) {
                if let Some(pos) = conns.iter().position(|c| Arc::ptr_eq(c, conn)) {
                    let _ = conns.remove(pos);
                }
                if conns.is_empty() {
                    let _ = self.user_conns.remove(&user);
                }
            }
        }
        true
    }

    /// Remove every connection, returning them.
    pub fn drain(&mut self) -> Vec<Arc<Connection>> {
        self.user_conns.clear();
        self.clients.drain().map(|(_, conn)| conn).collect()
    }

    /// Whether `id` is active.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no connection is active.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of users with at least one active connection.
    pub fn user_count(&self) -> usize {
        self.user_conns.len()
    }

    /// Active connections of `user`, in registration order.
    pub fn user_connections(&self, user: &UserId) -> &[Arc<Connection>] {
        self.user_conns.get(user).map_or(&[], Vec::as_slice)
    }

    /// Every active connection, in no particular order.
    pub fn connections(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.clients.values()
    }
}
