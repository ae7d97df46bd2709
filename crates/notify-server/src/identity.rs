//! Who is on the other end of an upgrade request.
//!
//! Authentication is out of scope for the hub, so resolution is a seam: the
//! server asks an [`IdentityResolver`] for an optional [`UserId`] before the
//! upgrade completes. `None` means the connection only receives broadcasts to
//! everyone.

use std::collections::HashMap;

use axum::http::HeaderMap;
use notify_core::UserId;
use tracing::debug;

/// Maps an upgrade request to an owning user.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the caller. `query` holds the decoded query string pairs.
    fn resolve(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> Option<UserId>;
}

/// Every connection is anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl IdentityResolver for Anonymous {
    fn resolve(&self, _headers: &HeaderMap, _query: &HashMap<String, String>) -> Option<UserId> {
        None
    }
}

/// Takes the user id from a query parameter, unauthenticated.
///
/// For development and tests only: any caller can claim any id.
#[derive(Debug, Clone)]
pub struct QueryParamResolver {
    param: String,
}

impl QueryParamResolver {
    /// Read the user id from `param`.
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl Default for QueryParamResolver {
    fn default() -> Self {
        Self::new("user_id")
    }
}

impl IdentityResolver for QueryParamResolver {
    fn resolve(&self, _headers: &HeaderMap, query: &HashMap<String, String>) -> Option<UserId> {
        let raw = query.get(&self.param)?;
        match raw.parse() {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(param = %self.param, value = %raw, error = %e, "ignoring malformed user id");
                None
            }
        }
    }
}
