//! Per-session request serialization.
//!
//! Requests carrying the same session cookie run one at a time. The lock is
//! taken outside the session layer, so one request's load, handler and save
//! all finish before the next request for that session loads it. Requests
//! without a session cookie start a new session and are not locked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use axum::{
    extract::{Request, State},
    http::header::COOKIE,
    middleware::Next,
    response::Response,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tower_sessions::cookie::Cookie;

use super::session::SESSION_COOKIE_NAME;

/// One async lock per session with a request in flight.
///
/// Entries are weak; a session's lock is freed with its last request and the
/// map is pruned when new sessions arrive.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    slots: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request holds `session_id`.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        self.slot(session_id).lock_owned().await
    }

    /// Number of sessions with a request running or waiting.
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }

    fn slot(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(session_id).and_then(Weak::upgrade) {
            return slot;
        }
        slots.retain(|_, slot| slot.strong_count() > 0);
        let slot = Arc::new(AsyncMutex::new(()));
        slots.insert(session_id.to_owned(), Arc::downgrade(&slot));
        slot
    }
}

/// Session cookie value of `request`, if it sent one.
fn session_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().to_owned())
}

/// Middleware that runs requests of one session one after another.
pub async fn session_lock_middleware(
    State(locks): State<SessionLocks>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = match session_cookie(&request) {
        Some(session_id) => Some(locks.acquire(&session_id).await),
        None => None,
    };
    next.run(request).await
}
