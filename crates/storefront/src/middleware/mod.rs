//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request span with a `request_id` field)
//! 3. Request ID (records the id on that span)
//! 4. Session lock (one request at a time per session cookie)
//! 5. Session layer (tower-sessions over a bounded moka store)

pub mod request_id;
pub mod session;
pub mod session_lock;

pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
pub use session::{SESSION_COOKIE_NAME, create_session_layer, create_session_store};
pub use session_lock::{SessionLocks, session_lock_middleware};
