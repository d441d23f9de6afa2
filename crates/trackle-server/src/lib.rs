//! Webhook receiver. Accepts provider push notifications, acknowledges
//! them immediately, and spools the raw payload to disk; the store is
//! never touched from the request path.

pub mod server;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
