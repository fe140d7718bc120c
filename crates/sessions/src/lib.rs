//! Session identity and the durable session-state store.

pub mod identity;
pub mod store;

pub use identity::{derive_session_id, sanitize_session_id};
pub use store::SessionStore;
