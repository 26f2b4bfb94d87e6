//! Session management
//!
//! Handles store connections: per-session state, the session registry and
//! the request loop.

pub mod handler;
pub mod registry;
pub mod state;

pub use handler::handle_session;
pub use registry::{SessionRegistry, SharedSessionRegistry};
pub use state::{OpenFile, Session};
