//! Server core functionality
//!
//! This module contains the store server: the accept loop and the mount
//! handshake that precedes every session.

pub mod core;

pub use self::core::Server;
