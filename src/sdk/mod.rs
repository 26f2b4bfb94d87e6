//! Client SDK
//!
//! Connects to a store, mounts a volume and exposes file operations.

pub mod connection;
pub mod file_client;

pub use connection::{Request, Response};
pub use file_client::{FileClient, FileHandle};
