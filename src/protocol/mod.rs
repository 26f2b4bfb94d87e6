//! Store protocol implementation
//!
//! Handles request parsing, dispatch and reply formatting.

pub mod commands;
pub mod handlers;
pub mod responses;

pub use commands::{Command, CommandData, CommandResult, CommandStatus, parse_command};
pub use handlers::{handle_command, handle_mount_command};
pub use responses::{Reply, parse_reply};
