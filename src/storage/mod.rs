//! Volume storage
//!
//! Path validation, status records and the file system operations that back
//! every store request.

pub mod operations;
pub mod results;
pub mod stat;
pub mod validation;

pub use results::{DirEntry, OpenFlags};
pub use stat::{StatInfo, Timestamp};
pub use validation::{MAX_DIRECTORY_DEPTH, normalize_path, resolve_and_validate_path, validate};
