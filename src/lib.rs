pub mod config;
pub mod error;
pub mod protocol;
pub mod sdk;
pub mod server;
pub mod session;
pub mod storage;

pub use config::{ClientConfig, FsConfig, StoreConfig};
pub use error::{ClientError, FsError};
pub use sdk::{FileClient, FileHandle};
pub use server::Server;
pub use storage::{DirEntry, OpenFlags, StatInfo};
