//! Error types
//!
//! Defines domain-specific error types for each module of the file store.

use std::fmt;
use std::io;

/// Storage module errors
#[derive(Debug)]
pub enum StorageError {
    FileNotFound(String),
    DirectoryNotFound(String),
    PermissionDenied(String),
    InvalidPath(String),
    FileAlreadyExists(String),
    NotADirectory(String),
    IsADirectory(String),
    DirectoryNotEmpty(String),
    PathTraversal(String),
    BadDescriptor(u64),
    Busy(String),
    IoError(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::FileNotFound(p) => write!(f, "File not found: {}", p),
            StorageError::DirectoryNotFound(p) => write!(f, "Directory not found: {}", p),
            StorageError::PermissionDenied(p) => write!(f, "Permission denied: {}", p),
            StorageError::InvalidPath(p) => write!(f, "Invalid path: {}", p),
            StorageError::FileAlreadyExists(p) => write!(f, "File already exists: {}", p),
            StorageError::NotADirectory(p) => write!(f, "Not a directory: {}", p),
            StorageError::IsADirectory(p) => write!(f, "Is a directory: {}", p),
            StorageError::DirectoryNotEmpty(p) => write!(f, "Directory not empty: {}", p),
            StorageError::PathTraversal(p) => write!(f, "Path traversal attempt: {}", p),
            StorageError::BadDescriptor(fd) => write!(f, "Bad file descriptor: {}", fd),
            StorageError::Busy(p) => write!(f, "Resource busy: {}", p),
            StorageError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(error: io::Error) -> Self {
        StorageError::IoError(error)
    }
}

/// Wire protocol errors, raised on either end of a connection
#[derive(Debug)]
pub enum ProtocolError {
    UnknownCommand(String),
    Syntax(String),
    CommandTooLong(usize),
    PayloadTooLarge { declared: usize, limit: usize },
    MalformedReply(String),
    InvalidStat(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownCommand(c) => write!(f, "Unknown command: {}", c),
            ProtocolError::Syntax(s) => write!(f, "Syntax error: {}", s),
            ProtocolError::CommandTooLong(n) => write!(f, "Command too long: {} bytes", n),
            ProtocolError::PayloadTooLarge { declared, limit } => {
                write!(f, "Payload of {} bytes exceeds limit of {}", declared, limit)
            }
            ProtocolError::MalformedReply(r) => write!(f, "Malformed reply: {}", r),
            ProtocolError::InvalidStat(s) => write!(f, "Invalid stat record: {}", s),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Server-side session errors
#[derive(Debug)]
pub enum SessionError {
    NotMounted,
    UnknownVolume(String),
    TooManySessions(usize),
    InvalidState(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotMounted => write!(f, "No volume mounted"),
            SessionError::UnknownVolume(v) => write!(f, "Unknown volume: {}", v),
            SessionError::TooManySessions(max) => {
                write!(f, "Too many sessions (limit {})", max)
            }
            SessionError::InvalidState(s) => write!(f, "Invalid session state: {}", s),
        }
    }
}

impl std::error::Error for SessionError {}

/// SDK client errors
#[derive(Debug)]
pub enum ClientError {
    InvalidPath(StorageError),
    Connect(String, io::Error),
    Io(io::Error),
    Timeout(String),
    Closed,
    Refused {
        code: u16,
        errno: Option<crate::error::Errno>,
        message: String,
    },
    Protocol(ProtocolError),
    Config(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::InvalidPath(e) => write!(f, "{}", e),
            ClientError::Connect(addr, e) => write!(f, "Failed to connect to {}: {}", addr, e),
            ClientError::Io(e) => write!(f, "Connection I/O error: {}", e),
            ClientError::Timeout(op) => write!(f, "Timed out waiting for {}", op),
            ClientError::Closed => write!(f, "Connection closed"),
            ClientError::Refused {
                code,
                errno: Some(errno),
                message,
            } => write!(f, "Request refused ({} {}): {}", code, errno, message),
            ClientError::Refused {
                code,
                errno: None,
                message,
            } => write!(f, "Request refused ({}): {}", code, message),
            ClientError::Protocol(e) => write!(f, "{}", e),
            ClientError::Config(msg) => write!(f, "Invalid client configuration: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(error: io::Error) -> Self {
        ClientError::Io(error)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(error: ProtocolError) -> Self {
        ClientError::Protocol(error)
    }
}

/// General file store error that encompasses all error types
#[derive(Debug)]
pub enum FsError {
    Storage(StorageError),
    Protocol(ProtocolError),
    Session(SessionError),
    Client(ClientError),
    IoError(io::Error),
    Config(String),
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::Storage(e) => write!(f, "Storage error: {}", e),
            FsError::Protocol(e) => write!(f, "Protocol error: {}", e),
            FsError::Session(e) => write!(f, "Session error: {}", e),
            FsError::Client(e) => write!(f, "Client error: {}", e),
            FsError::IoError(e) => write!(f, "I/O error: {}", e),
            FsError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for FsError {}

impl From<StorageError> for FsError {
    fn from(error: StorageError) -> Self {
        FsError::Storage(error)
    }
}

impl From<ProtocolError> for FsError {
    fn from(error: ProtocolError) -> Self {
        FsError::Protocol(error)
    }
}

impl From<SessionError> for FsError {
    fn from(error: SessionError) -> Self {
        FsError::Session(error)
    }
}

impl From<ClientError> for FsError {
    fn from(error: ClientError) -> Self {
        FsError::Client(error)
    }
}

impl From<io::Error> for FsError {
    fn from(error: io::Error) -> Self {
        FsError::IoError(error)
    }
}

impl From<config::ConfigError> for FsError {
    fn from(error: config::ConfigError) -> Self {
        FsError::Config(error.to_string())
    }
}
