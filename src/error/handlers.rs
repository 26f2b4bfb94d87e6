//! Error handlers
//!
//! Maps internal errors onto protocol replies and errno tokens.

use std::fmt;
use std::io;
use std::str::FromStr;

use crate::error::types::{FsError, ProtocolError, SessionError, StorageError};
use crate::protocol::responses::{self, Reply};
use log::error;

/// POSIX-style error classes carried in every negative reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    ENOENT,
    EEXIST,
    ENOTDIR,
    EISDIR,
    ENOTEMPTY,
    EINVAL,
    EBADF,
    EACCES,
    EBUSY,
    EIO,
}

impl Errno {
    pub fn as_str(&self) -> &'static str {
        match self {
            Errno::ENOENT => "ENOENT",
            Errno::EEXIST => "EEXIST",
            Errno::ENOTDIR => "ENOTDIR",
            Errno::EISDIR => "EISDIR",
            Errno::ENOTEMPTY => "ENOTEMPTY",
            Errno::EINVAL => "EINVAL",
            Errno::EBADF => "EBADF",
            Errno::EACCES => "EACCES",
            Errno::EBUSY => "EBUSY",
            Errno::EIO => "EIO",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Errno {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENOENT" => Ok(Errno::ENOENT),
            "EEXIST" => Ok(Errno::EEXIST),
            "ENOTDIR" => Ok(Errno::ENOTDIR),
            "EISDIR" => Ok(Errno::EISDIR),
            "ENOTEMPTY" => Ok(Errno::ENOTEMPTY),
            "EINVAL" => Ok(Errno::EINVAL),
            "EBADF" => Ok(Errno::EBADF),
            "EACCES" => Ok(Errno::EACCES),
            "EBUSY" => Ok(Errno::EBUSY),
            "EIO" => Ok(Errno::EIO),
            _ => Err(()),
        }
    }
}

fn io_errno(err: &io::Error) -> Errno {
    match err.kind() {
        io::ErrorKind::NotFound => Errno::ENOENT,
        io::ErrorKind::PermissionDenied => Errno::EACCES,
        io::ErrorKind::AlreadyExists => Errno::EEXIST,
        io::ErrorKind::DirectoryNotEmpty => Errno::ENOTEMPTY,
        io::ErrorKind::NotADirectory => Errno::ENOTDIR,
        io::ErrorKind::IsADirectory => Errno::EISDIR,
        _ => Errno::EIO,
    }
}

/// Convert a storage error to reply code and errno
pub fn storage_error_code(err: &StorageError) -> (u16, Errno) {
    let errno = match err {
        StorageError::FileNotFound(_) | StorageError::DirectoryNotFound(_) => Errno::ENOENT,
        StorageError::PermissionDenied(_) => Errno::EACCES,
        StorageError::InvalidPath(_) | StorageError::PathTraversal(_) => Errno::EINVAL,
        StorageError::FileAlreadyExists(_) => Errno::EEXIST,
        StorageError::NotADirectory(_) => Errno::ENOTDIR,
        StorageError::IsADirectory(_) => Errno::EISDIR,
        StorageError::DirectoryNotEmpty(_) => Errno::ENOTEMPTY,
        StorageError::BadDescriptor(_) => Errno::EBADF,
        StorageError::Busy(_) => Errno::EBUSY,
        StorageError::IoError(e) => return (responses::LOCAL_ERROR, io_errno(e)),
    };
    (responses::ACTION_NOT_TAKEN, errno)
}

/// Convert any store error to the reply sent back to the client
pub fn error_to_reply(err: &FsError) -> Reply {
    let (code, errno) = match err {
        FsError::Storage(e) => storage_error_code(e),
        FsError::Protocol(e) => match e {
            ProtocolError::UnknownCommand(_) | ProtocolError::CommandTooLong(_) => {
                (responses::UNKNOWN_COMMAND, Errno::EINVAL)
            }
            ProtocolError::Syntax(_) => (responses::SYNTAX_ERROR, Errno::EINVAL),
            ProtocolError::PayloadTooLarge { .. } => {
                (responses::EXCEEDED_STORAGE, Errno::EINVAL)
            }
            ProtocolError::MalformedReply(_) | ProtocolError::InvalidStat(_) => {
                (responses::SYNTAX_ERROR, Errno::EIO)
            }
        },
        FsError::Session(e) => match e {
            SessionError::NotMounted => (responses::NOT_MOUNTED, Errno::EACCES),
            SessionError::UnknownVolume(_) => (responses::NOT_MOUNTED, Errno::ENOENT),
            SessionError::TooManySessions(_) => (responses::SERVICE_UNAVAILABLE, Errno::EBUSY),
            SessionError::InvalidState(_) => (responses::BAD_SEQUENCE, Errno::EINVAL),
        },
        FsError::Client(_) | FsError::IoError(_) | FsError::Config(_) => {
            (responses::LOCAL_ERROR, Errno::EIO)
        }
    };

    if code == responses::LOCAL_ERROR {
        error!("Store error: {}", err);
    }

    let message = match err {
        FsError::Storage(e) => e.to_string(),
        FsError::Protocol(e) => e.to_string(),
        FsError::Session(e) => e.to_string(),
        other => other.to_string(),
    };
    Reply::error(code, errno, &message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_errno() {
        let (code, errno) = storage_error_code(&StorageError::DirectoryNotEmpty("/a".into()));
        assert_eq!(code, 550);
        assert_eq!(errno, Errno::ENOTEMPTY);

        let (code, errno) = storage_error_code(&StorageError::IoError(io::Error::new(
            io::ErrorKind::NotFound,
            "gone",
        )));
        assert_eq!(code, 451);
        assert_eq!(errno, Errno::ENOENT);
    }

    #[test]
    fn reply_carries_errno_token() {
        let reply = error_to_reply(&FsError::Session(SessionError::NotMounted));
        assert_eq!(reply.code, 530);
        assert_eq!(reply.errno(), Some(Errno::EACCES));
        assert!(reply.to_line().starts_with("530 EACCES "));
    }

    #[test]
    fn errno_parses_back() {
        for errno in [Errno::ENOENT, Errno::EISDIR, Errno::EBUSY] {
            assert_eq!(errno.as_str().parse::<Errno>(), Ok(errno));
        }
        assert!("EWHAT".parse::<Errno>().is_err());
    }
}
