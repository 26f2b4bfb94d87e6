//! Module `state`
//!
//! Defines the `Session` struct holding per-connection state: the mounted
//! volume, a pending rename and the table of open file descriptors.

use std::collections::HashMap;
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{SessionError, StorageError};
use crate::storage::OpenFlags;

/// A file opened through OPEN, owned by the session's fd table.
#[derive(Debug)]
pub struct OpenFile {
    pub file: File,
    pub path: String,
    pub flags: OpenFlags,
}

/// Represents the state of a connected SDK client.
#[derive(Debug)]
pub struct Session {
    client_addr: Option<SocketAddr>,
    volume: Option<String>,
    volume_root: Option<PathBuf>,
    rename_from: Option<String>,
    open_files: HashMap<u64, OpenFile>,
    next_fd: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            client_addr: None,
            volume: None,
            volume_root: None,
            rename_from: None,
            open_files: HashMap::new(),
            next_fd: 1,
        }
    }
}

impl Session {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr: Some(client_addr),
            ..Self::default()
        }
    }

    /// Binds the session to a volume. Open files of a previous volume are
    /// dropped.
    pub fn mount(&mut self, volume: &str, volume_root: PathBuf) {
        self.open_files.clear();
        self.rename_from = None;
        self.volume = Some(volume.to_string());
        self.volume_root = Some(volume_root);
    }

    /// Resets the session, closing every open file.
    pub fn unmount(&mut self) {
        self.volume = None;
        self.volume_root = None;
        self.rename_from = None;
        self.open_files.clear();
    }

    // --------------------
    // Getter methods
    // --------------------

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    pub fn volume(&self) -> Option<&str> {
        self.volume.as_deref()
    }

    /// Root directory of the mounted volume
    pub fn volume_root(&self) -> Result<&Path, SessionError> {
        self.volume_root.as_deref().ok_or(SessionError::NotMounted)
    }

    pub fn client_addr(&self) -> Option<&SocketAddr> {
        self.client_addr.as_ref()
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    // --------------------
    // Rename sequence
    // --------------------

    pub fn set_rename_from(&mut self, path: String) {
        self.rename_from = Some(path);
    }

    pub fn take_rename_from(&mut self) -> Option<String> {
        self.rename_from.take()
    }

    // --------------------
    // File descriptor table
    // --------------------

    /// Registers an open file and returns its descriptor. Descriptors are
    /// never reused within a session.
    pub fn alloc_fd(&mut self, file: OpenFile) -> u64 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open_files.insert(fd, file);
        fd
    }

    pub fn file_mut(&mut self, fd: u64) -> Result<&mut OpenFile, StorageError> {
        self.open_files
            .get_mut(&fd)
            .ok_or(StorageError::BadDescriptor(fd))
    }

    pub fn release_fd(&mut self, fd: u64) -> Result<OpenFile, StorageError> {
        self.open_files
            .remove(&fd)
            .ok_or(StorageError::BadDescriptor(fd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_file(dir: &Path) -> OpenFile {
        OpenFile {
            file: File::create(dir.join("f")).unwrap(),
            path: "/f".into(),
            flags: OpenFlags::write_only().with_create(),
        }
    }

    #[test]
    fn unmounted_session_has_no_root() {
        let session = Session::default();
        assert!(!session.is_mounted());
        assert!(matches!(session.volume_root(), Err(SessionError::NotMounted)));
    }

    #[test]
    fn fds_are_monotonic_and_released_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = Session::default();
        session.mount("ltptest", tmp.path().to_path_buf());

        let a = session.alloc_fd(open_file(tmp.path()));
        let b = session.alloc_fd(open_file(tmp.path()));
        assert_eq!((a, b), (1, 2));
        assert!(session.file_mut(a).is_ok());

        session.release_fd(a).unwrap();
        assert!(matches!(session.release_fd(a), Err(StorageError::BadDescriptor(1))));
        assert_eq!(session.alloc_fd(open_file(tmp.path())), 3);
    }

    #[test]
    fn unmount_drops_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = Session::default();
        session.mount("ltptest", tmp.path().to_path_buf());
        session.alloc_fd(open_file(tmp.path()));
        session.set_rename_from("/a".into());

        session.unmount();
        assert!(!session.is_mounted());
        assert_eq!(session.open_file_count(), 0);
        assert_eq!(session.take_rename_from(), None);
    }
}
