//! Storage operations
//!
//! File system operations behind every store request: make directories,
//! create, append, stat, remove, rename, list and positional I/O. Paths are
//! virtual (`/a/b`) and resolved under the mounted volume's root.

use log::{debug, error, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use crate::error::StorageError;
use crate::storage::results::{DirEntry, OpenFlags};
use crate::storage::stat::StatInfo;
use crate::storage::validation::{resolve_and_validate_path, split_parent, virtual_to_real_path};

const RETRIES: u32 = 3;

/// Runs `op`, retrying transient permission failures with a growing backoff.
fn with_retries<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if attempt < RETRIES && e.kind() == ErrorKind::PermissionDenied => {
                thread::sleep(Duration::from_millis(100 * attempt as u64));
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Checks that the parent of `virtual_path` exists and is a directory.
fn ensure_parent_directory(volume_root: &Path, virtual_path: &str) -> Result<(), StorageError> {
    let Some((parent, _)) = split_parent(virtual_path) else {
        return Err(StorageError::IsADirectory(virtual_path.to_string()));
    };
    let parent_real = virtual_to_real_path(volume_root, parent);

    match fs::metadata(&parent_real) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(StorageError::NotADirectory(parent.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(StorageError::DirectoryNotFound(parent.to_string()))
        }
        Err(e) => Err(StorageError::from(e)),
    }
}

/// Creates a directory and any missing ancestors.
///
/// Succeeds when the directory already exists, including the volume root.
pub fn make_directories(volume_root: &Path, path: &str) -> Result<String, StorageError> {
    let (real_path, virtual_path) = resolve_and_validate_path(volume_root, path)?;

    // Walk down so a file in the middle is reported by its own path
    let mut prefix = String::new();
    for segment in virtual_path.split('/').filter(|s| !s.is_empty()) {
        prefix.push('/');
        prefix.push_str(segment);
        match fs::metadata(virtual_to_real_path(volume_root, &prefix)) {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => return Err(StorageError::NotADirectory(prefix)),
            Err(e) if e.kind() == ErrorKind::NotFound => break,
            Err(e) => return Err(StorageError::from(e)),
        }
    }

    fs::create_dir_all(&real_path).map_err(|e| {
        error!("Failed to create directory {}: {}", virtual_path, e);
        StorageError::from(e)
    })?;

    info!("Created directory {} (real: {})", virtual_path, real_path.display());
    Ok(virtual_path)
}

/// Creates a new file of length `size`. The parent must exist and the
/// target must not.
pub fn create_file(volume_root: &Path, path: &str, size: u64) -> Result<String, StorageError> {
    let (real_path, virtual_path) = resolve_and_validate_path(volume_root, path)?;
    ensure_parent_directory(volume_root, &virtual_path)?;

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&real_path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => StorageError::FileAlreadyExists(virtual_path.clone()),
            _ => StorageError::from(e),
        })?;

    if size > 0 {
        file.set_len(size)?;
    }

    info!(
        "Created file {} ({} bytes, real: {})",
        virtual_path,
        size,
        real_path.display()
    );
    Ok(virtual_path)
}

/// Appends `data` to a file, creating it if needed. Returns the new size.
pub fn append_file(volume_root: &Path, path: &str, data: &[u8]) -> Result<u64, StorageError> {
    let (real_path, virtual_path) = resolve_and_validate_path(volume_root, path)?;
    ensure_parent_directory(volume_root, &virtual_path)?;

    if real_path.is_dir() {
        return Err(StorageError::IsADirectory(virtual_path));
    }

    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&real_path)?;
    file.write_all(data)?;
    file.flush()?;
    let size = file.metadata()?.len();

    debug!(
        "Appended {} bytes to {} (size now {})",
        data.len(),
        virtual_path,
        size
    );
    Ok(size)
}

/// Returns the status of an existing entry
pub fn stat(volume_root: &Path, path: &str) -> Result<StatInfo, StorageError> {
    let (real_path, virtual_path) = resolve_and_validate_path(volume_root, path)?;

    match fs::symlink_metadata(&real_path) {
        Ok(meta) => Ok(StatInfo::from_metadata(&meta)),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::FileNotFound(virtual_path)),
        Err(e) if e.kind() == ErrorKind::NotADirectory => {
            Err(StorageError::FileNotFound(virtual_path))
        }
        Err(e) => Err(StorageError::from(e)),
    }
}

/// Removes a directory. Without `recursive` the directory must be empty.
pub fn remove_directory(
    volume_root: &Path,
    path: &str,
    recursive: bool,
) -> Result<String, StorageError> {
    let (real_path, virtual_path) = resolve_and_validate_path(volume_root, path)?;

    if virtual_path == "/" {
        return Err(StorageError::Busy(virtual_path));
    }

    let meta = match fs::symlink_metadata(&real_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StorageError::DirectoryNotFound(virtual_path));
        }
        Err(e) => return Err(StorageError::from(e)),
    };
    if !meta.is_dir() {
        return Err(StorageError::NotADirectory(virtual_path));
    }

    let result = if recursive {
        with_retries(|| fs::remove_dir_all(&real_path))
    } else {
        if fs::read_dir(&real_path)?.next().is_some() {
            return Err(StorageError::DirectoryNotEmpty(virtual_path));
        }
        with_retries(|| fs::remove_dir(&real_path))
    };

    match result {
        Ok(()) => {
            info!(
                "Removed directory {} (recursive: {}, real: {})",
                virtual_path,
                recursive,
                real_path.display()
            );
            Ok(virtual_path)
        }
        Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
            Err(StorageError::DirectoryNotEmpty(virtual_path))
        }
        Err(e) => {
            error!("Failed to remove directory {}: {}", virtual_path, e);
            Err(StorageError::from(e))
        }
    }
}

/// Deletes a file
pub fn delete_file(volume_root: &Path, path: &str) -> Result<String, StorageError> {
    let (real_path, virtual_path) = resolve_and_validate_path(volume_root, path)?;

    match fs::symlink_metadata(&real_path) {
        Ok(meta) if meta.is_dir() => return Err(StorageError::IsADirectory(virtual_path)),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StorageError::FileNotFound(virtual_path));
        }
        Err(e) => return Err(StorageError::from(e)),
    }

    with_retries(|| fs::remove_file(&real_path)).map_err(|e| {
        error!(
            "Failed to delete file {} (real: {}): {}",
            virtual_path,
            real_path.display(),
            e
        );
        StorageError::from(e)
    })?;

    info!("Deleted file {} (real: {})", virtual_path, real_path.display());
    Ok(virtual_path)
}

/// Moves `from` to `to`, replacing a file at the destination.
pub fn rename(volume_root: &Path, from: &str, to: &str) -> Result<String, StorageError> {
    let (src_real, src_virtual) = resolve_and_validate_path(volume_root, from)?;
    let (dst_real, dst_virtual) = resolve_and_validate_path(volume_root, to)?;

    if src_virtual == "/" || dst_virtual == "/" {
        return Err(StorageError::Busy("/".into()));
    }
    if !src_real.exists() {
        return Err(StorageError::FileNotFound(src_virtual));
    }
    if dst_virtual.starts_with(&format!("{}/", src_virtual)) {
        return Err(StorageError::InvalidPath(format!(
            "Cannot move {} into itself",
            src_virtual
        )));
    }
    ensure_parent_directory(volume_root, &dst_virtual)?;

    fs::rename(&src_real, &dst_real).map_err(|e| match e.kind() {
        ErrorKind::DirectoryNotEmpty => StorageError::DirectoryNotEmpty(dst_virtual.clone()),
        ErrorKind::IsADirectory => StorageError::IsADirectory(dst_virtual.clone()),
        ErrorKind::NotADirectory => StorageError::NotADirectory(dst_virtual.clone()),
        _ => StorageError::from(e),
    })?;

    info!("Renamed {} to {}", src_virtual, dst_virtual);
    Ok(dst_virtual)
}

/// Lists the contents of a directory, sorted by name
pub fn list_directory(volume_root: &Path, path: &str) -> Result<Vec<DirEntry>, StorageError> {
    let (real_path, virtual_path) = resolve_and_validate_path(volume_root, path)?;

    if !real_path.exists() {
        return Err(StorageError::DirectoryNotFound(virtual_path));
    }
    if !real_path.is_dir() {
        return Err(StorageError::NotADirectory(virtual_path));
    }

    let entries = with_retries(|| fs::read_dir(&real_path)).map_err(|e| {
        error!(
            "Failed to list directory {} (real: {}): {}",
            virtual_path,
            real_path.display(),
            e
        );
        StorageError::from(e)
    })?;

    let mut listing = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();

        // Entries vanishing mid-listing are skipped
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|dur| dur.as_secs())
            .unwrap_or(0);

        listing.push(DirEntry {
            name,
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            mtime,
        });
    }
    listing.sort_by(|a, b| a.name.cmp(&b.name));

    debug!("Listed directory {} - {} entries", virtual_path, listing.len());
    Ok(listing)
}

/// Opens a file with open(2)-like flags
pub fn open_file(
    volume_root: &Path,
    path: &str,
    flags: OpenFlags,
) -> Result<(File, String), StorageError> {
    let (real_path, virtual_path) = resolve_and_validate_path(volume_root, path)?;

    if real_path.is_dir() {
        return Err(StorageError::IsADirectory(virtual_path));
    }
    if flags.create {
        ensure_parent_directory(volume_root, &virtual_path)?;
    } else if !real_path.exists() {
        return Err(StorageError::FileNotFound(virtual_path));
    }

    let file = OpenOptions::new()
        .read(flags.read)
        .write(flags.write && !flags.append)
        .append(flags.append)
        .create(flags.create)
        .open(&real_path)?;
    // std refuses append together with truncate, open(2) does not
    if flags.truncate {
        file.set_len(0)?;
    }

    debug!("Opened {} with flags {}", virtual_path, flags);
    Ok((file, virtual_path))
}

/// Writes `data` at `offset`, or at the end of file when `append` is set
pub fn write_at(file: &mut File, offset: u64, data: &[u8], append: bool) -> io::Result<usize> {
    if !append {
        file.seek(SeekFrom::Start(offset))?;
    }
    file.write_all(data)?;
    Ok(data.len())
}

/// Reads up to `len` bytes at `offset`; short at end of file
pub fn read_at(file: &mut File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len.min(64 * 1024));
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn mkdirs_is_idempotent() {
        let vol = volume();
        assert_eq!(make_directories(vol.path(), "/test/append").unwrap(), "/test/append");
        assert!(vol.path().join("test/append").is_dir());
        assert!(make_directories(vol.path(), "/test/append").is_ok());
        assert!(make_directories(vol.path(), "/").is_ok());
    }

    #[test]
    fn mkdirs_through_a_file_fails() {
        let vol = volume();
        create_file(vol.path(), "/f", 0).unwrap();
        let err = make_directories(vol.path(), "/f/sub").unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory(p) if p == "/f"));
    }

    #[test]
    fn create_needs_parent_and_fresh_name() {
        let vol = volume();
        assert!(matches!(
            create_file(vol.path(), "/missing/f0", 0),
            Err(StorageError::DirectoryNotFound(_))
        ));

        create_file(vol.path(), "/f0", 10).unwrap();
        assert_eq!(fs::metadata(vol.path().join("f0")).unwrap().len(), 10);
        assert!(matches!(
            create_file(vol.path(), "/f0", 0),
            Err(StorageError::FileAlreadyExists(_))
        ));
        assert!(matches!(
            create_file(vol.path(), "/", 0),
            Err(StorageError::IsADirectory(_))
        ));
    }

    #[test]
    fn append_grows_file() {
        let vol = volume();
        make_directories(vol.path(), "/d").unwrap();
        create_file(vol.path(), "/d/f0", 0).unwrap();
        assert_eq!(append_file(vol.path(), "/d/f0", b"hello").unwrap(), 5);
        assert_eq!(append_file(vol.path(), "/d/f0", b" world").unwrap(), 11);
        assert_eq!(fs::read(vol.path().join("d/f0")).unwrap(), b"hello world");
    }

    #[test]
    fn append_creates_missing_file_but_not_parent() {
        let vol = volume();
        assert_eq!(append_file(vol.path(), "/new", b"x").unwrap(), 1);
        assert!(matches!(
            append_file(vol.path(), "/d0/f0", b"x"),
            Err(StorageError::DirectoryNotFound(p)) if p == "/d0"
        ));
        assert!(!vol.path().join("d0").exists());

        make_directories(vol.path(), "/dir").unwrap();
        assert!(matches!(
            append_file(vol.path(), "/dir", b"x"),
            Err(StorageError::IsADirectory(_))
        ));
    }

    #[test]
    fn invalid_paths_touch_nothing() {
        let vol = volume();
        for bad in ["../", "/../", " ", "", "relative"] {
            assert!(append_file(vol.path(), bad, b"x").is_err(), "{:?}", bad);
        }
        assert_eq!(fs::read_dir(vol.path()).unwrap().count(), 0);
    }

    #[test]
    fn stat_reports_type_and_size() {
        let vol = volume();
        append_file(vol.path(), "/f", b"abc").unwrap();
        let info = stat(vol.path(), "/f").unwrap();
        assert!(info.is_file());
        assert_eq!(info.size, 3);

        assert!(stat(vol.path(), "/").unwrap().is_dir());
        assert!(matches!(stat(vol.path(), "/nope"), Err(StorageError::FileNotFound(_))));
        assert!(matches!(stat(vol.path(), "/f/x"), Err(StorageError::FileNotFound(_))));
    }

    #[test]
    fn rmdir_recursive_and_not() {
        let vol = volume();
        make_directories(vol.path(), "/t/a").unwrap();
        append_file(vol.path(), "/t/a/f", b"x").unwrap();

        assert!(matches!(
            remove_directory(vol.path(), "/t", false),
            Err(StorageError::DirectoryNotEmpty(_))
        ));
        remove_directory(vol.path(), "/t", true).unwrap();
        assert!(!vol.path().join("t").exists());

        assert!(matches!(
            remove_directory(vol.path(), "/t", true),
            Err(StorageError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            remove_directory(vol.path(), "/", true),
            Err(StorageError::Busy(_))
        ));

        make_directories(vol.path(), "/empty").unwrap();
        remove_directory(vol.path(), "/empty", false).unwrap();
    }

    #[test]
    fn rmdir_on_file_and_unlink_on_dir() {
        let vol = volume();
        append_file(vol.path(), "/f", b"x").unwrap();
        make_directories(vol.path(), "/d").unwrap();
        assert!(matches!(
            remove_directory(vol.path(), "/f", true),
            Err(StorageError::NotADirectory(_))
        ));
        assert!(matches!(
            delete_file(vol.path(), "/d"),
            Err(StorageError::IsADirectory(_))
        ));
        delete_file(vol.path(), "/f").unwrap();
        assert!(matches!(
            delete_file(vol.path(), "/f"),
            Err(StorageError::FileNotFound(_))
        ));
    }

    #[test]
    fn rename_moves_entries() {
        let vol = volume();
        make_directories(vol.path(), "/a").unwrap();
        append_file(vol.path(), "/a/f", b"x").unwrap();
        make_directories(vol.path(), "/b").unwrap();

        assert_eq!(rename(vol.path(), "/a/f", "/b/g").unwrap(), "/b/g");
        assert!(vol.path().join("b/g").is_file());
        assert!(matches!(
            rename(vol.path(), "/a/f", "/b/h"),
            Err(StorageError::FileNotFound(_))
        ));
        assert!(matches!(
            rename(vol.path(), "/b/g", "/zz/g"),
            Err(StorageError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            rename(vol.path(), "/a", "/a/inner"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn list_is_sorted() {
        let vol = volume();
        append_file(vol.path(), "/b", b"12").unwrap();
        make_directories(vol.path(), "/a").unwrap();
        let listing = list_directory(vol.path(), "/").unwrap();
        let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(listing[0].is_dir);
        assert_eq!(listing[1].size, 2);

        assert!(matches!(
            list_directory(vol.path(), "/b"),
            Err(StorageError::NotADirectory(_))
        ));
    }

    #[test]
    fn positional_io() {
        let vol = volume();
        let (mut file, _) = open_file(
            vol.path(),
            "/f",
            OpenFlags::write_only().with_create(),
        )
        .unwrap();
        write_at(&mut file, 0, b"hello world", false).unwrap();
        write_at(&mut file, 6, b"WORLD", false).unwrap();
        drop(file);

        let (mut file, _) = open_file(vol.path(), "/f", OpenFlags::read_only()).unwrap();
        assert_eq!(read_at(&mut file, 0, 100).unwrap(), b"hello WORLD");
        assert_eq!(read_at(&mut file, 6, 2).unwrap(), b"WO");
        assert!(read_at(&mut file, 50, 2).unwrap().is_empty());

        let (mut file, _) = open_file(vol.path(), "/f", OpenFlags::append()).unwrap();
        write_at(&mut file, 0, b"!", true).unwrap();
        assert_eq!(fs::read(vol.path().join("f")).unwrap(), b"hello WORLD!");

        assert!(matches!(
            open_file(vol.path(), "/missing", OpenFlags::read_only()),
            Err(StorageError::FileNotFound(_))
        ));
    }

    #[test]
    fn append_with_truncate_empties_the_file() {
        let vol = volume();
        append_file(vol.path(), "/log", b"old contents").unwrap();

        let flags = OpenFlags::append().with_truncate();
        assert!(flags.check().is_ok());
        let (mut file, _) = open_file(vol.path(), "/log", flags).unwrap();
        assert_eq!(fs::metadata(vol.path().join("log")).unwrap().len(), 0);

        write_at(&mut file, 100, b"new", true).unwrap();
        assert_eq!(fs::read(vol.path().join("log")).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn stat_reports_symlinks() {
        let vol = volume();
        append_file(vol.path(), "/target", b"abc").unwrap();
        std::os::unix::fs::symlink(vol.path().join("target"), vol.path().join("link")).unwrap();

        let info = stat(vol.path(), "/link").unwrap();
        assert!(info.is_symlink());
        assert!(!info.is_file());
        assert!(stat(vol.path(), "/target").unwrap().is_file());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_not_followed() {
        let outside = tempfile::tempdir().unwrap();
        let vol = volume();
        let escaped = outside.path().join("escaped");
        std::os::unix::fs::symlink(&escaped, vol.path().join("link")).unwrap();

        assert!(append_file(vol.path(), "/link", b"x").is_err());
        assert!(open_file(vol.path(), "/link", OpenFlags::write_only().with_create()).is_err());
        assert!(!escaped.exists());
    }
}
