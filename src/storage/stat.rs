//! File status records
//!
//! `StatInfo` is what `STAT` returns: an immutable snapshot of one entry.
//! On the wire it is a run of `key=value` pairs in a fixed order.

use std::fmt;
use std::fs::Metadata;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ProtocolError;

/// File type bits, as in `st_mode`
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;

/// Block size reported for every entry
pub const DEFAULT_BLK_SIZE: u32 = 1 << 12;

/// A point in time as seconds and nanoseconds since the epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub secs: u64,
    pub nsecs: u32,
}

impl Timestamp {
    pub fn from_system_time(time: SystemTime) -> Self {
        let dur = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: dur.as_secs(),
            nsecs: dur.subsec_nanos(),
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::new(self.secs, self.nsecs)
    }

    fn parse(value: &str) -> Option<Self> {
        let (secs, nsecs) = value.split_once('.')?;
        let nsecs: u32 = nsecs.parse().ok()?;
        if nsecs >= 1_000_000_000 {
            return None;
        }
        Some(Self {
            secs: secs.parse().ok()?,
            nsecs,
        })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nsecs)
    }
}

/// Metadata snapshot of a file or directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatInfo {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub blk_size: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl StatInfo {
    /// Builds a snapshot from local file metadata.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        let file_type = if metadata.is_dir() {
            S_IFDIR
        } else if metadata.is_file() {
            S_IFREG
        } else if metadata.file_type().is_symlink() {
            S_IFLNK
        } else {
            S_IFSOCK
        };
        let size = if metadata.is_dir() { 0 } else { metadata.len() };
        let ts = |secs: i64, nsecs: i64| Timestamp {
            secs: secs.max(0) as u64,
            nsecs: nsecs.clamp(0, 999_999_999) as u32,
        };

        Self {
            ino: metadata.ino(),
            size,
            blocks: blocks_for(size),
            blk_size: DEFAULT_BLK_SIZE,
            mode: file_type | (metadata.mode() & 0o777),
            nlink: metadata.nlink() as u32,
            uid: metadata.uid(),
            gid: metadata.gid(),
            atime: ts(metadata.atime(), metadata.atime_nsec()),
            mtime: ts(metadata.mtime(), metadata.mtime_nsec()),
            ctime: ts(metadata.ctime(), metadata.ctime_nsec()),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits (`rwxrwxrwx`)
    pub fn permissions(&self) -> u32 {
        self.mode & 0o777
    }

    pub fn modified(&self) -> SystemTime {
        self.mtime.to_system_time()
    }
}

/// Number of 512-byte blocks needed to hold `size` bytes
pub fn blocks_for(size: u64) -> u64 {
    size.div_ceil(512)
}

impl fmt::Display for StatInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ino={} size={} blocks={} blksize={} mode={:o} nlink={} uid={} gid={} atime={} mtime={} ctime={}",
            self.ino,
            self.size,
            self.blocks,
            self.blk_size,
            self.mode,
            self.nlink,
            self.uid,
            self.gid,
            self.atime,
            self.mtime,
            self.ctime
        )
    }
}

impl FromStr for StatInfo {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidStat(s.to_string());
        let fields: Vec<(&str, &str)> = s
            .split_whitespace()
            .map(|pair| pair.split_once('=').ok_or_else(invalid))
            .collect::<Result<_, _>>()?;

        const KEYS: [&str; 11] = [
            "ino", "size", "blocks", "blksize", "mode", "nlink", "uid", "gid", "atime", "mtime",
            "ctime",
        ];
        if fields.len() != KEYS.len() || fields.iter().zip(KEYS).any(|((k, _), key)| *k != key) {
            return Err(invalid());
        }

        let num = |i: usize| fields[i].1.parse::<u64>().map_err(|_| invalid());
        let small = |i: usize| fields[i].1.parse::<u32>().map_err(|_| invalid());
        let time = |i: usize| Timestamp::parse(fields[i].1).ok_or_else(invalid);

        Ok(Self {
            ino: num(0)?,
            size: num(1)?,
            blocks: num(2)?,
            blk_size: small(3)?,
            mode: u32::from_str_radix(fields[4].1, 8).map_err(|_| invalid())?,
            nlink: small(5)?,
            uid: small(6)?,
            gid: small(7)?,
            atime: time(8)?,
            mtime: time(9)?,
            ctime: time(10)?,
        })
    }
}
