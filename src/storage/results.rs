//! Storage record types
//!
//! Directory entries returned by LIST and the open flags accepted by OPEN.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time in seconds since the epoch
    pub mtime: u64,
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Format: "name|type|size|timestamp"
        let kind = if self.is_dir { 'd' } else { 'f' };
        write!(f, "{}|{}|{}|{}", self.name, kind, self.size, self.mtime)
    }
}

impl FromStr for DirEntry {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ProtocolError::MalformedReply(s.to_string());
        // names may contain '|', so split from the right
        let mut parts = s.rsplitn(4, '|');
        let mtime = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let size = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let is_dir = match parts.next() {
            Some("d") => true,
            Some("f") => false,
            _ => return Err(malformed()),
        };
        let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;

        Ok(Self {
            name: name.to_string(),
            is_dir,
            size,
            mtime,
        })
    }
}

/// Access flags for OPEN, spelled on the wire as letters from `rwact`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    /// O_WRONLY | O_CREAT | O_APPEND
    pub fn append() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Self::default()
        }
    }

    pub fn with_create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn with_truncate(mut self) -> Self {
        self.truncate = true;
        self
    }

    /// Write access, either positional or appending
    pub fn is_writable(&self) -> bool {
        self.write || self.append
    }

    /// Creating or truncating needs write access, as with open(2).
    pub fn check(&self) -> Result<(), ProtocolError> {
        if !self.read && !self.is_writable() {
            return Err(ProtocolError::Syntax("open flags grant no access".into()));
        }
        if (self.create || self.truncate) && !self.is_writable() {
            return Err(ProtocolError::Syntax(
                "create and truncate require write access".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, letter) in [
            (self.read, 'r'),
            (self.write, 'w'),
            (self.append, 'a'),
            (self.create, 'c'),
            (self.truncate, 't'),
        ] {
            if set {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

impl FromStr for OpenFlags {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = OpenFlags::default();
        for c in s.chars() {
            let slot = match c {
                'r' => &mut flags.read,
                'w' => &mut flags.write,
                'a' => &mut flags.append,
                'c' => &mut flags.create,
                't' => &mut flags.truncate,
                _ => return Err(ProtocolError::Syntax(format!("bad open flag {:?}", c))),
            };
            if *slot {
                return Err(ProtocolError::Syntax(format!("duplicate open flag {:?}", c)));
            }
            *slot = true;
        }
        flags.check()?;
        Ok(flags)
    }
}
