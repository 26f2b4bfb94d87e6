//! Module `commands`
//!
//! Defines the request verbs of the store protocol, the parser turning a
//! request line into a `Command`, and the result type handlers return.
//!
//! Requests are `VERB [args...] [path]`. The path always comes last and
//! runs to the end of the line, so it may contain spaces.

use std::fmt;

use crate::error::ProtocolError;
use crate::protocol::responses::Reply;
use crate::storage::OpenFlags;

/// A request parsed from a client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MOUNT(String), // Mount a volume for this session
    QUIT,
    NOOP,
    MKD(String), // Make directories
    CRT { size: u64, path: String },
    APPE { len: usize, path: String }, // Followed by `len` payload bytes
    STAT(String),
    RMD { recursive: bool, path: String },
    DELE(String), // Unlink a file
    RNFR(String), // Rename from
    RNTO(String), // Rename to
    LIST(String),
    OPEN { flags: OpenFlags, path: String },
    WRITE { fd: u64, offset: u64, len: usize }, // Followed by `len` payload bytes
    READ { fd: u64, offset: u64, len: usize },
    FLUSH(u64), // Sync file data to disk
    CLOSE(u64),
}

impl Command {
    /// Number of raw bytes following the request line
    pub fn payload_len(&self) -> Option<usize> {
        match self {
            Command::APPE { len, .. } | Command::WRITE { len, .. } => Some(*len),
            _ => None,
        }
    }

    /// Payload length announced by the leading fields of a request line.
    ///
    /// Works on a truncated line, so the payload of a request refused as
    /// too long can still be skipped.
    pub fn announced_payload_len(line: &str) -> Option<usize> {
        let mut fields = line.split(' ');
        let verb = fields.next()?;
        let len = if verb.eq_ignore_ascii_case("APPE") {
            fields.next()
        } else if verb.eq_ignore_ascii_case("WRITE") {
            fields.nth(2)
        } else {
            None
        };
        len?.trim_end_matches(['\r', '\n']).parse().ok()
    }

    /// Verb as sent on the wire
    pub fn verb(&self) -> &'static str {
        match self {
            Command::MOUNT(_) => "MOUNT",
            Command::QUIT => "QUIT",
            Command::NOOP => "NOOP",
            Command::MKD(_) => "MKD",
            Command::CRT { .. } => "CRT",
            Command::APPE { .. } => "APPE",
            Command::STAT(_) => "STAT",
            Command::RMD { .. } => "RMD",
            Command::DELE(_) => "DELE",
            Command::RNFR(_) => "RNFR",
            Command::RNTO(_) => "RNTO",
            Command::LIST(_) => "LIST",
            Command::OPEN { .. } => "OPEN",
            Command::WRITE { .. } => "WRITE",
            Command::READ { .. } => "READ",
            Command::FLUSH(_) => "FLUSH",
            Command::CLOSE(_) => "CLOSE",
        }
    }

    /// The request line, without the trailing CRLF
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = self.verb();
        match self {
            Command::QUIT | Command::NOOP => write!(f, "{}", verb),
            Command::MOUNT(arg)
            | Command::MKD(arg)
            | Command::STAT(arg)
            | Command::DELE(arg)
            | Command::RNFR(arg)
            | Command::RNTO(arg)
            | Command::LIST(arg) => write!(f, "{} {}", verb, arg),
            Command::CRT { size, path } => write!(f, "{} {} {}", verb, size, path),
            Command::APPE { len, path } => write!(f, "{} {} {}", verb, len, path),
            Command::RMD { recursive, path } => {
                write!(f, "{} {} {}", verb, u8::from(*recursive), path)
            }
            Command::OPEN { flags, path } => write!(f, "{} {} {}", verb, flags, path),
            Command::WRITE { fd, offset, len } | Command::READ { fd, offset, len } => {
                write!(f, "{} {} {} {}", verb, fd, offset, len)
            }
            Command::FLUSH(fd) | Command::CLOSE(fd) => write!(f, "{} {}", verb, fd),
        }
    }
}

/// Represents the outcome status of executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandStatus {
    Success,
    Failure(String),
    CloseConnection,
}

/// Extra lines or bytes sent right after the reply line.
#[derive(Debug, PartialEq)]
pub enum CommandData {
    Listing(Vec<String>),
    Bytes(Vec<u8>),
}

/// Struct encapsulating the full result of a command execution.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub reply: Reply,
    pub data: Option<CommandData>,
}

impl CommandResult {
    pub fn success(reply: Reply) -> Self {
        Self {
            status: CommandStatus::Success,
            reply,
            data: None,
        }
    }

    pub fn failure(reason: impl Into<String>, reply: Reply) -> Self {
        Self {
            status: CommandStatus::Failure(reason.into()),
            reply,
            data: None,
        }
    }

    pub fn with_data(mut self, data: CommandData) -> Self {
        self.data = Some(data);
        self
    }
}

fn number<T: std::str::FromStr>(arg: Option<&str>, what: &str) -> Result<T, ProtocolError> {
    arg.and_then(|a| a.parse().ok())
        .ok_or_else(|| ProtocolError::Syntax(format!("expected {}", what)))
}

fn required(arg: Option<&str>, what: &str) -> Result<String, ProtocolError> {
    match arg {
        Some(a) if !a.is_empty() => Ok(a.to_string()),
        _ => Err(ProtocolError::Syntax(format!("missing {}", what))),
    }
}

/// Parses a raw request line into a `Command`.
///
/// Only the line terminator is stripped; spaces inside the trailing path
/// are preserved.
pub fn parse_command(raw: &str) -> Result<Command, ProtocolError> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let (verb, rest) = match line.split_once(' ') {
        Some((verb, rest)) => (verb, Some(rest)),
        None => (line, None),
    };
    let verb = verb.to_ascii_uppercase();

    // Splits off `n` leading numeric fields, leaving the path
    let fields = |n: usize| -> (Vec<&str>, Option<&str>) {
        let mut parts = rest.unwrap_or("").splitn(n + 1, ' ');
        let head = (0..n).filter_map(|_| parts.next()).collect();
        (head, parts.next())
    };

    let command = match verb.as_str() {
        "MOUNT" => Command::MOUNT(required(rest, "volume")?),
        "QUIT" => Command::QUIT,
        "NOOP" => Command::NOOP,
        "MKD" => Command::MKD(required(rest, "path")?),
        "STAT" => Command::STAT(required(rest, "path")?),
        "DELE" => Command::DELE(required(rest, "path")?),
        "RNFR" => Command::RNFR(required(rest, "path")?),
        "RNTO" => Command::RNTO(required(rest, "path")?),
        "LIST" => Command::LIST(required(rest, "path")?),
        "CRT" => {
            let (head, path) = fields(1);
            Command::CRT {
                size: number(head.first().copied(), "size")?,
                path: required(path, "path")?,
            }
        }
        "APPE" => {
            let (head, path) = fields(1);
            Command::APPE {
                len: number(head.first().copied(), "length")?,
                path: required(path, "path")?,
            }
        }
        "RMD" => {
            let (head, path) = fields(1);
            let recursive = match head.first().copied() {
                Some("1") => true,
                Some("0") => false,
                _ => return Err(ProtocolError::Syntax("expected recursive flag 0 or 1".into())),
            };
            Command::RMD {
                recursive,
                path: required(path, "path")?,
            }
        }
        "OPEN" => {
            let (head, path) = fields(1);
            let flags = head
                .first()
                .ok_or_else(|| ProtocolError::Syntax("missing flags".into()))?
                .parse()?;
            Command::OPEN {
                flags,
                path: required(path, "path")?,
            }
        }
        "WRITE" | "READ" => {
            let parts: Vec<&str> = rest.unwrap_or("").split(' ').collect();
            if parts.len() != 3 {
                return Err(ProtocolError::Syntax("expected fd, offset and length".into()));
            }
            let fd = number(Some(parts[0]), "fd")?;
            let offset = number(Some(parts[1]), "offset")?;
            let len = number(Some(parts[2]), "length")?;
            if verb == "WRITE" {
                Command::WRITE { fd, offset, len }
            } else {
                Command::READ { fd, offset, len }
            }
        }
        "FLUSH" => Command::FLUSH(number(rest, "fd")?),
        "CLOSE" => Command::CLOSE(number(rest, "fd")?),
        _ => return Err(ProtocolError::UnknownCommand(verb)),
    };

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_commands() {
        assert_eq!(
            parse_command("MKD /test/append\r\n").unwrap(),
            Command::MKD("/test/append".into())
        );
        assert_eq!(
            parse_command("stat /a b \r\n").unwrap(),
            Command::STAT("/a b ".into())
        );
        assert_eq!(parse_command("NOOP").unwrap(), Command::NOOP);
    }

    #[test]
    fn parses_numeric_arguments() {
        assert_eq!(
            parse_command("CRT 0 /f0").unwrap(),
            Command::CRT {
                size: 0,
                path: "/f0".into()
            }
        );
        assert_eq!(
            parse_command("APPE 12 /dir/my file").unwrap(),
            Command::APPE {
                len: 12,
                path: "/dir/my file".into()
            }
        );
        assert_eq!(
            parse_command("RMD 1 /test").unwrap(),
            Command::RMD {
                recursive: true,
                path: "/test".into()
            }
        );
        assert_eq!(
            parse_command("READ 3 100 10").unwrap(),
            Command::READ {
                fd: 3,
                offset: 100,
                len: 10
            }
        );
        assert_eq!(
            parse_command("OPEN wac /log").unwrap(),
            Command::OPEN {
                flags: OpenFlags::append(),
                path: "/log".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_requests() {
        assert!(matches!(parse_command("FOO /x"), Err(ProtocolError::UnknownCommand(_))));
        assert!(matches!(parse_command("MKD"), Err(ProtocolError::Syntax(_))));
        assert!(matches!(parse_command("CRT abc /x"), Err(ProtocolError::Syntax(_))));
        assert!(matches!(parse_command("CRT -1 /x"), Err(ProtocolError::Syntax(_))));
        assert!(matches!(parse_command("RMD yes /x"), Err(ProtocolError::Syntax(_))));
        assert!(matches!(parse_command("WRITE 1 2"), Err(ProtocolError::Syntax(_))));
        assert!(matches!(parse_command("APPE 4"), Err(ProtocolError::Syntax(_))));
    }

    #[test]
    fn request_line_round_trips() {
        let commands = [
            Command::MOUNT("ltptest".into()),
            Command::RMD {
                recursive: false,
                path: "/a dir".into(),
            },
            Command::WRITE {
                fd: 7,
                offset: 0,
                len: 4,
            },
            Command::CLOSE(7),
        ];
        for command in commands {
            assert_eq!(parse_command(&command.to_line()).unwrap(), command);
        }
    }

    #[test]
    fn payload_lengths() {
        assert_eq!(parse_command("APPE 5 /f").unwrap().payload_len(), Some(5));
        assert_eq!(parse_command("STAT /f").unwrap().payload_len(), None);
    }

    #[test]
    fn payload_length_of_truncated_lines() {
        let truncated = format!("APPE 5 /{}", "x".repeat(40));
        assert_eq!(Command::announced_payload_len(&truncated), Some(5));
        assert_eq!(Command::announced_payload_len("write 1 0 9\r\n"), Some(9));
        assert_eq!(Command::announced_payload_len("STAT /aaaa"), None);
        assert_eq!(Command::announced_payload_len("APPE x /f"), None);
    }

    #[test]
    fn parses_flush() {
        assert_eq!(parse_command("FLUSH 3").unwrap(), Command::FLUSH(3));
        assert_eq!(Command::FLUSH(3).to_line(), "FLUSH 3");
        assert!(matches!(parse_command("FLUSH"), Err(ProtocolError::Syntax(_))));
    }
}
