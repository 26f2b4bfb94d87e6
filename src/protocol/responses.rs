//! Reply handling
//!
//! Defines reply codes and the `Reply` line exchanged after every request.

use crate::error::{Errno, ProtocolError};

/// Reply codes
pub const OPENING_TRANSFER: u16 = 150;
pub const OK: u16 = 200;
pub const DIRECTORY_LISTING: u16 = 212;
pub const FILE_STATUS: u16 = 213;
pub const READY: u16 = 220;
pub const GOODBYE: u16 = 221;
pub const MOUNTED: u16 = 230;
pub const ACTION_OK: u16 = 250;
pub const CREATED: u16 = 257;
pub const PENDING: u16 = 350;
pub const SERVICE_UNAVAILABLE: u16 = 421;
pub const LOCAL_ERROR: u16 = 451;
pub const UNKNOWN_COMMAND: u16 = 500;
pub const SYNTAX_ERROR: u16 = 501;
pub const BAD_SEQUENCE: u16 = 503;
pub const NOT_MOUNTED: u16 = 530;
pub const ACTION_NOT_TAKEN: u16 = 550;
pub const EXCEEDED_STORAGE: u16 = 552;

/// A single reply line: `<code> <text>\r\n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Negative reply, text is `<ERRNO> <message>`
    pub fn error(code: u16, errno: Errno, message: &str) -> Self {
        Self::new(code, format!("{} {}", errno, message))
    }

    /// 1xx, 2xx and 3xx replies
    pub fn is_positive(&self) -> bool {
        self.code < 400
    }

    /// The errno token of a negative reply, if present
    pub fn errno(&self) -> Option<Errno> {
        if self.is_positive() {
            return None;
        }
        self.text.split_whitespace().next()?.parse().ok()
    }

    /// The message without the leading errno token
    pub fn message(&self) -> &str {
        match self.errno() {
            Some(errno) => self.text[errno.as_str().len()..].trim_start(),
            None => &self.text,
        }
    }

    pub fn to_line(&self) -> String {
        format_response(self.code, &self.text)
    }
}

/// Format a reply message
pub fn format_response(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}

/// Parse a reply line received from the server
pub fn parse_reply(line: &str) -> Result<Reply, ProtocolError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let mut parts = trimmed.splitn(2, ' ');
    let code = parts
        .next()
        .filter(|c| c.len() == 3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| ProtocolError::MalformedReply(trimmed.to_string()))?;
    let text = parts.next().unwrap_or("");
    Ok(Reply::new(code, text))
}
