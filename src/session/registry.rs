//! Session registry
//!
//! Tracks mounted sessions so the server can enforce its client limit.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::error::SessionError;

/// What the server knows about a registered session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub volume: String,
    pub mounted_at: Instant,
}

/// Registry for tracking active sessions
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SocketAddr, SessionInfo>,
    max_sessions: usize,
}

/// Registry shared between connection tasks
pub type SharedSessionRegistry = Arc<Mutex<SessionRegistry>>;

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    /// Registers `addr`, or refreshes its volume if already registered.
    pub fn register(&mut self, addr: SocketAddr, volume: &str) -> Result<(), SessionError> {
        if !self.sessions.contains_key(&addr) && self.sessions.len() >= self.max_sessions {
            return Err(SessionError::TooManySessions(self.max_sessions));
        }
        self.sessions.insert(
            addr,
            SessionInfo {
                volume: volume.to_string(),
                mounted_at: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<SessionInfo> {
        self.sessions.remove(addr)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&SessionInfo> {
        self.sessions.get(addr)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}
