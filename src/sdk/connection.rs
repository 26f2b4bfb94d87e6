//! Client side of a store connection
//!
//! Frames requests, reads replies and the lines or bytes that follow them.

use log::debug;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{ClientError, ProtocolError};
use crate::protocol::responses::{self, Reply, parse_reply};
use crate::protocol::Command;

/// A request: one command line plus the payload APPE and WRITE carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(command: Command, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }
}

/// A reply plus whatever followed it on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub reply: Reply,
    /// Entry lines of a LIST reply
    pub lines: Vec<String>,
    /// Bytes of a READ reply
    pub data: Vec<u8>,
}

impl Response {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            lines: Vec::new(),
            data: Vec::new(),
        }
    }
}

pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: String,
}

impl Connection {
    /// Connects to `addr` and consumes the greeting.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(format!("connect to {}", addr)))?
            .map_err(|e| ClientError::Connect(addr.to_string(), e))?;
        stream.set_nodelay(true)?;

        let (read_half, writer) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer,
            addr: addr.to_string(),
        };

        let greeting = tokio::time::timeout(timeout, conn.read_reply())
            .await
            .map_err(|_| ClientError::Timeout(format!("greeting from {}", addr)))??;
        if greeting.code != responses::READY {
            return Err(ClientError::Refused {
                code: greeting.code,
                errno: greeting.errno(),
                message: greeting.message().to_string(),
            });
        }

        debug!("Connected to {}: {}", addr, greeting.text);
        Ok(conn)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends `request` and reads the complete response.
    ///
    /// Negative replies are returned as responses, not errors; only
    /// transport and framing failures are errors.
    pub async fn round_trip(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.send(request).await?;
        let reply = self.read_reply().await?;
        let mut response = Response::new(reply);

        match (&request.command, response.reply.code) {
            (Command::LIST(_), responses::DIRECTORY_LISTING) => {
                let count = Self::count(&response.reply)?;
                response.lines = self.read_lines(count).await?;
            }
            (Command::READ { len, .. }, responses::OPENING_TRANSFER) => {
                let count = Self::count(&response.reply)?;
                if count > *len {
                    return Err(ProtocolError::MalformedReply(response.reply.text).into());
                }
                response.data = self.read_bytes(count).await?;
            }
            _ => {}
        }

        Ok(response)
    }

    async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        let mut buf = request.command.to_line().into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&request.payload);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ClientError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ClientError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_reply(&mut self) -> Result<Reply, ClientError> {
        let line = self.read_line().await?;
        Ok(parse_reply(&line)?)
    }

    async fn read_lines(&mut self, count: usize) -> Result<Vec<String>, ClientError> {
        let mut lines = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            lines.push(self.read_line().await?);
        }
        Ok(lines)
    }

    async fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, ClientError> {
        let mut data = vec![0u8; count];
        self.reader.read_exact(&mut data).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ClientError::Closed
            } else {
                ClientError::Io(e)
            }
        })?;
        Ok(data)
    }

    fn count(reply: &Reply) -> Result<usize, ClientError> {
        reply
            .text
            .trim()
            .parse()
            .map_err(|_| ProtocolError::MalformedReply(reply.text.clone()).into())
    }

    /// Sends QUIT and waits for the goodbye.
    pub async fn quit(mut self) -> Result<(), ClientError> {
        self.send(&Request::new(Command::QUIT)).await?;
        let reply = self.read_reply().await?;
        if reply.code != responses::GOODBYE {
            return Err(ProtocolError::MalformedReply(reply.text).into());
        }
        Ok(())
    }
}
