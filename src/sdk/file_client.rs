//! File client
//!
//! `FileClient` is the SDK entry point. Every operation comes in two forms:
//! a `try_*` method returning `Result<_, ClientError>`, and a plain method
//! that folds any failure into `false` / `None` after logging it. Paths are
//! validated before anything is sent, so a malformed path never reaches
//! the store.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::Command;
use crate::protocol::responses;
use crate::sdk::connection::{Connection, Request, Response};
use crate::storage::validation::normalize_path;
use crate::storage::{DirEntry, OpenFlags, StatInfo};

/// An open file on the store, bound to the session that opened it
#[derive(Debug, PartialEq, Eq)]
pub struct FileHandle {
    fd: u64,
    path: String,
    flags: OpenFlags,
}

impl FileHandle {
    pub fn fd(&self) -> u64 {
        self.fd
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }
}

pub struct FileClient {
    conn: Mutex<Option<Connection>>,
    config: ClientConfig,
    requests_sent: AtomicU64,
}

fn checked_path(path: &str) -> Result<String, ClientError> {
    normalize_path(path).map_err(ClientError::InvalidPath)
}

fn parse_number<T: std::str::FromStr>(response: &Response) -> Result<T, ClientError> {
    response
        .reply
        .text
        .split_whitespace()
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| {
            crate::error::ProtocolError::MalformedReply(response.reply.text.clone()).into()
        })
}

impl FileClient {
    /// Connects to `config.master_addr` and mounts `config.vol_name`.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let conn = Connection::connect(&config.master_addr, config.connect_timeout()).await?;
        let client = Self {
            conn: Mutex::new(Some(conn)),
            config,
            requests_sent: AtomicU64::new(0),
        };

        client
            .execute(Request::new(Command::MOUNT(client.config.vol_name.clone())))
            .await?;
        info!(
            "Mounted volume {} from {}",
            client.config.vol_name, client.config.master_addr
        );
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of requests put on the wire so far
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Sends one request and returns its positive response.
    pub async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        let mut responses = self.execute_batch(vec![request]).await?;
        responses.pop().ok_or(ClientError::Closed)
    }

    /// Sends requests in order under one connection lock, stopping at the
    /// first failure.
    ///
    /// Transport failures and timeouts drop the connection; every later
    /// call fails with `ClientError::Closed`.
    pub async fn execute_batch(&self, requests: Vec<Request>) -> Result<Vec<Response>, ClientError> {
        let mut guard = self.conn.lock().await;
        let mut responses = Vec::with_capacity(requests.len());

        for request in requests {
            let conn = guard.as_mut().ok_or(ClientError::Closed)?;
            self.requests_sent.fetch_add(1, Ordering::Relaxed);
            debug!("-> {}", request.command.verb());

            let outcome =
                tokio::time::timeout(self.config.request_timeout(), conn.round_trip(&request))
                    .await;
            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    *guard = None;
                    return Err(e);
                }
                Err(_) => {
                    *guard = None;
                    return Err(ClientError::Timeout(request.command.verb().to_string()));
                }
            };

            if !response.reply.is_positive() {
                return Err(ClientError::Refused {
                    code: response.reply.code,
                    errno: response.reply.errno(),
                    message: response.reply.message().to_string(),
                });
            }
            responses.push(response);
        }

        Ok(responses)
    }

    /// Ends the session. Later calls fail with `ClientError::Closed`.
    pub async fn close(&self) {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            let addr = conn.addr().to_string();
            if let Err(e) = conn.quit().await {
                debug!("QUIT to {} failed: {}", addr, e);
            }
            info!("Closed session with {}", addr);
        }
    }

    fn report<T>(&self, op: &str, path: &str, result: Result<T, ClientError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{} {:?} failed: {}", op, path, e);
                None
            }
        }
    }

    // --------------------
    // Result-returning operations
    // --------------------

    pub async fn try_mkdirs(&self, path: &str) -> Result<(), ClientError> {
        let path = checked_path(path)?;
        self.execute(Request::new(Command::MKD(path))).await?;
        Ok(())
    }

    pub async fn try_create_file(&self, path: &str, size: u64) -> Result<(), ClientError> {
        let path = checked_path(path)?;
        self.execute(Request::new(Command::CRT { size, path })).await?;
        Ok(())
    }

    /// Appends `data`, split into requests of at most `max_payload_size`.
    pub async fn try_append_file(&self, path: &str, data: &[u8]) -> Result<(), ClientError> {
        let path = checked_path(path)?;
        let requests = if data.is_empty() {
            vec![Request::new(Command::APPE { len: 0, path })]
        } else {
            data.chunks(self.config.max_payload_size)
                .map(|chunk| {
                    Request::with_payload(
                        Command::APPE {
                            len: chunk.len(),
                            path: path.clone(),
                        },
                        chunk.to_vec(),
                    )
                })
                .collect()
        };
        self.execute_batch(requests).await?;
        Ok(())
    }

    pub async fn try_stat(&self, path: &str) -> Result<StatInfo, ClientError> {
        let path = checked_path(path)?;
        let response = self.execute(Request::new(Command::STAT(path))).await?;
        if response.reply.code != responses::FILE_STATUS {
            return Err(
                crate::error::ProtocolError::MalformedReply(response.reply.text).into(),
            );
        }
        Ok(response.reply.text.parse()?)
    }

    pub async fn try_rmdir(&self, path: &str, recursive: bool) -> Result<(), ClientError> {
        let path = checked_path(path)?;
        self.execute(Request::new(Command::RMD { recursive, path }))
            .await?;
        Ok(())
    }

    pub async fn try_unlink(&self, path: &str) -> Result<(), ClientError> {
        let path = checked_path(path)?;
        self.execute(Request::new(Command::DELE(path))).await?;
        Ok(())
    }

    pub async fn try_rename(&self, from: &str, to: &str) -> Result<(), ClientError> {
        let from = checked_path(from)?;
        let to = checked_path(to)?;
        self.execute_batch(vec![
            Request::new(Command::RNFR(from)),
            Request::new(Command::RNTO(to)),
        ])
        .await?;
        Ok(())
    }

    pub async fn try_list_dir(&self, path: &str) -> Result<Vec<DirEntry>, ClientError> {
        let path = checked_path(path)?;
        let response = self.execute(Request::new(Command::LIST(path))).await?;
        let entries = response
            .lines
            .iter()
            .map(|line| line.parse::<DirEntry>())
            .collect::<Result<_, _>>()?;
        Ok(entries)
    }

    pub async fn try_open(&self, path: &str, flags: OpenFlags) -> Result<FileHandle, ClientError> {
        let path = checked_path(path)?;
        flags.check()?;
        let response = self
            .execute(Request::new(Command::OPEN {
                flags,
                path: path.clone(),
            }))
            .await?;
        let fd = parse_number(&response)?;
        Ok(FileHandle { fd, path, flags })
    }

    /// Writes `data` at `offset`; with an append handle the offset is
    /// ignored. Returns the number of bytes written.
    pub async fn try_write(
        &self,
        handle: &FileHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, ClientError> {
        let mut requests = Vec::new();
        let mut pos = offset;
        for chunk in data.chunks(self.config.max_payload_size.max(1)) {
            requests.push(Request::with_payload(
                Command::WRITE {
                    fd: handle.fd,
                    offset: pos,
                    len: chunk.len(),
                },
                chunk.to_vec(),
            ));
            pos += chunk.len() as u64;
        }
        if requests.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for response in self.execute_batch(requests).await? {
            written += parse_number::<usize>(&response)?;
        }
        Ok(written)
    }

    /// Reads up to `len` bytes at `offset`; shorter at end of file.
    pub async fn try_read(
        &self,
        handle: &FileHandle,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, ClientError> {
        let mut data = Vec::new();
        let mut pos = offset;
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(self.config.max_payload_size);
            let response = self
                .execute(Request::new(Command::READ {
                    fd: handle.fd,
                    offset: pos,
                    len: want,
                }))
                .await?;
            let got = response.data.len();
            data.extend_from_slice(&response.data);
            if got < want {
                break;
            }
            pos += got as u64;
            remaining -= got;
        }
        Ok(data)
    }

    /// Syncs the data written through `handle` to disk on the store.
    pub async fn try_flush(&self, handle: &FileHandle) -> Result<(), ClientError> {
        self.execute(Request::new(Command::FLUSH(handle.fd))).await?;
        Ok(())
    }

    pub async fn try_close(&self, handle: FileHandle) -> Result<(), ClientError> {
        self.execute(Request::new(Command::CLOSE(handle.fd))).await?;
        Ok(())
    }

    // --------------------
    // Non-throwing operations
    // --------------------

    /// Creates `path` and any missing parents. Existing directories succeed.
    pub async fn mkdirs(&self, path: &str) -> bool {
        let result = self.try_mkdirs(path).await;
        self.report("mkdirs", path, result).is_some()
    }

    /// Creates a new file of `size` bytes. Fails if the parent is missing
    /// or the file exists.
    pub async fn create_file(&self, path: &str, size: u64) -> bool {
        let result = self.try_create_file(path, size).await;
        self.report("create_file", path, result).is_some()
    }

    /// Appends `data`, creating the file if needed. Fails if the parent is
    /// missing.
    pub async fn append_file(&self, path: &str, data: &[u8]) -> bool {
        let result = self.try_append_file(path, data).await;
        self.report("append_file", path, result).is_some()
    }

    pub async fn stat(&self, path: &str) -> Option<StatInfo> {
        let result = self.try_stat(path).await;
        self.report("stat", path, result)
    }

    /// Removes a directory; a non-empty one only with `recursive`.
    pub async fn rmdir(&self, path: &str, recursive: bool) -> bool {
        let result = self.try_rmdir(path, recursive).await;
        self.report("rmdir", path, result).is_some()
    }

    pub async fn unlink(&self, path: &str) -> bool {
        let result = self.try_unlink(path).await;
        self.report("unlink", path, result).is_some()
    }

    pub async fn rename(&self, from: &str, to: &str) -> bool {
        let result = self.try_rename(from, to).await;
        self.report("rename", from, result).is_some()
    }

    pub async fn list_dir(&self, path: &str) -> Option<Vec<DirEntry>> {
        let result = self.try_list_dir(path).await;
        self.report("list_dir", path, result)
    }

    pub async fn open(&self, path: &str, flags: OpenFlags) -> Option<FileHandle> {
        let result = self.try_open(path, flags).await;
        self.report("open", path, result)
    }

    pub async fn write(&self, handle: &FileHandle, offset: u64, data: &[u8]) -> Option<usize> {
        let result = self.try_write(handle, offset, data).await;
        self.report("write", &handle.path, result)
    }

    pub async fn read(&self, handle: &FileHandle, offset: u64, len: usize) -> Option<Vec<u8>> {
        let result = self.try_read(handle, offset, len).await;
        self.report("read", &handle.path, result)
    }

    pub async fn flush(&self, handle: &FileHandle) -> bool {
        let result = self.try_flush(handle).await;
        self.report("flush", &handle.path, result).is_some()
    }

    pub async fn close_file(&self, handle: FileHandle) -> bool {
        let path = handle.path.clone();
        let result = self.try_close(handle).await;
        self.report("close", &path, result).is_some()
    }

    /// Round trip with NOOP
    pub async fn ping(&self) -> bool {
        let result = self.execute(Request::new(Command::NOOP)).await;
        self.report("ping", "", result).is_some()
    }
}
