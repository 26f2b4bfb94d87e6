use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::config::StoreConfig;
use crate::error::FsError;
use crate::protocol::handlers::failure;
use crate::protocol::responses::{self, Reply};
use crate::protocol::{CommandResult, CommandStatus, handle_mount_command, parse_command};
use crate::session::handler::{LineRead, read_payload, read_request_line, write_result};
use crate::session::{Session, SessionRegistry, SharedSessionRegistry, handle_session};

pub struct Server {
    session_registry: SharedSessionRegistry,
    listener: TcpListener,
    config: Arc<StoreConfig>,
}

impl Server {
    /// Binds the control socket and prepares one directory per volume.
    pub async fn new(config: StoreConfig) -> Result<Self, FsError> {
        config.validate()?;

        for volume in &config.volumes {
            let root = config.volume_root(volume);
            std::fs::create_dir_all(&root).map_err(|e| {
                error!("Failed to create volume {} at {}: {}", volume, root.display(), e);
                e
            })?;
        }
        info!(
            "Store root {} with volumes {:?}",
            config.store_root, config.volumes
        );

        let socket = config.control_socket();
        let listener = TcpListener::bind(&socket).await.map_err(|e| {
            error!("Failed to bind to {}: {}", socket, e);
            e
        })?;
        info!("Server bound to {}", listener.local_addr()?);

        Ok(Self {
            session_registry: Arc::new(Mutex::new(SessionRegistry::new(config.max_clients))),
            listener,
            config: Arc::new(config),
        })
    }

    /// Address actually bound, useful with port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn session_registry(&self) -> SharedSessionRegistry {
        Arc::clone(&self.session_registry)
    }

    pub async fn start(&self) {
        info!(
            "Starting RAX FS store on {} (max {} clients)",
            self.config.control_socket(),
            self.config.max_clients
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let session_registry = Arc::clone(&self.session_registry);
                    let config = Arc::clone(&self.config);

                    // Spawn a task for each client so accept loop doesn't block
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_new_client(stream, addr, session_registry, config).await
                        {
                            warn!("Failed to handle client {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Handles a new client: greets, waits for a volume mount, registers the
/// session and hands it to the session loop.
async fn handle_new_client(
    stream: TcpStream,
    client_addr: SocketAddr,
    session_registry: SharedSessionRegistry,
    config: Arc<StoreConfig>,
) -> Result<(), std::io::Error> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    let greeting = CommandResult::success(Reply::new(responses::READY, "RAX FS store ready"));
    write_result(&mut writer, &greeting).await?;

    let mut session = Session::new(client_addr);

    loop {
        let command = match read_request_line(&mut reader, &mut line, config.max_command_length)
            .await?
        {
            LineRead::Eof => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "Client disconnected before mounting a volume",
                ));
            }
            LineRead::TooLong(len) => Err(crate::error::ProtocolError::CommandTooLong(len)),
            LineRead::Line => parse_command(&line),
        };

        let result = match command {
            Ok(command) => {
                // Payloads sent before mounting are discarded
                if let Err(e) = read_payload(&mut reader, &command, config.max_payload_size).await? {
                    warn!("Dropped payload from unmounted client {}: {}", client_addr, e);
                }
                handle_mount_command(&mut session, &command, &config)
            }
            Err(e) => failure(&FsError::Protocol(e)),
        };

        if result.status == CommandStatus::CloseConnection {
            write_result(&mut writer, &result).await?;
            return Ok(());
        }

        if !session.is_mounted() {
            write_result(&mut writer, &result).await?;
            continue;
        }

        let volume = session.volume().unwrap_or_default().to_string();
        let mut sessions = session_registry.lock().await;
        if let Err(e) = sessions.register(client_addr, &volume) {
            drop(sessions);
            session.unmount();
            warn!("Refused client {}: {}", client_addr, e);
            write_result(&mut writer, &failure(&FsError::Session(e))).await?;
            return Ok(()); // Close connection
        }

        info!(
            "Client {} mounted volume {} ({}/{} clients)",
            client_addr,
            volume,
            sessions.len(),
            sessions.max_sessions()
        );
        drop(sessions);

        write_result(&mut writer, &result).await?;
        break;
    }

    // Hand off to session handler
    handle_session(reader, writer, session, client_addr, session_registry, config).await;
    Ok(())
}
