use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::config::StoreConfig;
use crate::error::{FsError, ProtocolError};
use crate::protocol::handlers::failure;
use crate::protocol::{Command, CommandData, CommandResult, CommandStatus, handle_command};
use crate::session::Session;
use crate::session::registry::SharedSessionRegistry;

/// Outcome of reading one request line
pub(crate) enum LineRead {
    Line,
    TooLong(usize),
    Eof,
}

/// Reads one request line of at most `limit` bytes into `line`.
///
/// An over-long line is consumed up to its terminator, together with any
/// payload its leading fields announce, and reported as `TooLong`, so the
/// next read starts at a fresh request.
pub(crate) async fn read_request_line<R>(
    reader: &mut R,
    line: &mut String,
    limit: usize,
) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    // room for the CRLF terminator
    let cap = limit as u64 + 2;
    let n = (&mut *reader).take(cap).read_line(line).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }

    if line.ends_with('\n') {
        let len = line.trim_end_matches(['\r', '\n']).len();
        if len > limit {
            skip_announced_payload(reader, line).await?;
            return Ok(LineRead::TooLong(len));
        }
        return Ok(LineRead::Line);
    }

    if n as u64 == cap {
        let mut skipped = n;
        let mut sink = Vec::new();
        loop {
            sink.clear();
            let m = (&mut *reader).take(4096).read_until(b'\n', &mut sink).await?;
            skipped += m;
            if m == 0 || sink.ends_with(b"\n") {
                break;
            }
        }
        skip_announced_payload(reader, line).await?;
        return Ok(LineRead::TooLong(skipped));
    }

    // Last line of a stream without terminator
    Ok(LineRead::Line)
}

/// Discards the payload announced by a refused request line, so the bytes
/// are not taken for the next request.
async fn skip_announced_payload<R>(reader: &mut R, line: &str) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let Some(len) = Command::announced_payload_len(line) else {
        return Ok(());
    };

    let mut limited = (&mut *reader).take(len as u64);
    let drained = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
    if drained < len as u64 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    debug!("Skipped {} payload bytes of a refused request", drained);
    Ok(())
}

/// Reads the payload announced by `command`.
///
/// Payloads above `limit` are drained and refused so the stream stays in
/// sync with the client.
pub(crate) async fn read_payload<R>(
    reader: &mut R,
    command: &Command,
    limit: usize,
) -> io::Result<Result<Vec<u8>, ProtocolError>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(len) = command.payload_len() else {
        return Ok(Ok(Vec::new()));
    };

    if len > limit {
        let mut limited = (&mut *reader).take(len as u64);
        let drained = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if drained < len as u64 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        return Ok(Err(ProtocolError::PayloadTooLarge {
            declared: len,
            limit,
        }));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Ok(payload))
}

/// Writes the reply line and any trailing data of `result`.
pub(crate) async fn write_result<W>(writer: &mut W, result: &CommandResult) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(result.reply.to_line().as_bytes()).await?;
    match &result.data {
        Some(CommandData::Listing(lines)) => {
            for line in lines {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\r\n").await?;
            }
        }
        Some(CommandData::Bytes(bytes)) => writer.write_all(bytes).await?,
        None => {}
    }
    writer.flush().await
}

/// Handles a mounted session until the client quits or disconnects.
///
/// - Reads request lines (and their payloads) from `reader`.
/// - Dispatches them with `handle_command` against the session state.
/// - Keeps the shared session registry in step with remounts and removes
///   the session when the connection ends.
pub async fn handle_session(
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    mut session: Session,
    client_addr: SocketAddr,
    registry: SharedSessionRegistry,
    config: Arc<StoreConfig>,
) {
    let mut line = String::new();

    loop {
        let command = match read_request_line(&mut reader, &mut line, config.max_command_length).await
        {
            Ok(LineRead::Eof) => {
                info!("Connection closed by client {}", client_addr);
                break;
            }
            Ok(LineRead::TooLong(len)) => {
                let result = failure(&FsError::Protocol(ProtocolError::CommandTooLong(len)));
                if write_result(&mut writer, &result).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(LineRead::Line) => crate::protocol::parse_command(&line),
            Err(e) => {
                error!("Failed to read from {}: {}", client_addr, e);
                break;
            }
        };

        let result = match command {
            Ok(command) => {
                debug!("Received from {}: {}", client_addr, command.verb());
                match read_payload(&mut reader, &command, config.max_payload_size).await {
                    Ok(Ok(payload)) => {
                        let result = handle_command(&mut session, &command, &payload, &config);
                        if let (Command::MOUNT(volume), CommandStatus::Success) =
                            (&command, &result.status)
                        {
                            if let Err(e) = registry.lock().await.register(client_addr, volume) {
                                warn!("Failed to refresh session {}: {}", client_addr, e);
                            }
                        }
                        result
                    }
                    Ok(Err(e)) => failure(&FsError::Protocol(e)),
                    Err(e) => {
                        error!("Failed to read payload from {}: {}", client_addr, e);
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("Bad request from {}: {}", client_addr, e);
                failure(&FsError::Protocol(e))
            }
        };

        if let CommandStatus::Failure(reason) = &result.status {
            debug!("Request from {} failed: {}", client_addr, reason);
        }

        if let Err(e) = write_result(&mut writer, &result).await {
            error!("Failed to reply to {}: {}", client_addr, e);
            break;
        }

        if result.status == CommandStatus::CloseConnection {
            info!("Client {} requested to quit", client_addr);
            break;
        }
    }

    registry.lock().await.remove(&client_addr);
    info!(
        "Client {} disconnected ({} open files dropped)",
        client_addr,
        session.open_file_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_command;

    #[tokio::test]
    async fn reads_lines_and_skips_long_ones() {
        let input = format!("STAT /a\r\n{}\r\nNOOP\r\nlast", "x".repeat(100));
        let mut reader = BufReader::new(input.as_bytes());
        let mut line = String::new();

        assert!(matches!(
            read_request_line(&mut reader, &mut line, 64).await.unwrap(),
            LineRead::Line
        ));
        assert_eq!(line, "STAT /a\r\n");

        assert!(matches!(
            read_request_line(&mut reader, &mut line, 64).await.unwrap(),
            LineRead::TooLong(_)
        ));

        assert!(matches!(
            read_request_line(&mut reader, &mut line, 64).await.unwrap(),
            LineRead::Line
        ));
        assert_eq!(line, "NOOP\r\n");

        assert!(matches!(
            read_request_line(&mut reader, &mut line, 64).await.unwrap(),
            LineRead::Line
        ));
        assert_eq!(line, "last");

        assert!(matches!(
            read_request_line(&mut reader, &mut line, 64).await.unwrap(),
            LineRead::Eof
        ));
    }

    #[tokio::test]
    async fn long_line_payload_is_skipped() {
        let input = format!("APPE 5 /{}\r\nhelloMKD /d\r\n", "x".repeat(200));
        let mut reader = BufReader::new(input.as_bytes());
        let mut line = String::new();

        assert!(matches!(
            read_request_line(&mut reader, &mut line, 64).await.unwrap(),
            LineRead::TooLong(_)
        ));
        assert!(matches!(
            read_request_line(&mut reader, &mut line, 64).await.unwrap(),
            LineRead::Line
        ));
        assert_eq!(line, "MKD /d\r\n");
    }

    #[tokio::test]
    async fn oversized_payload_is_drained() {
        let input = b"0123456789NOOP\r\n".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let command = parse_command("APPE 10 /f").unwrap();

        let result = read_payload(&mut reader, &command, 4).await.unwrap();
        assert!(matches!(
            result,
            Err(ProtocolError::PayloadTooLarge {
                declared: 10,
                limit: 4
            })
        ));

        let mut line = String::new();
        read_request_line(&mut reader, &mut line, 64).await.unwrap();
        assert_eq!(line, "NOOP\r\n");
    }

    #[tokio::test]
    async fn payload_is_read_exactly() {
        let input = b"abcSTAT /\r\n".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let command = parse_command("APPE 3 /f").unwrap();
        assert_eq!(
            read_payload(&mut reader, &command, 16).await.unwrap().unwrap(),
            b"abc"
        );

        let stat = parse_command("STAT /").unwrap();
        assert!(read_payload(&mut reader, &stat, 16).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_follows_reply_line() {
        let result = CommandResult::success(crate::protocol::Reply::new(212, "2"))
            .with_data(CommandData::Listing(vec!["a|d|0|0".into(), "b|f|1|0".into()]));
        let mut out = Vec::new();
        write_result(&mut out, &result).await.unwrap();
        assert_eq!(out, b"212 2\r\na|d|0|0\r\nb|f|1|0\r\n");
    }
}
