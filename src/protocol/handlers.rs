//! Command handlers module for the RAX FS store.
//!
//! This module defines handler functions for store requests: volume
//! mounting, directory management, file creation and append, status,
//! rename, listing and descriptor based I/O.

use log::{info, warn};

use crate::config::StoreConfig;
use crate::error::{FsError, ProtocolError, SessionError, StorageError, error_to_reply};
use crate::protocol::responses::{self, Reply};
use crate::protocol::{Command, CommandData, CommandResult, CommandStatus};
use crate::session::{OpenFile, Session};
use crate::storage::operations;
use crate::storage::validation::is_valid_volume_name;
use crate::storage::OpenFlags;

type HandlerResult = Result<CommandResult, FsError>;

/// Dispatches a request of a mounted session to its handler.
///
/// `payload` holds the bytes that followed an APPE or WRITE line and is
/// empty otherwise.
pub fn handle_command(
    session: &mut Session,
    command: &Command,
    payload: &[u8],
    config: &StoreConfig,
) -> CommandResult {
    // A pending rename only survives until the next request
    if !matches!(command, Command::RNTO(_)) {
        session.take_rename_from();
    }

    let result = match command {
        Command::MOUNT(volume) => handle_cmd_mount(session, volume, config),
        Command::QUIT => Ok(handle_cmd_quit(session)),
        Command::NOOP => Ok(CommandResult::success(Reply::new(responses::OK, "OK"))),
        Command::MKD(path) => handle_cmd_mkd(session, path),
        Command::CRT { size, path } => handle_cmd_crt(session, path, *size),
        Command::APPE { path, .. } => handle_cmd_appe(session, path, payload),
        Command::STAT(path) => handle_cmd_stat(session, path),
        Command::RMD { recursive, path } => handle_cmd_rmd(session, path, *recursive),
        Command::DELE(path) => handle_cmd_dele(session, path),
        Command::RNFR(path) => handle_cmd_rnfr(session, path),
        Command::RNTO(path) => handle_cmd_rnto(session, path),
        Command::LIST(path) => handle_cmd_list(session, path),
        Command::OPEN { flags, path } => handle_cmd_open(session, path, *flags),
        Command::WRITE { fd, offset, .. } => handle_cmd_write(session, *fd, *offset, payload),
        Command::READ { fd, offset, len } => {
            handle_cmd_read(session, *fd, *offset, *len, config)
        }
        Command::FLUSH(fd) => handle_cmd_flush(session, *fd),
        Command::CLOSE(fd) => handle_cmd_close(session, *fd),
    };

    result.unwrap_or_else(|err| failure(&err))
}

/// Handles requests of a session that has not mounted a volume yet.
pub fn handle_mount_command(
    session: &mut Session,
    command: &Command,
    config: &StoreConfig,
) -> CommandResult {
    match command {
        Command::MOUNT(volume) => {
            handle_cmd_mount(session, volume, config).unwrap_or_else(|err| failure(&err))
        }
        Command::QUIT => handle_cmd_quit(session),
        Command::NOOP => CommandResult::success(Reply::new(responses::OK, "OK")),
        _ => failure(&FsError::Session(SessionError::NotMounted)),
    }
}

/// Builds the failure result for `err`
pub fn failure(err: &FsError) -> CommandResult {
    CommandResult::failure(err.to_string(), error_to_reply(err))
}

fn handle_cmd_mount(session: &mut Session, volume: &str, config: &StoreConfig) -> HandlerResult {
    if !is_valid_volume_name(volume) || !config.has_volume(volume) {
        warn!("Refused mount of unknown volume {:?}", volume);
        return Err(SessionError::UnknownVolume(volume.to_string()).into());
    }

    let root = config.volume_root(volume);
    if !root.is_dir() {
        return Err(StorageError::DirectoryNotFound(root.display().to_string()).into());
    }

    session.mount(volume, root);
    Ok(CommandResult::success(Reply::new(
        responses::MOUNTED,
        format!("Volume {} mounted", volume),
    )))
}

/// Handles the QUIT command: drops session state and signals connection close.
fn handle_cmd_quit(session: &mut Session) -> CommandResult {
    session.unmount();

    CommandResult {
        status: CommandStatus::CloseConnection,
        reply: Reply::new(responses::GOODBYE, "Goodbye"),
        data: None,
    }
}

fn handle_cmd_mkd(session: &mut Session, path: &str) -> HandlerResult {
    let created = operations::make_directories(session.volume_root()?, path)?;
    Ok(CommandResult::success(Reply::new(
        responses::CREATED,
        format!("\"{}\" created", created),
    )))
}

fn handle_cmd_crt(session: &mut Session, path: &str, size: u64) -> HandlerResult {
    operations::create_file(session.volume_root()?, path, size)?;
    Ok(CommandResult::success(Reply::new(
        responses::ACTION_OK,
        "File created",
    )))
}

fn handle_cmd_appe(session: &mut Session, path: &str, payload: &[u8]) -> HandlerResult {
    let size = operations::append_file(session.volume_root()?, path, payload)?;
    Ok(CommandResult::success(Reply::new(
        responses::ACTION_OK,
        format!("{} bytes appended, size {}", payload.len(), size),
    )))
}

fn handle_cmd_stat(session: &mut Session, path: &str) -> HandlerResult {
    let stat = operations::stat(session.volume_root()?, path)?;
    Ok(CommandResult::success(Reply::new(
        responses::FILE_STATUS,
        stat.to_string(),
    )))
}

fn handle_cmd_rmd(session: &mut Session, path: &str, recursive: bool) -> HandlerResult {
    operations::remove_directory(session.volume_root()?, path, recursive)?;
    Ok(CommandResult::success(Reply::new(
        responses::ACTION_OK,
        "Directory removed",
    )))
}

fn handle_cmd_dele(session: &mut Session, path: &str) -> HandlerResult {
    operations::delete_file(session.volume_root()?, path)?;
    Ok(CommandResult::success(Reply::new(
        responses::ACTION_OK,
        "File removed",
    )))
}

/// Handles RNFR: remembers the source for the following RNTO.
fn handle_cmd_rnfr(session: &mut Session, path: &str) -> HandlerResult {
    let root = session.volume_root()?;
    let (real_path, virtual_path) = crate::storage::resolve_and_validate_path(root, path)?;
    if !real_path.exists() {
        return Err(StorageError::FileNotFound(virtual_path).into());
    }

    session.set_rename_from(virtual_path);
    Ok(CommandResult::success(Reply::new(
        responses::PENDING,
        "Ready for destination",
    )))
}

fn handle_cmd_rnto(session: &mut Session, path: &str) -> HandlerResult {
    let Some(from) = session.take_rename_from() else {
        return Err(SessionError::InvalidState("RNTO without RNFR".into()).into());
    };

    let to = operations::rename(session.volume_root()?, &from, path)?;
    Ok(CommandResult::success(Reply::new(
        responses::ACTION_OK,
        format!("Renamed to {}", to),
    )))
}

fn handle_cmd_list(session: &mut Session, path: &str) -> HandlerResult {
    let entries = operations::list_directory(session.volume_root()?, path)?;
    let lines: Vec<String> = entries.iter().map(|e| e.to_string()).collect();

    Ok(
        CommandResult::success(Reply::new(responses::DIRECTORY_LISTING, lines.len().to_string()))
            .with_data(CommandData::Listing(lines)),
    )
}

fn handle_cmd_open(session: &mut Session, path: &str, flags: OpenFlags) -> HandlerResult {
    let (file, virtual_path) = operations::open_file(session.volume_root()?, path, flags)?;
    let fd = session.alloc_fd(OpenFile {
        file,
        path: virtual_path.clone(),
        flags,
    });

    info!("Opened {} as fd {} ({})", virtual_path, fd, flags);
    Ok(CommandResult::success(Reply::new(responses::OK, fd.to_string())))
}

fn handle_cmd_write(session: &mut Session, fd: u64, offset: u64, payload: &[u8]) -> HandlerResult {
    let open = session.file_mut(fd)?;
    if !open.flags.is_writable() {
        return Err(StorageError::PermissionDenied(open.path.clone()).into());
    }

    let n = operations::write_at(&mut open.file, offset, payload, open.flags.append)
        .map_err(StorageError::from)?;
    Ok(CommandResult::success(Reply::new(responses::ACTION_OK, n.to_string())))
}

fn handle_cmd_read(
    session: &mut Session,
    fd: u64,
    offset: u64,
    len: usize,
    config: &StoreConfig,
) -> HandlerResult {
    if len > config.max_payload_size {
        return Err(ProtocolError::PayloadTooLarge {
            declared: len,
            limit: config.max_payload_size,
        }
        .into());
    }

    let open = session.file_mut(fd)?;
    if !open.flags.read {
        return Err(StorageError::PermissionDenied(open.path.clone()).into());
    }

    let data = operations::read_at(&mut open.file, offset, len).map_err(StorageError::from)?;
    Ok(CommandResult::success(Reply::new(
        responses::OPENING_TRANSFER,
        data.len().to_string(),
    ))
    .with_data(CommandData::Bytes(data)))
}

/// Handles FLUSH: syncs the file data of an open descriptor.
fn handle_cmd_flush(session: &mut Session, fd: u64) -> HandlerResult {
    let open = session.file_mut(fd)?;
    open.file.sync_data().map_err(StorageError::from)?;
    Ok(CommandResult::success(Reply::new(responses::ACTION_OK, "Flushed")))
}

fn handle_cmd_close(session: &mut Session, fd: u64) -> HandlerResult {
    let open = session.release_fd(fd)?;
    if open.flags.is_writable() {
        open.file.sync_data().map_err(StorageError::from)?;
    }

    Ok(CommandResult::success(Reply::new(responses::ACTION_OK, "Closed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Errno;
    use crate::protocol::parse_command;
    use crate::storage::StatInfo;

    struct Fixture {
        _root: tempfile::TempDir,
        config: StoreConfig,
        session: Session,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            std::fs::create_dir(root.path().join("ltptest")).unwrap();
            let config = StoreConfig {
                store_root: root.path().to_string_lossy().to_string(),
                ..StoreConfig::default()
            };
            let mut session = Session::default();
            let result = handle_mount_command(
                &mut session,
                &Command::MOUNT("ltptest".into()),
                &config,
            );
            assert_eq!(result.reply.code, responses::MOUNTED);
            Self {
                _root: root,
                config,
                session,
            }
        }

        fn run(&mut self, line: &str) -> CommandResult {
            self.run_with(line, b"")
        }

        fn run_with(&mut self, line: &str, payload: &[u8]) -> CommandResult {
            let command = parse_command(line).unwrap();
            handle_command(&mut self.session, &command, payload, &self.config)
        }
    }

    #[test]
    fn requests_before_mount_are_refused() {
        let mut session = Session::default();
        let config = StoreConfig::default();
        let result = handle_mount_command(&mut session, &Command::STAT("/".into()), &config);
        assert_eq!(result.reply.code, responses::NOT_MOUNTED);

        let result = handle_mount_command(&mut session, &Command::MOUNT("nope".into()), &config);
        assert_eq!(result.reply.code, responses::NOT_MOUNTED);
        assert_eq!(result.reply.errno(), Some(Errno::ENOENT));
        assert!(!session.is_mounted());
    }

    #[test]
    fn append_scenario() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("MKD /test/append").reply.code, responses::CREATED);
        assert_eq!(fx.run("CRT 0 /test/append/f0").reply.code, responses::ACTION_OK);
        assert_eq!(
            fx.run_with("APPE 4 /test/append/f0", b"abcd").reply.code,
            responses::ACTION_OK
        );
        assert_eq!(
            fx.run_with("APPE 4 /test/append/f0", b"efgh").reply.code,
            responses::ACTION_OK
        );

        let result = fx.run("STAT /test/append/f0");
        assert_eq!(result.reply.code, responses::FILE_STATUS);
        let stat: StatInfo = result.reply.text.parse().unwrap();
        assert_eq!(stat.size, 8);
        assert!(stat.is_file());

        assert_eq!(fx.run("RMD 1 /test/append").reply.code, responses::ACTION_OK);
        assert_eq!(fx.run("STAT /test/append").reply.errno(), Some(Errno::ENOENT));
    }

    #[test]
    fn append_under_missing_parent_fails() {
        let mut fx = Fixture::new();
        let result = fx.run_with("APPE 1 /test/append/d0/f0", b"x");
        assert_eq!(result.reply.code, responses::ACTION_NOT_TAKEN);
        assert_eq!(result.reply.errno(), Some(Errno::ENOENT));
        assert!(matches!(result.status, CommandStatus::Failure(_)));
    }

    #[test]
    fn rmdir_non_recursive_on_full_directory() {
        let mut fx = Fixture::new();
        fx.run("MKD /d");
        fx.run_with("APPE 1 /d/f", b"x");
        assert_eq!(fx.run("RMD 0 /d").reply.errno(), Some(Errno::ENOTEMPTY));
    }

    #[test]
    fn rename_sequence() {
        let mut fx = Fixture::new();
        fx.run_with("APPE 1 /a", b"x");

        assert_eq!(fx.run("RNTO /b").reply.code, responses::BAD_SEQUENCE);
        assert_eq!(fx.run("RNFR /a").reply.code, responses::PENDING);
        assert_eq!(fx.run("RNTO /b").reply.code, responses::ACTION_OK);
        assert_eq!(fx.run("STAT /b").reply.code, responses::FILE_STATUS);

        // any other request cancels the pending rename
        fx.run("RNFR /b");
        fx.run("NOOP");
        assert_eq!(fx.run("RNTO /c").reply.code, responses::BAD_SEQUENCE);
    }

    #[test]
    fn listing_carries_entries() {
        let mut fx = Fixture::new();
        fx.run("MKD /dir");
        fx.run_with("APPE 2 /file", b"hi");

        let result = fx.run("LIST /");
        assert_eq!(result.reply.text, "2");
        match result.data {
            Some(CommandData::Listing(lines)) => {
                assert!(lines[0].starts_with("dir|d|0|"));
                assert!(lines[1].starts_with("file|f|2|"));
            }
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn descriptor_io() {
        let mut fx = Fixture::new();
        let result = fx.run("OPEN wc /f");
        assert_eq!(result.reply.code, responses::OK);
        let fd: u64 = result.reply.text.parse().unwrap();

        let result = fx.run_with(&format!("WRITE {} 0 5", fd), b"hello");
        assert_eq!(result.reply.text, "5");
        let result = fx.run(&format!("READ {} 0 5", fd));
        assert_eq!(result.reply.errno(), Some(Errno::EACCES));
        assert_eq!(fx.run(&format!("CLOSE {}", fd)).reply.code, responses::ACTION_OK);
        assert_eq!(fx.run(&format!("CLOSE {}", fd)).reply.errno(), Some(Errno::EBADF));

        let fd: u64 = fx.run("OPEN r /f").reply.text.parse().unwrap();
        let result = fx.run(&format!("READ {} 1 3", fd));
        assert_eq!(result.reply.code, responses::OPENING_TRANSFER);
        assert_eq!(result.data, Some(CommandData::Bytes(b"ell".to_vec())));

        let result = fx.run_with(&format!("WRITE {} 0 1", fd), b"x");
        assert_eq!(result.reply.errno(), Some(Errno::EACCES));
    }

    #[test]
    fn flush_syncs_open_descriptor() {
        let mut fx = Fixture::new();
        let fd: u64 = fx.run("OPEN wac /log").reply.text.parse().unwrap();
        fx.run_with(&format!("WRITE {} 0 3", fd), b"abc");

        let result = fx.run(&format!("FLUSH {}", fd));
        assert_eq!(result.reply.code, responses::ACTION_OK);
        assert_eq!(fx.run("STAT /log").reply.text.parse::<StatInfo>().unwrap().size, 3);

        // the descriptor stays open after a flush
        assert_eq!(fx.run(&format!("CLOSE {}", fd)).reply.code, responses::ACTION_OK);
        assert_eq!(fx.run(&format!("FLUSH {}", fd)).reply.errno(), Some(Errno::EBADF));
    }

    #[test]
    fn quit_closes_connection() {
        let mut fx = Fixture::new();
        let result = fx.run("QUIT");
        assert_eq!(result.status, CommandStatus::CloseConnection);
        assert!(!fx.session.is_mounted());
    }
}
