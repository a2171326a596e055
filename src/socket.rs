use crate::types::{AppError, CommandSender, ControlCommand, Result};
use directories::ProjectDirs;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;

const SOCKET_FILE: &str = "fwctl.sock";

/// Gets the path for the control socket. Prefers /run/fwctl, then the
/// project runtime dir, then /tmp.
fn get_socket_path(config_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path_str) = config_path {
        return Ok(PathBuf::from(path_str));
    }

    let run_dir = Path::new("/run");
    if run_dir.exists() && run_dir.is_dir() {
        let app_run_dir = run_dir.join("fwctl");
        if std::fs::create_dir_all(&app_run_dir).is_ok() {
            return Ok(app_run_dir.join(SOCKET_FILE));
        }
    }

    if let Some(proj_dirs) = ProjectDirs::from("", "", "fwctl") {
        if let Some(runtime_dir) = proj_dirs.runtime_dir() {
            if std::fs::create_dir_all(runtime_dir).is_ok() {
                return Ok(runtime_dir.join(SOCKET_FILE));
            }
        }
    }

    Ok(Path::new("/tmp").join(SOCKET_FILE))
}

/// Line-oriented operator interface over a Unix domain socket:
/// `status`, `ping`, `shutdown`.
pub struct SocketHandler {
    socket_path: PathBuf,
    command_tx: CommandSender,
}

impl SocketHandler {
    pub async fn new(config_socket_path: Option<&str>, command_tx: CommandSender) -> Result<Self> {
        let socket_path = get_socket_path(config_socket_path)?;
        info!("Attempting to bind control socket at: {:?}", socket_path);

        if socket_path.exists() {
            warn!("Existing socket file found at {:?}. Removing.", socket_path);
            std::fs::remove_file(&socket_path).map_err(AppError::Io)?;
        }

        if let Some(parent) = socket_path.parent() {
            if !parent.exists() {
                info!("Creating socket directory: {:?}", parent);
                std::fs::create_dir_all(parent).map_err(AppError::Io)?;
            }
        }

        Ok(SocketHandler {
            socket_path,
            command_tx,
        })
    }

    pub async fn start(self) -> Result<()> {
        let listener = UnixListener::bind(&self.socket_path).map_err(AppError::Io)?;
        info!("Control socket listening on {}", self.socket_path.display());

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let sender = self.command_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, sender).await {
                            error!("Error handling socket connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(mut stream: UnixStream, sender: CommandSender) -> Result<()> {
        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();

        match reader.read_line(&mut line).await {
            Ok(0) => Ok(()),
            Ok(_) => {
                let command = line.trim();
                info!("Received command: {}", command);

                match command {
                    "status" => {
                        let (tx, rx) = oneshot::channel();
                        sender
                            .send(ControlCommand::Status { response_tx: tx })
                            .await
                            .map_err(|e| {
                                AppError::ChannelSend(format!(
                                    "Failed to send Status command: {}",
                                    e
                                ))
                            })?;
                        Self::relay_response(&mut stream, rx).await
                    }
                    "ping" => {
                        let (tx, rx) = oneshot::channel();
                        sender
                            .send(ControlCommand::Ping { response_tx: tx })
                            .await
                            .map_err(|e| {
                                AppError::ChannelSend(format!("Failed to send Ping command: {}", e))
                            })?;
                        Self::relay_response(&mut stream, rx).await
                    }
                    "shutdown" => {
                        info!("Shutdown command received via socket.");
                        sender.send(ControlCommand::Shutdown).await.map_err(|e| {
                            AppError::ChannelSend(format!("Failed to send Shutdown command: {}", e))
                        })?;
                        stream
                            .write_all(b"OK: Shutdown command sent\n")
                            .await
                            .map_err(AppError::Io)
                    }
                    _ => stream
                        .write_all(b"ERROR: Unknown command\n")
                        .await
                        .map_err(AppError::Io),
                }
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn relay_response(stream: &mut UnixStream, rx: oneshot::Receiver<String>) -> Result<()> {
        match rx.await {
            Ok(response) => {
                stream
                    .write_all(response.as_bytes())
                    .await
                    .map_err(AppError::Io)?;
                stream.write_all(b"\n").await.map_err(AppError::Io)
            }
            Err(e) => {
                let err_msg = format!("Failed to receive response: {}", e);
                error!("{}", err_msg);
                stream
                    .write_all(format!("ERROR: {}\n", err_msg).as_bytes())
                    .await
                    .map_err(AppError::Io)?;
                Err(AppError::ChannelRecv(err_msg))
            }
        }
    }
}

// Testing socket interaction requires integration tests against a live
// listener; command parsing is trivial enough to leave untested here.
