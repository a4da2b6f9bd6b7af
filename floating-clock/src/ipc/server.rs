//! Unix domain socket server for IPC

use crate::service::TimerHandle;
use anyhow::{bail, Result};
use floating_clock_ipc::{encode_line, Call, Reply, Request, Response, RpcError};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, trace, warn};

/// Listening socket, removed from disk when dropped
pub struct Server {
    listener: UnixListener,
    path: PathBuf,
}

impl Server {
    /// Binds `path`, replacing a stale socket file. Fails if another
    /// daemon still answers on it.
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                bail!("Another floating-clockd is listening on {:?}", path);
            }
            debug!("Removing stale socket {:?}", path);
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        info!("IPC server listening on {:?}", path);
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub async fn serve(&self, timer: TimerHandle) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let timer = timer.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, timer).await {
                            error!("Error handling client: {}", e);
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

impl Drop for Server {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_client(stream: UnixStream, timer: TimerHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    debug!("Client connected");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = Response::from(process(&line, &timer).await);
        writer.write_all(&encode_line(&response)?).await?;
    }

    debug!("Client disconnected");
    Ok(())
}

async fn process(line: &str, timer: &TimerHandle) -> Result<Reply, RpcError> {
    let call: Call =
        serde_json::from_str(line).map_err(|e| RpcError::Malformed(e.to_string()))?;
    let request = Request::try_from(call).map_err(|e| {
        warn!("Rejected call: {}", e);
        e
    })?;
    if request.is_query() {
        trace!("Call {}", request.name());
    } else {
        debug!("Call {}", request.name());
    }
    timer.call(request).await
}
