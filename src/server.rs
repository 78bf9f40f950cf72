use std::{
    fs,
    io::ErrorKind,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    protocol::{ClientCommand, ClientRequest, ServerResponse, encode_response, parse_client_request},
    provider::ProviderCredentials,
    service::{AcquisitionService, StartRequest},
};

/// NDJSON listener in front of [`AcquisitionService`]. Every request line is
/// served on its own task, so a `stop` can arrive on the same connection
/// while a `start` is still running.
pub struct UnixSocketServer {
    socket_path: PathBuf,
}

impl UnixSocketServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn run(
        &self,
        service: Arc<AcquisitionService>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        prepare_socket_path(&self.socket_path)?;
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("unable to bind socket {}", self.socket_path.display()))?;
        tracing::info!(
            target: "server",
            socket_path = %self.socket_path.display(),
            "listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let service = Arc::clone(&service);
                            tokio::spawn(async move {
                                if let Err(err) = handle_client(stream, service).await {
                                    tracing::warn!(target: "server", error = %format!("{err:#}"), "client_handling_failed");
                                }
                            });
                        }
                        Err(err) => {
                            tracing::warn!(target: "server", error = %err, "accept_failed");
                        }
                    }
                }
            }
        }

        cleanup_socket_path(&self.socket_path)?;
        tracing::info!(target: "server", "listener_closed");
        Ok(())
    }
}

async fn handle_client(stream: UnixStream, service: Arc<AcquisitionService>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerResponse>();

    let writer_task = tokio::spawn(async move {
        while let Some(response) = outbound_rx.recv().await {
            let encoded = encode_response(&response)?;
            write_half.write_all(encoded.as_bytes()).await?;
            write_half.flush().await?;
        }

        Ok::<(), anyhow::Error>(())
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_client_request(line) {
            Ok(request) => {
                let service = Arc::clone(&service);
                let outbound_tx = outbound_tx.clone();
                tokio::spawn(async move {
                    let response = dispatch(&service, request).await;
                    let _ = outbound_tx.send(response);
                });
            }
            Err(err) => {
                tracing::debug!(target: "server", error = %err, "invalid_request_line");
                let _ = outbound_tx.send(ServerResponse::invalid_request(format!(
                    "invalid request: {err}"
                )));
            }
        }
    }
    drop(outbound_tx);

    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(target: "server", error = %format!("{err:#}"), "socket_writer_failed"),
        Err(err) => tracing::warn!(target: "server", error = %err, "socket_writer_join_failed"),
    }

    Ok(())
}

pub async fn dispatch(service: &AcquisitionService, request: ClientRequest) -> ServerResponse {
    let ClientRequest {
        request_id,
        command,
    } = request;
    tracing::debug!(
        target: "server",
        command = command.name(),
        session_id = %command.session_id(),
        "request_received"
    );

    match command {
        ClientCommand::Start {
            session_id,
            access_key_id,
            secret_access_key,
            session_token,
            region,
        } => {
            let credentials = ProviderCredentials::new(access_key_id, secret_access_key, region)
                .with_session_token(session_token);
            match service
                .start_or_resume(StartRequest {
                    session_id,
                    credentials,
                })
                .await
            {
                Ok(report) => ServerResponse::run_finished(request_id, report),
                Err(err) => ServerResponse::from_error(request_id, &err),
            }
        }
        ClientCommand::Stop { session_id } => match service.request_stop(&session_id).await {
            Ok(status) => ServerResponse::StopAcknowledged { request_id, status },
            Err(err) => ServerResponse::from_error(request_id, &err),
        },
        ClientCommand::Status { session_id } => match service.read_status(&session_id).await {
            Ok(status) => ServerResponse::Status { request_id, status },
            Err(err) => ServerResponse::from_error(request_id, &err),
        },
    }
}

fn prepare_socket_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create {}", parent.display()))?;
    }

    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.file_type().is_socket() || metadata.is_file() {
                fs::remove_file(path)
                    .with_context(|| format!("unable to remove stale socket {}", path.display()))?;
            } else {
                bail!(
                    "socket path exists but is not removable as file/socket: {}",
                    path.display()
                );
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("unable to inspect {}", path.display()));
        }
    }

    Ok(())
}

fn cleanup_socket_path(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("unable to remove {}", path.display())),
    }
}
