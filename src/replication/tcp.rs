//! Length-prefixed, JSON-framed transport over `tokio::net::TcpStream`.
//! A tagged `FILE_TRANSFER` channel carries the destination path as its
//! first message, then raw chunks streamed until an empty buffer signals
//! end-of-stream.

use super::transport::{CancelSignal, ReplicationTransport};
use crate::config::ReplicationTimeouts;
use crate::error::{CoreError, Result};
use crate::identity::CoreIdentity;
use crate::storage_core::StorageCore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Serialize, Deserialize)]
enum Message {
    ReceiveBackupRequest { mpu_id: String, core_id: String },
    ReceiveBackupResponse { path: PathBuf },
    ApplyBackupRequest { mpu_id: String, core_id: String },
    ApplyBackupResponse,
    FileTransferHeader { relative_path: PathBuf },
    FileChunk { bytes: Vec<u8> },
    Ack,
    Cancel,
    Error { message: String },
}

async fn write_frame(stream: &mut TcpStream, message: &Message) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::Transfer("frame too large".to_string()))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Message> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Client side of the wire protocol: one fresh TCP connection per RPC or
/// file transfer, so no shared-connection state survives between calls.
pub struct TcpTransport {
    addr: SocketAddr,
    timeouts: ReplicationTimeouts,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr, timeouts: ReplicationTimeouts) -> Self {
        Self { addr, timeouts }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let connect = TcpStream::connect(self.addr);
        let stream = tokio::time::timeout(
            std::time::Duration::from_millis(self.timeouts.rpc_timeout_ms),
            connect,
        )
        .await
        .map_err(|_| CoreError::Transfer(format!("connect to {} timed out", self.addr)))??;
        Ok(stream)
    }

    async fn request(&self, message: Message) -> Result<Message> {
        let mut stream = self.connect().await?;
        write_frame(&mut stream, &message).await?;
        let response = tokio::time::timeout(
            std::time::Duration::from_millis(self.timeouts.rpc_timeout_ms),
            read_frame(&mut stream),
        )
        .await
        .map_err(|_| CoreError::Transfer(format!("request to {} timed out", self.addr)))??;
        Ok(response)
    }
}

#[async_trait]
impl ReplicationTransport for TcpTransport {
    async fn receive_backup(&self, target: &CoreIdentity) -> Result<PathBuf> {
        let response = self
            .request(Message::ReceiveBackupRequest {
                mpu_id: target.mpu_id.clone(),
                core_id: target.core_id.clone(),
            })
            .await?;
        match response {
            Message::ReceiveBackupResponse { path } => Ok(path),
            Message::Error { message } => Err(CoreError::Transfer(message)),
            other => Err(CoreError::Transfer(format!("unexpected reply {other:?}"))),
        }
    }

    async fn apply_backup(&self, target: &CoreIdentity) -> Result<()> {
        let response = self
            .request(Message::ApplyBackupRequest {
                mpu_id: target.mpu_id.clone(),
                core_id: target.core_id.clone(),
            })
            .await?;
        match response {
            Message::ApplyBackupResponse => Ok(()),
            Message::Error { message } => Err(CoreError::Transfer(message)),
            other => Err(CoreError::Transfer(format!("unexpected reply {other:?}"))),
        }
    }

    async fn stream_file(
        &self,
        _target: &CoreIdentity,
        local_path: &Path,
        remote_relative_path: &Path,
        mut cancel: CancelSignal,
    ) -> Result<()> {
        let mut stream = self.connect().await?;
        write_frame(
            &mut stream,
            &Message::FileTransferHeader {
                relative_path: remote_relative_path.to_path_buf(),
            },
        )
        .await?;

        let mut file = tokio::fs::File::open(local_path).await?;
        let mut buf = vec![0u8; self.timeouts.file_chunk_bytes];
        loop {
            if *cancel.borrow() {
                write_frame(&mut stream, &Message::Cancel).await?;
                return Err(CoreError::Cancelled);
            }
            let read = file.read(&mut buf).await?;
            if read == 0 {
                write_frame(&mut stream, &Message::FileChunk { bytes: Vec::new() }).await?;
                break;
            }
            write_frame(
                &mut stream,
                &Message::FileChunk {
                    bytes: buf[..read].to_vec(),
                },
            )
            .await?;
        }

        match read_frame(&mut stream).await? {
            Message::Ack => Ok(()),
            Message::Error { message } => Err(CoreError::Transfer(message)),
            other => Err(CoreError::Transfer(format!("unexpected reply {other:?}"))),
        }
    }
}

/// Server loop for the `rangecore serve` CLI subcommand: accepts
/// connections and dispatches each to the local `StorageCore`'s
/// follower-side entry points or the file-transfer write path.
pub async fn serve(listener: TcpListener, core: Arc<StorageCore>) -> Result<()> {
    loop {
        let (stream, _peer) = listener.accept().await?;
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, core).await {
                tracing::warn!(error = %err, "replication connection failed");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, core: Arc<StorageCore>) -> Result<()> {
    match read_frame(&mut stream).await? {
        Message::ReceiveBackupRequest { .. } => {
            let response = match core.receive_backup().await {
                Ok(path) => Message::ReceiveBackupResponse { path },
                Err(err) => Message::Error {
                    message: err.to_string(),
                },
            };
            write_frame(&mut stream, &response).await
        }
        Message::ApplyBackupRequest { .. } => {
            let response = match core.apply_backup().await {
                Ok(()) => Message::ApplyBackupResponse,
                Err(err) => Message::Error {
                    message: err.to_string(),
                },
            };
            write_frame(&mut stream, &response).await
        }
        Message::FileTransferHeader { relative_path } => {
            let dest = core.paths().remote_checkpoint_dir().join(&relative_path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if dest.exists() {
                tokio::fs::remove_file(&dest).await?;
            }
            let mut file = tokio::fs::File::create(&dest).await?;
            loop {
                match read_frame(&mut stream).await? {
                    Message::FileChunk { bytes } if bytes.is_empty() => break,
                    Message::FileChunk { bytes } => {
                        file.write_all(&bytes).await?;
                    }
                    Message::Cancel => {
                        drop(file);
                        tokio::fs::remove_file(&dest).await.ok();
                        return Err(CoreError::Cancelled);
                    }
                    other => {
                        return Err(CoreError::Transfer(format!(
                            "unexpected message during file transfer: {other:?}"
                        )))
                    }
                }
            }
            file.flush().await?;
            write_frame(&mut stream, &Message::Ack).await
        }
        other => write_frame(
            &mut stream,
            &Message::Error {
                message: format!("unexpected request: {other:?}"),
            },
        ),
    }
}
