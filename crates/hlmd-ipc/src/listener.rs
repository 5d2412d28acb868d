//! Unix-socket listener.
//!
//! Each accepted connection gets its own task and client id. Lines are
//! answered in arrival order; a line that cannot be decoded, or runs past
//! the framing cap, is answered with a protocol error and the connection
//! stays open. Write failures are only logged, since the peer may simply
//! have gone away.

use crate::error::{IpcError, IpcResult};
use crate::framer::{Frame, LineFramer};
use hlmd_core::{Clock, SystemClock};
use hlmd_rpc::{
    decode_line, DecodeError, ProtocolError, RequestContext, RpcGateway, RpcResponse, FALLBACK_ID,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Decode one line and run it through the gateway.
pub fn respond(gateway: &RpcGateway, line: &str, ctx: &RequestContext) -> RpcResponse {
    match decode_line(line) {
        Ok(request) => gateway.handle(&request, ctx),
        Err(err) => gateway.protocol_error(&err, ctx),
    }
}

/// Accepts local clients and serves RPC over newline-delimited JSON.
pub struct IpcListener {
    listener: UnixListener,
    socket_path: PathBuf,
    gateway: Arc<RpcGateway>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
    next_seq: AtomicU64,
}

impl IpcListener {
    /// Bind at `socket_path`, replacing a leftover socket file.
    pub fn bind(socket_path: impl AsRef<Path>, gateway: Arc<RpcGateway>) -> IpcResult<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        remove_stale_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|source| IpcError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;

        info!(path = %socket_path.display(), "IPC listener bound");

        Ok(Self {
            listener,
            socket_path,
            gateway,
            shutdown: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
            next_seq: AtomicU64::new(0),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Token that stops the accept loop and every open connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept until the shutdown token is cancelled.
    pub async fn run(self) -> IpcResult<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(
                        active = self.active.load(Ordering::Relaxed),
                        "IPC listener stopping"
                    );
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => self.spawn_connection(stream),
                        Err(e) => warn!(error = %e, "IPC accept failed"),
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let ctx = RequestContext::new(client_id(&stream, SystemClock.now_ms(), seq));
        let gateway = self.gateway.clone();
        let cancel = self.shutdown.child_token();
        let active = self.active.clone();

        let count = active.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(client_id = %ctx.client_id, active = count, "IPC client connected");

        tokio::spawn(async move {
            serve_connection(stream, &gateway, &ctx, cancel).await;
            let count = active.fetch_sub(1, Ordering::Relaxed) - 1;
            debug!(client_id = %ctx.client_id, active = count, "IPC client disconnected");
        });
    }
}

/// `uds:{peer pid}:{connected at ms}:{sequence}`
fn client_id(stream: &UnixStream, connected_at: u64, seq: u64) -> String {
    let pid = stream
        .peer_cred()
        .ok()
        .and_then(|cred| cred.pid())
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "anon".to_string());
    format!("uds:{pid}:{connected_at}:{seq}")
}

fn remove_stale_socket(path: &Path) -> IpcResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(IpcError::StaleSocket {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn serve_connection(
    stream: UnixStream,
    gateway: &RpcGateway,
    ctx: &RequestContext,
    cancel: CancellationToken,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(client_id = %ctx.client_id, error = %e, "IPC read failed");
                    break;
                }
            },
        };

        for frame in framer.push(&buf[..n]) {
            let response = match frame {
                Frame::Line(line) => respond(gateway, &line, ctx),
                Frame::Oversized => {
                    let limit = framer.max_line();
                    gateway.protocol_error(
                        &DecodeError::new(FALLBACK_ID, ProtocolError::LineTooLong { limit }),
                        ctx,
                    )
                }
            };
            let mut out = response.to_line();
            out.push('\n');
            if let Err(e) = writer.write_all(out.as_bytes()).await {
                debug!(client_id = %ctx.client_id, error = %e, "Dropping response to closed client");
            }
        }
    }
}
