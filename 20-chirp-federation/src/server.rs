use std::{future::Future, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use http::StatusCode;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    federation::Federation,
    handlers::App,
    http::{HttpError, Response, read_request, write_response},
    static_files::StaticFiles,
    store::ChirpStore,
};

const OVERLOAD_READ_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    snapshot: PathBuf,
}

struct ServerState {
    app: App,
    permits: Arc<Semaphore>,
    idle_timeout: Duration,
}

impl Server {
    /// Binds the listener and assembles the node. The snapshot is not loaded
    /// until [`Server::restore_snapshot`].
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        let identity = match config.advertise.clone() {
            Some(identity) => identity,
            None => listener.local_addr()?.to_string(),
        };

        let federation = Federation::new(
            identity,
            config.peers.clone(),
            config.peer_timeout,
            config.federation_deadline,
        )
        .context("failed to build peer client")?;
        let app = App::new(
            Arc::new(ChirpStore::new()),
            federation,
            StaticFiles::new(config.document_root.clone()),
        );

        Ok(Self {
            listener,
            snapshot: config.snapshot_path(),
            state: Arc::new(ServerState {
                app,
                permits: Arc::new(Semaphore::new(config.max_connections)),
                idle_timeout: config.idle_timeout,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> Arc<ChirpStore> {
        Arc::clone(self.state.app.store())
    }

    /// Loads the startup snapshot. Failures are logged and leave the store
    /// as it was.
    pub async fn restore_snapshot(&self) -> usize {
        let store = self.state.app.store();
        match store.load_snapshot_file(&self.snapshot).await {
            Ok(loaded) => {
                info!(path = %self.snapshot.display(), loaded, "snapshot restored");
                loaded
            }
            Err(err) if err.is_missing_file() => {
                info!(path = %self.snapshot.display(), "no snapshot found, starting empty");
                0
            }
            Err(err) => {
                warn!(path = %self.snapshot.display(), error = ?err, "failed to load snapshot, starting empty");
                0
            }
        }
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener, state, ..
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => match Arc::clone(&state.permits).try_acquire_owned() {
            Ok(permit) => spawn_connection_handler(stream, peer, permit, state),
            Err(_) => spawn_overload_response(stream, peer),
        },
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    permit: OwnedSemaphorePermit,
    state: &Arc<ServerState>,
) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        debug!(peer = %peer, "connection opened");
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        if let Err(err) =
            serve_connection(&mut reader, &mut writer, &state.app, state.idle_timeout).await
        {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
        debug!(peer = %peer, "connection closed");
        drop(permit);
    });
}

fn spawn_overload_response(mut stream: TcpStream, peer: SocketAddr) {
    warn!(peer = %peer, "connection limit reached, turning client away");
    tokio::spawn(async move {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        // Consume what the client already sent so closing does not reset the
        // connection before the 503 arrives.
        let _ = timeout(OVERLOAD_READ_TIMEOUT, read_request(&mut reader)).await;

        let busy = Response::text(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").closing();
        if let Err(err) = write_response(&mut writer, &busy).await {
            debug!(peer = %peer, error = ?err, "failed to send busy response");
            return;
        }
        if let Err(err) = writer.shutdown().await {
            debug!(peer = %peer, error = ?err, "failed to close busy connection");
        }
    });
}

/// Answers requests in arrival order until the client hangs up, goes idle, or
/// breaks framing.
pub async fn serve_connection<R, W>(
    reader: &mut R,
    writer: &mut W,
    app: &App,
    idle_timeout: Duration,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Ok(next) = timeout(idle_timeout, read_request(reader)).await else {
            debug!(?idle_timeout, "closing idle connection");
            return Ok(());
        };

        match next {
            Ok(Some(request)) => {
                let response = app.handle(&request).await;
                debug!(
                    method = %request.method,
                    path = %request.path,
                    status = response.status.as_u16(),
                    "request handled"
                );
                write_response(writer, &response).await?;
            }
            Ok(None) => return Ok(()),
            Err(err) => {
                let keep = err.keeps_connection();
                debug!(error = %err, keep, "rejecting request");
                if let Some(response) = err.response() {
                    let response = if keep { response } else { response.closing() };
                    write_response(writer, &response).await?;
                }
                if !keep {
                    return match err {
                        HttpError::Io(io) => Err(io.into()),
                        _ => Ok(()),
                    };
                }
            }
        }
    }
}
