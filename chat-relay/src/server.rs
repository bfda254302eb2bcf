use std::{future::Future, net::SocketAddr, num::NonZeroUsize, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{ServerLine, normalize_username, read_line, write_line},
    registry::{DEFAULT_OUTBOUND_CAPACITY, Outbound, Registry},
    router,
};

pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    outbound_capacity: NonZeroUsize,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    /// Sets how many lines each connection may have queued.
    pub fn with_outbound_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            registry,
            outbound_capacity,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&registry).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, outbound_capacity);
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

async fn handle_shutdown(registry: &Registry) {
    info!("chat relay shutting down");
    registry
        .broadcast(&ServerLine::shutting_down().to_string())
        .await;
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
    outbound_capacity: NonZeroUsize,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, registry, outbound_capacity),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<Registry>,
    outbound_capacity: NonZeroUsize,
) {
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, registry, outbound_capacity).await {
            warn!(peer = %peer, error = ?err, "session closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    outbound_capacity: NonZeroUsize,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let Some(requested) = read_registration(&mut reader).await? else {
        debug!(%peer, "closing connection without a username");
        return Ok(());
    };

    let (outbound, queue) = Outbound::channel(outbound_capacity);
    tokio::spawn(drain_outbound(writer, queue, peer));

    let username = open_session(&registry, &requested, &outbound).await;
    info!(%peer, %username, "client joined");

    // Cleanup must run whichever way the read loop ends.
    let result = run_session(&registry, &mut reader, &outbound, &username).await;
    close_session(&registry, &username).await;
    info!(%peer, %username, "client left");

    result
}

/// Reads the first line as the requested username. `None` rejects the
/// connection: the stream ended or the name normalized to nothing.
async fn read_registration<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(raw) = read_line(reader)
        .await
        .context("failed to read username")?
    else {
        return Ok(None);
    };

    let requested = normalize_username(&raw);
    Ok((!requested.is_empty()).then_some(requested))
}

async fn open_session(registry: &Registry, requested: &str, outbound: &Outbound) -> String {
    let username = registry.register(requested, outbound.clone()).await;
    registry
        .broadcast(&ServerLine::joined(&username).to_string())
        .await;
    registry.broadcast_roster().await;
    username
}

async fn run_session<R>(
    registry: &Registry,
    reader: &mut R,
    outbound: &Outbound,
    username: &str,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = read_line(reader)
        .await
        .with_context(|| format!("failed to read from {username}"))?
    {
        let routed = router::route(registry, username, outbound, &line).await;
        debug!(%username, ?routed, "routed line");
    }

    Ok(())
}

async fn close_session(registry: &Registry, username: &str) {
    registry.unregister(username).await;
    registry
        .broadcast(&ServerLine::left(username).to_string())
        .await;
    registry.broadcast_roster().await;
}

/// Writes queued lines to the peer until every handle to the queue is gone
/// or a write fails, then shuts the write half down.
async fn drain_outbound<W>(mut writer: W, mut queue: mpsc::Receiver<String>, peer: SocketAddr)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = queue.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(%peer, error = ?err, "failed to write to client");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(%peer, error = ?err, "failed to shut down client writer");
    }
}
