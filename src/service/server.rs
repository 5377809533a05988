//! TCP listener and the per-connection lifecycle.
//!
//! Each accepted socket gets its own task: handshake, then a reader loop
//! feeding the [`Dispatcher`] and a writer task draining the session's
//! outbound queue. Teardown releases the registry entry only if it still
//! belongs to this connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::handshake::server_handshake;
use crate::protocol::{Dispatcher, Flow};
use crate::service::registry::SessionRegistry;
use crate::service::session::{Outbound, Session};
use crate::store::{AccountStore, ContactStore, OfflineMessageStore};
use crate::transport::connection::PacketSink;
use crate::transport::Connection;
use crate::utils::crypto::Nonce;
use crate::utils::metrics::global_metrics;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a connection task needs, shared across all connections
pub struct ServerState {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub accounts: Arc<dyn AccountStore>,
    pub contacts: Arc<dyn ContactStore>,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        accounts: Arc<dyn AccountStore>,
        offline: Arc<dyn OfflineMessageStore>,
        contacts: Arc<dyn ContactStore>,
    ) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(offline),
            accounts,
            contacts,
        }
    }

    /// State backed by one store implementing every collaborator
    pub fn with_store<S>(config: ServerConfig, store: Arc<S>) -> Self
    where
        S: AccountStore + OfflineMessageStore + ContactStore + 'static,
    {
        Self::new(config, store.clone(), store.clone(), store)
    }
}

/// Serve one connection with a freshly generated nonce
pub async fn serve_connection<T>(io: T, peer: String, state: Arc<ServerState>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let nonce = Nonce::generate()?;
    serve_connection_with_nonce(io, peer, state, nonce).await
}

/// Serve one connection end to end: handshake, session loop, teardown.
///
/// Returns the handshake error if login fails; once authenticated the
/// connection always ends with `Ok(())`.
pub async fn serve_connection_with_nonce<T>(
    io: T,
    peer: String,
    state: Arc<ServerState>,
    nonce: Nonce,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    global_metrics().connection_established();
    let result = run_connection(io, peer, state, nonce).await;
    global_metrics().connection_closed();
    result
}

#[instrument(skip(io, state, nonce), fields(connection_id = tracing::field::Empty))]
async fn run_connection<T>(
    io: T,
    peer: String,
    state: Arc<ServerState>,
    nonce: Nonce,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    tracing::Span::current().record("connection_id", connection_id);
    let config = &state.config;

    let mut conn = Connection::new(io, peer.clone(), config.max_packet_size);
    let (tx, rx) = mpsc::channel(config.backpressure_limit);
    let mut session = Session::new(connection_id, peer, nonce, tx);

    let handle = server_handshake(
        &mut conn,
        &mut session,
        state.accounts.as_ref(),
        &state.registry,
        config.handshake_timeout,
    )
    .await?;
    let shutdown = session.shutdown_token();
    drop(session);

    let (sink, mut stream) = conn.split();
    let mut writer = tokio::spawn(write_loop(sink, rx, shutdown));
    let mut writer_done = false;

    if let Err(e) = state.registry.deliver_offline_backlog(&handle).await {
        warn!(error = %e, "Offline backlog not delivered");
    }

    let dispatcher = Dispatcher::new(state.clone());
    let reason = loop {
        tokio::select! {
            _ = &mut writer => {
                writer_done = true;
                break "connection closed by server";
            }
            frame = tokio::time::timeout(config.idle_timeout, stream.next()) => match frame {
                Err(_) => break "idle timeout",
                Ok(None) => break "peer closed",
                Ok(Some(Err(e))) => {
                    global_metrics().protocol_error();
                    warn!(error = %e, "Read failed");
                    break "read error";
                }
                Ok(Some(Ok(decoded))) => match dispatcher.dispatch(&handle, decoded).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => break "logout",
                    Err(e) if e.is_fatal() => {
                        warn!(error = %e, "Request failed, closing");
                        break "handler error";
                    }
                    Err(e) => {
                        global_metrics().protocol_error();
                        warn!(error = %e, "Request failed");
                    }
                },
            },
        }
    };

    let released = state
        .registry
        .release(handle.uid, handle.session_key)
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to release session");
            false
        });

    if !writer_done {
        let grace = config.shutdown_timeout;
        handle.close();
        if tokio::time::timeout(grace, &mut writer).await.is_err() {
            writer.abort();
        }
    }

    info!(uid = handle.uid, reason, released, "Session closed");
    Ok(())
}

/// Drain the outbound queue into the socket until closed or cancelled
async fn write_loop<T>(
    mut sink: PacketSink<T>,
    mut rx: mpsc::Receiver<Outbound>,
    shutdown: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Writer cancelled");
                break;
            }
            item = rx.recv() => item,
        };
        match item {
            Some(Outbound::Packet(packet)) => {
                // a stalled socket must not outlive a cancellation
                let written = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    written = sink.send(packet) => written,
                };
                if let Err(e) = written {
                    debug!(error = %e, "Write failed");
                    break;
                }
            }
            Some(Outbound::Close) | None => break,
        }
    }
    rx.close();
    let _ = sink.close().await;
}

/// Bind `state.config.address` and serve until ctrl-c
#[instrument(skip(state), fields(address = %state.config.address))]
pub async fn start_server(state: Arc<ServerState>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let listener = TcpListener::bind(&state.config.address).await?;
    start_server_with_shutdown(listener, state, shutdown_rx).await
}

/// Accept loop on an already bound listener, stopping on `shutdown_rx`
pub async fn start_server_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let local: SocketAddr = listener.local_addr()?;
    info!(address = %local, "Listening");

    let active_connections = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Closing sessions...");
                for handle in state.registry.handles()? {
                    handle.close();
                }
                wait_for_drain(&active_connections, state.config.shutdown_timeout).await;
                global_metrics().log_metrics();
                return Ok(());
            }

            accept_result = listener.accept() => {
                let (stream, addr) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                if active_connections.load(Ordering::Acquire) >= state.config.max_connections {
                    warn!(peer = %addr, "Connection limit reached, rejecting");
                    drop(stream);
                    continue;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }

                active_connections.fetch_add(1, Ordering::AcqRel);
                let active = active_connections.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, addr.to_string(), state).await {
                        debug!(peer = %addr, error = %e, "Connection ended with error");
                    }
                    active.fetch_sub(1, Ordering::AcqRel);
                });
            }
        }
    }
}

async fn wait_for_drain(active: &AtomicUsize, grace: Duration) {
    let timeout = tokio::time::sleep(grace);
    tokio::pin!(timeout);

    loop {
        let connections = active.load(Ordering::Acquire);
        if connections == 0 {
            info!("All connections closed, shutting down");
            return;
        }
        tokio::select! {
            _ = &mut timeout => {
                warn!(connections, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                debug!(connections, "Waiting for connections to close");
            }
        }
    }
}
