use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use axum::{Extension, Router};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use crate::tls::identity;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept mutual-TLS connections until `cancel` fires, then drain.
///
/// Every connection runs in its own task. Handshake and protocol failures
/// end that connection only.
pub async fn serve(
    listener: TcpListener,
    tls: Arc<ServerConfig>,
    app: Router,
    cancel: CancellationToken,
) -> Result<()> {
    let acceptor = TlsAcceptor::from(tls);
    let tracker = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        let cancel = cancel.clone();
        tracker.spawn(async move {
            if let Err(e) = handle_connection(acceptor, stream, peer, app, cancel).await {
                tracing::warn!(%peer, "Connection closed: {:#}", e);
            }
        });
    }

    tracker.close();
    tracing::debug!(connections = tracker.len(), "Draining connections");
    tracker.wait().await;
    Ok(())
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    cancel: CancellationToken,
) -> Result<()> {
    let tls_stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream))
        .await
        .context("TLS handshake timed out")?
        .context("TLS handshake failed")?;

    let (_, conn) = tls_stream.get_ref();
    let identity = identity::peer_identity(conn)
        .context("client certificate carries no subject common name")?;

    if let Some(leaf) = identity::peer_leaf(conn) {
        tracing::debug!(
            %peer,
            device_id = %identity,
            fingerprint = %identity::fingerprint(leaf.as_ref()),
            "Client authenticated"
        );
    }

    let service = TowerToHyperService::new(app.layer(Extension(identity)));
    let mut conn = pin!(http1::Builder::new().serve_connection(TokioIo::new(tls_stream), service));
    let mut shutdown = pin!(cancel.cancelled());
    let mut draining = false;

    loop {
        tokio::select! {
            res = conn.as_mut() => {
                res.context("HTTP connection error")?;
                return Ok(());
            }
            _ = &mut shutdown, if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}
