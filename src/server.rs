//! Listener setup: one endpoint serving HTTP/1.1 and HTTP/2 on the same
//! port, plaintext or TLS-terminated, with graceful shutdown.
//!
//! Plaintext connections get prior-knowledge HTTP/2 via hyper's preface
//! detection; TLS connections negotiate the protocol through ALPN.

use std::convert::Infallible;
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use hyper::server::conn::Http;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::config::ProxyConfig;
use crate::dispatch::{self, AppState};

/// Bind the configured endpoint and serve until shutdown.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let enable_tls = config.enable_tls;
    let cert_path = config.tls_cert_path.clone();
    let key_path = config.tls_key_path.clone();
    let state = AppState::new(Arc::new(config));

    if enable_tls {
        let cert_path = cert_path.context("TLS enabled but no certificate path configured")?;
        let key_path = key_path.context("TLS enabled but no private key path configured")?;
        run_tls(addr, state, &cert_path, &key_path, shutdown_signal()).await
    } else {
        run_plaintext(addr, state, shutdown_signal()).await
    }
}

/// Bind a plaintext server, returning the bound address and its future.
///
/// Split from [`run_plaintext`] so tests can bind port 0 and learn the
/// actual address before driving the server.
pub fn bind_plaintext(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<(SocketAddr, impl Future<Output = hyper::Result<()>>)> {
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| dispatch::handle(state.clone(), req)))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {}", addr))?
        .serve(make_svc);
    let local_addr = server.local_addr();
    Ok((local_addr, server.with_graceful_shutdown(shutdown)))
}

/// Serve plaintext HTTP/1.1 and prior-knowledge HTTP/2 until `shutdown`.
pub async fn run_plaintext(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let (local_addr, server) = bind_plaintext(addr, state, shutdown)?;
    info!("Reverse proxy listening on http://{}", local_addr);
    server.await.context("server error")?;
    info!("Reverse proxy shut down");
    Ok(())
}

/// Serve TLS-terminated HTTP/1.1 and HTTP/2 (ALPN) until `shutdown`.
pub async fn run_tls(
    addr: SocketAddr,
    state: AppState,
    cert_path: &str,
    key_path: &str,
    shutdown: impl Future<Output = ()> + Send,
) -> anyhow::Result<()> {
    let tls_config = load_server_tls(cert_path, key_path)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        "Reverse proxy listening on https://{}",
        listener.local_addr()?
    );

    tokio::pin!(shutdown);
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let state = state.clone();
                connections.spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(e) => {
                            debug!("TLS handshake failed from {}: {}", remote_addr, e);
                            return;
                        }
                    };
                    let service =
                        service_fn(move |req| dispatch::handle(state.clone(), req));
                    if let Err(e) = Http::new().serve_connection(tls_stream, service).await {
                        debug!("Connection from {} ended: {}", remote_addr, e);
                    }
                });
            }
        }
    }

    // Drain in-flight requests before exiting.
    info!("Draining {} open connections", connections.len());
    while connections.join_next().await.is_some() {}
    info!("Reverse proxy shut down");
    Ok(())
}

/// Load the server certificate chain and private key, ALPN h2 + http/1.1.
fn load_server_tls(cert_path: &str, key_path: &str) -> anyhow::Result<rustls::ServerConfig> {
    let certs = {
        let file = File::open(cert_path)
            .with_context(|| format!("failed to open certificate file {}", cert_path))?;
        let mut reader = BufReader::new(file);
        rustls_pemfile::certs(&mut reader)
            .with_context(|| format!("failed to parse certificate PEM {}", cert_path))?
            .into_iter()
            .map(rustls::Certificate)
            .collect::<Vec<_>>()
    };
    if certs.is_empty() {
        bail!("no certificates found in {}", cert_path);
    }

    let key = {
        let file = File::open(key_path)
            .with_context(|| format!("failed to open private key file {}", key_path))?;
        let mut reader = BufReader::new(file);
        let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
            .with_context(|| format!("failed to parse private key PEM {}", key_path))?;
        if keys.is_empty() {
            let file = File::open(key_path)?;
            let mut reader = BufReader::new(file);
            keys = rustls_pemfile::rsa_private_keys(&mut reader)
                .with_context(|| format!("failed to parse private key PEM {}", key_path))?;
        }
        match keys.into_iter().next() {
            Some(key) => rustls::PrivateKey(key),
            None => bail!("no private key found in {}", key_path),
        }
    };

    let mut config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid TLS certificate or key")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
