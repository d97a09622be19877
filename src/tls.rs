//! HTTPS listener.
//!
//! Certificates and keys are read once at startup from PEM files.  Each
//! accepted connection completes its TLS handshake on its own task and is
//! then driven by hyper's HTTP/1 + HTTP/2 auto builder.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Build a rustls server configuration from PEM certificate chain and key.
pub fn load_tls_config(cert_path: &str, key_path: &str) -> anyhow::Result<Arc<ServerConfig>> {
    let cert_file =
        File::open(cert_path).with_context(|| format!("cannot open certificate {cert_path}"))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("cannot parse certificate {cert_path}"))?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in {cert_path}");
    }

    let key_file =
        File::open(key_path).with_context(|| format!("cannot open private key {key_path}"))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .with_context(|| format!("cannot parse private key {key_path}"))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate and private key do not form a valid pair")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Serve `app` over TLS until `shutdown` is cancelled, then give open
/// connections up to `drain_timeout` to finish.
pub async fn serve_tls(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    app: Router,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(config);
    let tracker = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls_stream), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(e) = result {
                debug!("Connection from {} closed with error: {}", peer, e);
            }
        });
    }

    drop(listener);
    tracker.close();
    info!("Draining {} open connections", tracker.len());
    if tokio::time::timeout(drain_timeout, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            "Connections still open after {:?}, shutting down anyway",
            drain_timeout
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_certificate_file() {
        let err = load_tls_config("/nonexistent/cert.pem", "/nonexistent/key.pem").unwrap_err();
        assert!(err.to_string().contains("cannot open certificate"));
    }

    #[test]
    fn test_certificate_file_without_certificates() {
        let cert = write_temp("not a pem file\n");
        let key = write_temp("");
        let err = load_tls_config(
            cert.path().to_str().unwrap(),
            key.path().to_str().unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no certificate found"));
    }

    #[test]
    fn test_missing_private_key_file() {
        let cert = write_temp(
            "-----BEGIN CERTIFICATE-----\nMAA=\n-----END CERTIFICATE-----\n",
        );
        let err = load_tls_config(cert.path().to_str().unwrap(), "/nonexistent/key.pem")
            .unwrap_err();
        assert!(err.to_string().contains("cannot open private key"));
    }

    #[test]
    fn test_key_file_without_key() {
        let cert = write_temp(
            "-----BEGIN CERTIFICATE-----\nMAA=\n-----END CERTIFICATE-----\n",
        );
        let key = write_temp("nothing here\n");
        let err = load_tls_config(
            cert.path().to_str().unwrap(),
            key.path().to_str().unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no private key found"));
    }
}
