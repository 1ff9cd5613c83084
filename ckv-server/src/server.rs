//! # TCP Server
//!
//! Accept RESP connections (plain or TLS), parse commands, and feed them
//! to the dispatcher. Each connection runs on its own task and multiplexes
//! command replies with pub/sub pushes over one socket; every response is
//! written in 1024-byte chunks.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bytes::BytesMut;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::dispatch::{ConnContext, Dispatcher};
use crate::protocol::{self, RespError, RespParser};

/// Responses are chunked into writes of this size.
const WRITE_CHUNK: usize = 1024;

/// Accept loop: one task per connection. Returns only on listener
/// failure, which is fatal to the process.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    tls: Option<TlsAcceptor>,
    server_id: String,
) -> std::io::Result<()> {
    let mut next_conn_id: u64 = 0;
    loop {
        let (stream, peer) = listener.accept().await?;
        next_conn_id += 1;
        let conn_id = next_conn_id;
        debug!(%peer, conn_id, "accepted connection");

        let dispatcher = Arc::clone(&dispatcher);
        let server_id = server_id.clone();
        match tls.clone() {
            Some(acceptor) => {
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(stream) => {
                            if let Err(err) =
                                handle_connection(stream, dispatcher, server_id, conn_id).await
                            {
                                debug!(conn_id, %err, "connection closed with error");
                            }
                        }
                        Err(err) => warn!(conn_id, %err, "tls handshake failed"),
                    }
                });
            }
            None => {
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, dispatcher, server_id, conn_id).await
                    {
                        debug!(conn_id, %err, "connection closed with error");
                    }
                });
            }
        }
    }
}

/// Handles a single client connection until EOF, protocol error, or IO
/// failure. Pub/sub deliveries interleave with command replies.
pub async fn handle_connection<S>(
    stream: S,
    dispatcher: Arc<Dispatcher>,
    server_id: String,
    conn_id: u64,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let (outbox, mut pushes) = unbounded_channel::<Vec<u8>>();
    let conn = ConnContext {
        conn_id,
        server_id,
        user: "default".to_string(),
        outbox,
    };

    let result: std::io::Result<()> = 'conn: loop {
        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                let bytes = match read {
                    Ok(bytes) => bytes,
                    Err(err) => break 'conn Err(err),
                };
                if bytes == 0 {
                    break 'conn Ok(());
                }
                loop {
                    match parser.parse(&mut buffer) {
                        Ok(Some(frame)) => {
                            let args: Vec<String> = frame
                                .iter()
                                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                                .collect();
                            let response = dispatcher.dispatch(&conn, &args);
                            if let Err(err) = write_chunked(&mut stream, &response).await {
                                break 'conn Err(err);
                            }
                        }
                        Ok(None) => break,
                        Err(RespError::Protocol) => {
                            let _ = write_chunked(&mut stream, &protocol::error("protocol error"))
                                .await;
                            break 'conn Ok(());
                        }
                    }
                }
            }
            pushed = pushes.recv() => {
                match pushed {
                    Some(message) => {
                        if let Err(err) = write_chunked(&mut stream, &message).await {
                            break 'conn Err(err);
                        }
                    }
                    None => break 'conn Ok(()),
                }
            }
        }
    };

    dispatcher.context().pubsub.drop_connection(conn_id);
    result
}

async fn write_chunked<S>(stream: &mut S, data: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    for chunk in data.chunks(WRITE_CHUNK) {
        stream.write_all(chunk).await?;
    }
    stream.flush().await
}

/// Builds the TLS acceptor; a configured client CA bundle turns on mTLS.
pub fn build_tls_acceptor(
    cert_path: &Path,
    key_path: &Path,
    client_ca: Option<&Path>,
) -> anyhow::Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let builder = ServerConfig::builder();
    let config = match client_ca {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("opening certificate {}", path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    anyhow::ensure!(!certs.is_empty(), "no certificates in {}", path.display());
    Ok(certs)
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("opening private key {}", path.display()))?,
    );
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| anyhow::anyhow!("no private key in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ServerContext;
    use ckv_engine::{Keyspace, KeyspaceConfig};

    fn dispatcher() -> Arc<Dispatcher> {
        let keyspace = Arc::new(Keyspace::new(KeyspaceConfig::default()));
        Arc::new(Dispatcher::new(Arc::new(ServerContext::new(keyspace))))
    }

    #[tokio::test]
    async fn connection_answers_commands_over_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4 * 1024);
        let task = tokio::spawn(handle_connection(
            server,
            dispatcher(),
            "test".to_string(),
            1,
        ));

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half
            .write_all(b"*1\r\n$4\r\nPING\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();

        let mut reply = vec![0u8; 12];
        read_half.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"+PONG\r\n+OK\r\n");

        drop(write_half);
        drop(read_half);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn protocol_errors_close_the_connection() {
        let (client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(handle_connection(
            server,
            dispatcher(),
            "test".to_string(),
            2,
        ));

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(b"*bad\r\n").await.unwrap();

        let mut reply = Vec::new();
        read_half.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"-ERR protocol error"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn large_replies_arrive_intact() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_connection(
            server,
            dispatcher(),
            "test".to_string(),
            3,
        ));

        let payload = "x".repeat(5000);
        let frame = protocol::encode_command(&[
            "SET".to_string(),
            "big".to_string(),
            payload.clone(),
        ]);
        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(&frame).await.unwrap();
        write_half
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nbig\r\n")
            .await
            .unwrap();

        // +OK\r\n (5 bytes) then $5000\r\n<payload>\r\n (5009 bytes).
        let mut reply = vec![0u8; 5 + 5009];
        read_half.read_exact(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"+OK\r\n$5000\r\n"));
        assert!(reply.ends_with(b"\r\n"));

        drop(write_half);
        drop(read_half);
        task.await.unwrap().unwrap();
    }
}
