//! Newline-delimited JSON over TCP.
//!
//! Each line a client sends is one [`Request`](crate::Request); the
//! server answers every line with exactly one response line, in order.

use crate::error::{ServerError, ServerResult};
use crate::message::Response;
use crate::server::{encode_response, VaultServer};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

/// Longest request line accepted, in bytes.
pub const MAX_LINE_LEN: usize = 4 * 1024 * 1024;

/// Accepts connections on `listener` until `shutdown` resolves.
///
/// At most `max_connections` connections are served at once; further
/// clients wait in the accept queue.
///
/// # Errors
///
/// Returns an error if accepting fails.
pub async fn serve(
    server: VaultServer,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> ServerResult<()> {
    let limit = Arc::new(Semaphore::new(server.config().max_connections.max(1)));
    tracing::info!(
        addr = ?listener.local_addr().ok(),
        max_connections = server.config().max_connections,
        "listening"
    );
    tokio::pin!(shutdown);

    loop {
        let permit = tokio::select! {
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            () = &mut shutdown => break,
        };

        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            () = &mut shutdown => break,
        };

        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(&server, stream, peer).await {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            }
            drop(permit);
        });
    }

    tracing::info!("listener stopped");
    Ok(())
}

async fn serve_connection(
    server: &VaultServer,
    stream: TcpStream,
    peer: SocketAddr,
) -> std::io::Result<()> {
    tracing::debug!(%peer, "connection opened");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_LINE_LEN as u64)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            break;
        }
        if !line.ends_with('\n') && read >= MAX_LINE_LEN {
            let response = encode_response(&Response::error(&ServerError::Malformed(format!(
                "request exceeds {MAX_LINE_LEN} bytes"
            ))));
            writer.write_all(response.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            break;
        }

        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        let response = server.handle_json(request).await;
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    tracing::debug!(%peer, "connection closed");
    Ok(())
}
