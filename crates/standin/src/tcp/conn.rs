//! Per-connection handling for the TCP listener.
//!
//! Each connection owns a growing receive buffer. Every data arrival
//! appends and then attempts one match of the *entire* buffer against the
//! registered stream mocks; a successful match writes the response and
//! clears the buffer. The buffer dies with the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::diag;
use crate::mock::MockSet;
use crate::resolve;
use crate::value::Value;

const READ_CHUNK: usize = 8 * 1024;

pub(crate) async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    conn_id: u64,
    set: Arc<MockSet>,
) {
    // Small, latency-sensitive writes must be observable immediately.
    if let Err(e) = stream.set_nodelay(true) {
        debug!(target: diag::SERVER, "set_nodelay failed on connection {conn_id}: {e}");
    }
    debug!(target: diag::SERVER, "connection {conn_id} from {peer}");

    // Server-speaks-first: the first pending init mock adopts this
    // connection and its payload goes out before any byte is read.
    if let Some(mock) = set.claim_init(conn_id) {
        let payload = resolve::to_bytes(mock.init(), &[]);
        if let Err(e) = stream.write_all(&payload).await {
            debug!(target: diag::SERVER, "init write on connection {conn_id} failed: {e}");
            return;
        }
        let _ = stream.flush().await;
        debug!(
            target: diag::SERVER,
            "wrote {} init byte(s) on connection {conn_id}",
            payload.len()
        );
    }

    let mut buffer = BytesMut::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(target: diag::SERVER, "read on connection {conn_id} failed: {e}");
                break;
            }
        };
        buffer.extend_from_slice(&chunk[..n]);

        let accumulated = Value::Bytes(Bytes::copy_from_slice(&buffer));
        let Some(mock) = set.claim_stream(&accumulated, conn_id) else {
            // Not enough bytes yet; keep accumulating.
            continue;
        };

        let args = [accumulated];
        let descriptor = match mock.res() {
            Value::Fn(producer) => producer.invoke(&args).unwrap_or(Value::Absent),
            literal => literal.clone(),
        };

        let (body, body_delay, destroy) = match &descriptor {
            Value::Map(_) => (
                resolve::to_bytes(descriptor.get("body"), &args),
                resolve::to_int(descriptor.get("bodyDelay"), &args).max(0) as u64,
                resolve::to_bool(descriptor.get("destroySocket"), &args),
            ),
            bufferable => (resolve::to_bytes(bufferable, &args), 0, false),
        };

        // Consumed input never carries over into the next match.
        buffer.clear();

        if body_delay > 0 {
            debug!(target: diag::SERVER, "delaying body {body_delay}ms on connection {conn_id}");
            tokio::time::sleep(Duration::from_millis(body_delay)).await;
        }

        if destroy {
            destroy_socket(stream, conn_id);
            return;
        }

        if let Err(e) = stream.write_all(&body).await {
            // The mock is already matched; a vanished peer is logged, not
            // raised.
            debug!(target: diag::SERVER, "write on connection {conn_id} failed: {e}");
            break;
        }
        let _ = stream.flush().await;
        debug!(
            target: diag::SERVER,
            "wrote {} byte(s) on connection {conn_id}",
            body.len()
        );
    }

    debug!(target: diag::SERVER, "connection {conn_id} closed");
}

/// Abortive close (RST), observed by the peer as `ECONNRESET`.
fn destroy_socket(stream: TcpStream, conn_id: u64) {
    let _ = stream.set_linger(Some(Duration::from_secs(0)));
    drop(stream);
    debug!(target: diag::SERVER, "connection {conn_id} destroyed");
}
