//! The HTTP listener.
//!
//! An accept loop plus one task per connection, all signalled through a
//! broadcast shutdown channel. Connections are HTTP/1.1 keep-alive: the
//! handler loops reading requests until EOF, a `Connection: close`, a
//! transport fault, or a mock that destroys the socket.

mod request;
mod respond;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::diag;
use crate::error::{PendingMockError, ValidationError};
use crate::mock::{Mock, MockSet, Proto, ResetOptions};
use crate::validate::{conform, schema};
use crate::value::Value;
use crate::ServerOptions;

use self::respond::Flow;

/// A running HTTP mock listener.
pub struct HttpServer {
    port: u16,
    set: Arc<MockSet>,
    shutdown: broadcast::Sender<()>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Handle to one registered HTTP mock.
pub struct HttpMockHandle {
    mock: Arc<Mock>,
}

impl std::fmt::Debug for HttpMockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMockHandle").finish_non_exhaustive()
    }
}

impl HttpMockHandle {
    /// Raise [`PendingMockError`] if this mock never matched.
    pub fn assert_done(&self) -> Result<(), PendingMockError> {
        self.mock.assert_done()
    }
}

/// Open an HTTP mock listener.
pub async fn http_server(options: ServerOptions) -> io::Result<HttpServer> {
    diag::init();
    let listener = TcpListener::bind((options.host.as_str(), options.port)).await?;
    let port = listener.local_addr()?.port();
    info!(target: diag::SERVER, "http listener on {}:{port}", options.host);

    let set = Arc::new(MockSet::new(Proto::Http));
    let (shutdown, _) = broadcast::channel(1);
    let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_set = Arc::clone(&set);
    let accept_connections = Arc::clone(&connections);
    let accept_shutdown = shutdown.clone();
    let mut accept_rx = shutdown.subscribe();

    let accept_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            debug!(target: diag::SERVER, "accept failed: {e}");
                            continue;
                        }
                    };
                    let set = Arc::clone(&accept_set);
                    let mut conn_rx = accept_shutdown.subscribe();
                    let handle = tokio::spawn(async move {
                        tokio::select! {
                            _ = handle_connection(stream, peer, set) => {}
                            // Teardown: dropping the handler drops the
                            // socket, so lingering clients cannot block
                            // shutdown.
                            _ = conn_rx.recv() => {}
                        }
                    });
                    let mut connections = accept_connections.lock();
                    connections.retain(|h| !h.is_finished());
                    connections.push(handle);
                }
                _ = accept_rx.recv() => break,
            }
        }
    });

    Ok(HttpServer {
        port,
        set,
        shutdown,
        accept_task: Mutex::new(Some(accept_task)),
        connections,
    })
}

impl HttpServer {
    /// The bound (possibly ephemeral) port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register a mock. Options are validated up front; a malformed
    /// declaration is rejected here with every issue listed, not at match
    /// time.
    pub fn mock(&self, options: Value) -> Result<HttpMockHandle, ValidationError> {
        let conformed = conform(&options, &schema::http_mock())?;
        Ok(HttpMockHandle {
            mock: self.set.register(conformed, None),
        })
    }

    /// Discard all mocks; raise if any are still pending (unless opted
    /// out). The list is emptied even on failure.
    pub fn reset(&self, options: ResetOptions) -> Result<(), PendingMockError> {
        self.set.reset(options.throw_on_pending)
    }

    /// Stop accepting, destroy open connections, and wait for every task
    /// to finish.
    pub async fn teardown(self) {
        let _ = self.shutdown.send(());
        if let Some(task) = self.accept_task.lock().take() {
            let _ = task.await;
        }
        let connections = std::mem::take(&mut *self.connections.lock());
        for task in connections {
            let _ = task.await;
        }
        info!(target: diag::SERVER, "http listener on port {} torn down", self.port);
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, set: Arc<MockSet>) {
    debug!(target: diag::SERVER, "connection from {peer}");
    let mut residual = BytesMut::new();

    loop {
        let parsed = match request::read_request(&mut stream, &mut residual).await {
            Ok(Some(parsed)) => parsed,
            Ok(None) => break,
            Err(e) => {
                debug!(target: diag::SERVER, "read from {peer} failed: {e}");
                break;
            }
        };
        debug!(target: diag::SERVER, "{} from {peer}", parsed.request_line());
        let close_after = parsed.wants_close();

        match respond::respond(&mut stream, &set, &parsed).await {
            Ok(Flow::Destroy) => {
                destroy(stream, peer);
                return;
            }
            Ok(Flow::KeepAlive) if !close_after => continue,
            Ok(Flow::KeepAlive) => break,
            Err(e) => {
                // The mock is already marked matched; a peer that went
                // away mid-response is its own problem.
                debug!(target: diag::SERVER, "write to {peer} failed: {e}");
                break;
            }
        }
    }
    debug!(target: diag::SERVER, "connection from {peer} closed");
}

/// Abortive close: linger zero turns the close into an RST, observed by
/// the peer as `ECONNRESET` rather than a clean EOF.
fn destroy(stream: TcpStream, peer: SocketAddr) {
    let _ = stream.set_linger(Some(Duration::from_secs(0)));
    drop(stream);
    debug!(target: diag::SERVER, "connection from {peer} destroyed");
}
