//! The raw TCP listener.
//!
//! Structurally the twin of the HTTP listener, with two additions: init
//! mocks (the server speaks first on a fresh connection) and connection
//! pinning. Every registered mock heads its own pinning group;
//! [`TcpMockHandle::mock`] spawns tail members that share the group and
//! therefore only match on the connection where the head matched.

mod conn;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::diag;
use crate::error::{PendingMockError, ValidationError};
use crate::mock::{Mock, MockSet, Pin, PinGroup, PinRole, Proto, ResetOptions};
use crate::validate::{conform, schema};
use crate::value::Value;
use crate::ServerOptions;

/// A running TCP mock listener.
pub struct TcpServer {
    port: u16,
    set: Arc<MockSet>,
    shutdown: broadcast::Sender<()>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Handle to one registered TCP mock; also the entry point for pinned
/// children.
pub struct TcpMockHandle {
    mock: Arc<Mock>,
    set: Arc<MockSet>,
}

impl std::fmt::Debug for TcpMockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpMockHandle").finish_non_exhaustive()
    }
}

impl TcpMockHandle {
    /// Raise [`PendingMockError`] if this mock never matched.
    pub fn assert_done(&self) -> Result<(), PendingMockError> {
        self.mock.assert_done()
    }

    /// Register a child mock pinned to this mock's connection: it can only
    /// match on the connection where the head of the group matched.
    /// Children cannot be init mocks.
    pub fn mock(&self, options: Value) -> Result<TcpMockHandle, ValidationError> {
        let conformed = conform(&options, &schema::tcp_child_mock())?;
        let group = self
            .mock
            .pin()
            .map(|pin| Arc::clone(&pin.group))
            .expect("every tcp mock heads or belongs to a pinning group");
        let mock = self.set.register(
            conformed,
            Some(Pin {
                group,
                role: PinRole::Tail,
            }),
        );
        Ok(TcpMockHandle {
            mock,
            set: Arc::clone(&self.set),
        })
    }
}

/// Open a TCP mock listener.
pub async fn tcp_server(options: ServerOptions) -> io::Result<TcpServer> {
    diag::init();
    let listener = TcpListener::bind((options.host.as_str(), options.port)).await?;
    let port = listener.local_addr()?.port();
    info!(target: diag::SERVER, "tcp listener on {}:{port}", options.host);

    let set = Arc::new(MockSet::new(Proto::Tcp));
    let (shutdown, _) = broadcast::channel(1);
    let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
    let conn_ids = Arc::new(AtomicU64::new(1));

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
                    let conn_id = conn_ids.fetch_add(1, Ordering::SeqCst);
                    let set = Arc::clone(&accept_set);
                    let mut conn_rx = accept_shutdown.subscribe();
                    let handle = tokio::spawn(async move {
                        tokio::select! {
                            _ = conn::handle_connection(stream, peer, conn_id, set) => {}
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

    Ok(TcpServer {
        port,
        set,
        shutdown,
        accept_task: Mutex::new(Some(accept_task)),
        connections,
    })
}

impl TcpServer {
    /// The bound (possibly ephemeral) port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register a mock; it heads a fresh pinning group, so children
    /// spawned from the returned handle are pinned to whichever connection
    /// this mock ends up matching.
    pub fn mock(&self, options: Value) -> Result<TcpMockHandle, ValidationError> {
        let conformed = conform(&options, &schema::tcp_mock())?;
        let mock = self.set.register(
            conformed,
            Some(Pin {
                group: Arc::new(PinGroup::new()),
                role: PinRole::Head,
            }),
        );
        Ok(TcpMockHandle {
            mock,
            set: Arc::clone(&self.set),
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
        info!(target: diag::SERVER, "tcp listener on port {} torn down", self.port);
    }
}
