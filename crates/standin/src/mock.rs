//! Mock registration, pending tracking and reset semantics.
//!
//! Each listener owns one [`MockSet`]: an ordered list of registered mocks
//! behind a single mutex. The only shared mutable state in the system is
//! this list and each mock's `done` flag, and the only critical section is
//! one comparator scan plus a flag write, so a plain mutex is enough.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::compare;
use crate::diag;
use crate::error::PendingMockError;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Proto {
    Http,
    Tcp,
}

impl Proto {
    fn tag(self) -> &'static str {
        match self {
            Proto::Http => "HTTP",
            Proto::Tcp => "TCP",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PinRole {
    /// Matched like any other mock; records the connection identity into
    /// the group on match.
    Head,
    /// Only eligible on the connection its group is bound to.
    Tail,
}

/// One shared record per pinning group. The head writes the connection
/// identity exactly once; tails read it.
pub(crate) struct PinGroup {
    conn: Mutex<Option<u64>>,
}

impl PinGroup {
    pub fn new() -> Self {
        Self {
            conn: Mutex::new(None),
        }
    }

    /// Record the connection identity; later binds are ignored.
    pub fn bind(&self, conn: u64) {
        let mut slot = self.conn.lock();
        if slot.is_none() {
            *slot = Some(conn);
        }
    }

    pub fn bound_to(&self, conn: u64) -> bool {
        *self.conn.lock() == Some(conn)
    }
}

/// Membership of a mock in a pinning group.
pub(crate) struct Pin {
    pub group: Arc<PinGroup>,
    pub role: PinRole,
}

/// A registered expectation: conformed options plus a pending/matched
/// flag. `done` flips at most once, inside the set's critical section.
pub(crate) struct Mock {
    id: u64,
    proto: Proto,
    options: Value,
    done: AtomicBool,
    pin: Option<Pin>,
}

impl Mock {
    pub fn req(&self) -> &Value {
        self.options.get("req")
    }

    pub fn res(&self) -> &Value {
        self.options.get("res")
    }

    pub fn init(&self) -> &Value {
        self.options.get("init")
    }

    pub fn is_init(&self) -> bool {
        !self.init().is_absent()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn pin(&self) -> Option<&Pin> {
        self.pin.as_ref()
    }

    /// The printable form, e.g.
    /// `HTTP{req={method="POST", pathname="/bloop"}, res={body="bloop"}}`.
    /// Absent fields are suppressed and functions display by their source
    /// name. This exact text appears in [`PendingMockError`] messages.
    pub fn label(&self) -> String {
        format!("{}{}", self.proto.tag(), self.options.inspect())
    }

    /// Raise unless this mock has matched.
    pub fn assert_done(&self) -> Result<(), PendingMockError> {
        if self.is_done() {
            Ok(())
        } else {
            Err(PendingMockError::new(vec![self.label()]))
        }
    }
}

/// The ordered mock list owned by one listener.
pub(crate) struct MockSet {
    proto: Proto,
    mocks: Mutex<Vec<Arc<Mock>>>,
    next_id: AtomicU64,
}

impl MockSet {
    pub fn new(proto: Proto) -> Self {
        Self {
            proto,
            mocks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a mock; registration order is match order.
    pub fn register(&self, options: Value, pin: Option<Pin>) -> Arc<Mock> {
        let mock = Arc::new(Mock {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            proto: self.proto,
            options,
            done: AtomicBool::new(false),
            pin,
        });
        debug!(target: diag::SERVER, "registered mock #{} {}", mock.id, mock.label());
        self.mocks.lock().push(Arc::clone(&mock));
        mock
    }

    /// Find and claim the first pending mock whose request predicate is
    /// satisfied by `request`. The claimed mock is marked done before the
    /// lock is released, so a concurrent request cannot re-match it.
    pub fn claim_request(&self, request: &Value) -> Option<Arc<Mock>> {
        let mocks = self.mocks.lock();
        for mock in mocks.iter() {
            if mock.is_done() {
                continue;
            }
            if compare::is_match(mock.req(), request) {
                mock.mark_done();
                debug!(target: diag::SERVER, "matched mock #{} {}", mock.id, mock.label());
                return Some(Arc::clone(mock));
            }
        }
        None
    }

    /// Claim the first pending init mock for a freshly accepted
    /// connection, binding its pinning group to `conn`.
    pub fn claim_init(&self, conn: u64) -> Option<Arc<Mock>> {
        let mocks = self.mocks.lock();
        for mock in mocks.iter() {
            if mock.is_done() || !mock.is_init() {
                continue;
            }
            mock.mark_done();
            if let Some(pin) = mock.pin() {
                pin.group.bind(conn);
            }
            debug!(
                target: diag::SERVER,
                "init mock #{} bound to connection {}", mock.id, conn
            );
            return Some(Arc::clone(mock));
        }
        None
    }

    /// Claim the first pending, eligible stream mock whose predicate is
    /// satisfied by the connection's entire receive buffer. Heads are
    /// eligible on any connection (and bind their group on match); tails
    /// only where their head already matched.
    pub fn claim_stream(&self, buffer: &Value, conn: u64) -> Option<Arc<Mock>> {
        let mocks = self.mocks.lock();
        for mock in mocks.iter() {
            if mock.is_done() || mock.is_init() {
                continue;
            }
            let eligible = match mock.pin() {
                Some(pin) if pin.role == PinRole::Tail => pin.group.bound_to(conn),
                _ => true,
            };
            if !eligible {
                continue;
            }
            if compare::is_match(mock.req(), buffer) {
                mock.mark_done();
                if let Some(pin) = mock.pin() {
                    pin.group.bind(conn);
                }
                debug!(
                    target: diag::SERVER,
                    "matched stream mock #{} on connection {}", mock.id, conn
                );
                return Some(Arc::clone(mock));
            }
        }
        None
    }

    /// Printable forms of all still-pending mocks, in registration order.
    pub fn pending_labels(&self) -> Vec<String> {
        self.mocks
            .lock()
            .iter()
            .filter(|m| !m.is_done())
            .map(|m| m.label())
            .collect()
    }

    /// Discard every mock. The list is emptied even when this raises, so a
    /// failing reset is not retryable; the next test starts clean either
    /// way.
    pub fn reset(&self, throw_on_pending: bool) -> Result<(), PendingMockError> {
        let drained = std::mem::take(&mut *self.mocks.lock());
        let pending: Vec<String> = drained
            .iter()
            .filter(|m| !m.is_done())
            .map(|m| m.label())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        if throw_on_pending {
            return Err(PendingMockError::new(pending));
        }
        for label in &pending {
            info!(target: diag::SERVER, "discarding pending mock {label}");
        }
        Ok(())
    }
}

/// Options accepted by `reset` on both listeners.
#[derive(Debug, Clone)]
pub struct ResetOptions {
    /// Raise [`PendingMockError`] when mocks are still pending. Defaults
    /// to true; opt out to discard leftovers silently (they are still
    /// logged).
    pub throw_on_pending: bool,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            throw_on_pending: true,
        }
    }
}
