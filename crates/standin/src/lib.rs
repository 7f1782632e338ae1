//! `standin` is a programmable network mock server for test suites.
//!
//! Tests register expected request/response pairs ("mocks"), point the
//! software under test at the listener's ephemeral port, drive it over real
//! sockets, then assert that the expected traffic was observed. Because the
//! server is an actual listening socket (not an in-process shim), the
//! software under test traverses its real networking stack.
//!
//! Two listeners share one matching and dispatch engine:
//!
//! - [`http_server`] parses HTTP/1.1 requests and matches them against
//!   structured predicates over method, pathname, query, headers and body;
//! - [`tcp_server`] accumulates raw bytes per connection and matches the
//!   whole receive buffer, with **init** (server-speaks-first) payloads and
//!   **connection pinning** for protocols that multiplex several exchanges
//!   over one socket.
//!
//! ```no_run
//! use standin::{http_server, ServerOptions, Value};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = http_server(ServerOptions::default()).await?;
//!     let handle = server.mock(Value::map([
//!         ("req", Value::map([
//!             ("method", Value::from("POST")),
//!             ("pathname", Value::from("/bloop")),
//!         ])),
//!         ("res", Value::map([
//!             ("statusCode", Value::from(200)),
//!             ("body", Value::from("bloop")),
//!         ])),
//!     ]))?;
//!
//!     // ... drive the software under test against server.port() ...
//!
//!     handle.assert_done()?;
//!     server.teardown().await;
//!     Ok(())
//! }
//! ```
//!
//! Predicate leaves are polymorphic: a literal string or byte buffer, a
//! pre-compiled regular expression, or a named predicate function. Response
//! descriptors accept literals or functions at every field; a faulty user
//! function is logged and falls back to a safe default rather than taking
//! the server down mid-response.
//!
//! Diagnostics are emitted on two `tracing` targets, `standin::server`
//! (connection lifecycle, matches, delays, writes) and `standin::matcher`
//! (why a comparison returned false). Set `STANDIN_DEBUG=server`,
//! `matcher`, or `all` to enable them without wiring a subscriber.

pub mod compare;
pub mod helpers;
pub mod resolve;
pub mod validate;
pub mod value;

mod diag;
mod error;
mod http;
mod mock;
mod tcp;

pub use error::{PendingMockError, ValidationError};
pub use http::{http_server, HttpMockHandle, HttpServer};
pub use mock::ResetOptions;
pub use tcp::{tcp_server, TcpMockHandle, TcpServer};
pub use value::{Callable, Value};

/// Options accepted by [`http_server`] and [`tcp_server`].
///
/// The defaults bind an ephemeral port on the loopback interface, which is
/// what a test almost always wants; the bound port is reported back via
/// `port()` on the returned server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port to bind; `0` picks an ephemeral port.
    pub port: u16,
    /// Interface to bind.
    pub host: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 0,
            host: "127.0.0.1".to_string(),
        }
    }
}
