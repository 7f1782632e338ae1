//! Diagnostics channels.
//!
//! Two `tracing` targets carry the server's debug output:
//!
//! - [`SERVER`]: connection lifecycle, matches, delays, writes, and
//!   swallowed user-callable faults;
//! - [`MATCHER`]: the comparator trace explaining why a comparison
//!   returned false.
//!
//! Both are ordinary tracing targets, so any subscriber the host process
//! installs will see them. For the common case of a test run with no
//! subscriber, [`init`] inspects `STANDIN_DEBUG` once per process and
//! installs a fmt subscriber filtered to the requested streams. The flag is
//! process-wide state initialized at startup; there is no teardown.

use std::sync::Once;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const SERVER: &str = "standin::server";
pub const MATCHER: &str = "standin::matcher";

static INIT: Once = Once::new();

/// Install the diagnostics subscriber if `STANDIN_DEBUG` asks for one.
///
/// Recognized values: `server`, `matcher`, `all` (or `1`), or any
/// comma-separated combination. A no-op when the variable is unset or a
/// global subscriber is already installed.
pub fn init() {
    INIT.call_once(|| {
        let Ok(spec) = std::env::var("STANDIN_DEBUG") else {
            return;
        };
        let spec = spec.trim().to_ascii_lowercase();
        if spec.is_empty() || spec == "0" {
            return;
        }

        let mut filter = EnvFilter::new("off");
        let all = spec == "all" || spec == "1" || spec == "true";
        for stream in spec.split(',').map(str::trim) {
            if all || stream == "server" {
                filter = filter.add_directive(
                    format!("{SERVER}={}", LevelFilter::TRACE)
                        .parse()
                        .expect("static directive"),
                );
            }
            if all || stream == "matcher" {
                filter = filter.add_directive(
                    format!("{MATCHER}={}", LevelFilter::TRACE)
                        .parse()
                        .expect("static directive"),
                );
            }
        }

        // Ignore failure: the host already installed a subscriber, which
        // then owns filtering for our targets.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
