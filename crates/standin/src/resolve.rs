//! The resolver: coerce polymorphic response descriptors into concrete
//! bytes, integers, booleans and header lists.
//!
//! Every coercer follows the same calling discipline: a function value is
//! invoked with the caller-supplied `args` first, and a fault in that call
//! reads as "no value". The coercion then applies with a defensive default,
//! so a buggy descriptor degrades to an empty body / zero delay / status
//! 200 instead of crashing the server mid-response.

use bytes::Bytes;
use tracing::debug;

use crate::diag;
use crate::value::Value;

/// Invoke a function value once; pass every other shape through.
fn resolve_once(value: &Value, args: &[Value]) -> Value {
    match value {
        Value::Fn(callable) => callable.invoke(args).unwrap_or(Value::Absent),
        other => other.clone(),
    }
}

/// Coerce to a byte payload. Strings encode as UTF-8; anything that is not
/// bytes or a string resolves to an empty buffer.
pub fn to_bytes(value: &Value, args: &[Value]) -> Bytes {
    match resolve_once(value, args) {
        Value::Bytes(bytes) => bytes,
        Value::Str(text) => Bytes::from(text.into_bytes()),
        other => {
            if !other.is_absent() {
                debug!(
                    target: diag::SERVER,
                    "not bufferable, defaulting to empty: {}",
                    other.inspect()
                );
            }
            Bytes::new()
        }
    }
}

/// Coerce to an integer; the default (used for delays) is 0. Negative
/// delays are clamped by the callers, not here.
pub fn to_int(value: &Value, args: &[Value]) -> i64 {
    match resolve_once(value, args) {
        Value::Int(n) => n,
        other => {
            if !other.is_absent() {
                debug!(
                    target: diag::SERVER,
                    "not an integer, defaulting to 0: {}",
                    other.inspect()
                );
            }
            0
        }
    }
}

/// The dedicated status-code coercer: an integer in the valid HTTP range,
/// else 200.
pub fn to_status(value: &Value, args: &[Value]) -> u16 {
    match resolve_once(value, args) {
        Value::Int(n) if (100..=999).contains(&n) => n as u16,
        other => {
            if !other.is_absent() {
                debug!(
                    target: diag::SERVER,
                    "not a status code, defaulting to 200: {}",
                    other.inspect()
                );
            }
            200
        }
    }
}

/// Coerce to a boolean; anything else is false.
pub fn to_bool(value: &Value, args: &[Value]) -> bool {
    match resolve_once(value, args) {
        Value::Bool(b) => b,
        other => {
            if !other.is_absent() {
                debug!(
                    target: diag::SERVER,
                    "not a boolean, defaulting to false: {}",
                    other.inspect()
                );
            }
            false
        }
    }
}

/// Coerce to a header list: resolve to a map, then run every value through
/// [`to_bytes`]. A non-map resolves to no headers at all.
pub fn to_headers(value: &Value, args: &[Value]) -> Vec<(String, Bytes)> {
    match resolve_once(value, args) {
        Value::Map(map) => map
            .into_iter()
            .map(|(name, v)| (name, to_bytes(&v, args)))
            .collect(),
        other => {
            if !other.is_absent() {
                debug!(
                    target: diag::SERVER,
                    "not a header map, defaulting to none: {}",
                    other.inspect()
                );
            }
            Vec::new()
        }
    }
}
