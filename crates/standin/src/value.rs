//! The polymorphic value model shared by predicates and response
//! descriptors.
//!
//! Nearly every field of a mock declaration accepts values of mixed shape:
//! a literal string or byte buffer, a pre-compiled regular expression, a
//! named function, or a nested record. [`Value`] is the tagged union that
//! carries all of them; the comparator, resolver and validator branch on
//! the tag so the hot path does no reflection.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use regex::Regex;
use tracing::warn;

use crate::diag;

/// The wildcard value returned for missing map keys.
static ABSENT: Value = Value::Absent;

/// A named user function over [`Value`]s.
///
/// The name is what printable mock forms and diagnostics display; pick the
/// name a reader would recognize (`"jsonMatch"`, `"isAdmin"`, ...).
///
/// Invocation is panic-isolated: a panicking function is a *fault*, which
/// the engine logs and treats as "no value". A buggy predicate therefore
/// reads as a non-match and a buggy response field resolves to its default,
/// but neither can crash the shared server.
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    f: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
    guard: bool,
}

impl Callable {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            f: Arc::new(f),
            guard: false,
        }
    }

    /// A validator-produced wrapper that re-checks its output at call time.
    /// Marked so that re-validating an already-conformed declaration does
    /// not wrap it twice (validation is idempotent).
    pub(crate) fn guard<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            f: Arc::new(f),
            guard: true,
        }
    }

    pub(crate) fn is_guard(&self) -> bool {
        self.guard
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the function, converting a panic into `None`.
    pub fn invoke(&self, args: &[Value]) -> Option<Value> {
        match catch_unwind(AssertUnwindSafe(|| (self.f)(args))) {
            Ok(value) => Some(value),
            Err(panic) => {
                warn!(
                    target: diag::SERVER,
                    "callable `{}` raised: {}",
                    self.name,
                    panic_message(&panic)
                );
                None
            }
        }
    }

    /// Identity comparison; two callables are equal only if they share the
    /// same underlying function object.
    pub fn same(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.name)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A polymorphic predicate or descriptor value.
///
/// `Absent` is the explicit wildcard: an omitted field, a missing map key
/// and `Value::Absent` all behave identically.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Absent,
    Str(String),
    Bytes(Bytes),
    Int(i64),
    Bool(bool),
    Regex(Arc<Regex>),
    Fn(Callable),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Compile `pattern` into a regex value.
    pub fn regex(pattern: &str) -> Result<Value, regex::Error> {
        Ok(Value::Regex(Arc::new(Regex::new(pattern)?)))
    }

    /// Wrap a named function.
    pub fn func<F>(name: &str, f: F) -> Value
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Value::Fn(Callable::new(name, f))
    }

    /// Build a map from `(key, value)` pairs.
    pub fn map<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    /// Build a sequence.
    pub fn seq<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
    {
        Value::Seq(items.into_iter().collect())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Map lookup; any missing key (or a non-map receiver) reads as
    /// [`Value::Absent`].
    pub fn get(&self, key: &str) -> &Value {
        match self {
            Value::Map(map) => map.get(key).unwrap_or(&ABSENT),
            _ => &ABSENT,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The noun used in validation diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Regex(_) => "regex",
            Value::Fn(_) => "function",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "object",
        }
    }

    /// Human-readable form used in diagnostics and printable mock forms.
    ///
    /// Strings are quoted, byte buffers rendered as `b"..."` (escaped,
    /// truncated past 64 bytes), regexes as `/pattern/`, functions by their
    /// source name, maps as `{k=v, ...}` with absent fields suppressed.
    pub fn inspect(&self) -> String {
        match self {
            Value::Absent => "absent".to_string(),
            Value::Str(s) => format!("{s:?}"),
            Value::Bytes(b) => inspect_bytes(b),
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Regex(r) => format!("/{}/", r.as_str()),
            Value::Fn(c) => c.name().to_string(),
            Value::Seq(items) => {
                let inner: Vec<String> = items.iter().map(Value::inspect).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .filter(|(_, v)| !v.is_absent())
                    .map(|(k, v)| format!("{k}={}", v.inspect()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }
}

fn inspect_bytes(bytes: &Bytes) -> String {
    let mut out = String::from("b\"");
    for &b in bytes.iter().take(64) {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('"');
    if bytes.len() > 64 {
        out.push_str(&format!(" (+{} bytes)", bytes.len() - 64));
    }
    out
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Absent, Value::Absent) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            (Value::Fn(a), Value::Fn(b)) => a.same(b),
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(b))
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Int(n as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
