//! Check combinators.
//!
//! Leaf checks assert one [`Value`] shape; the structural combinators
//! compose them into schemas. All combinators are pure and cheap to clone
//! (checks are `Arc`ed closures).

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::{issue, Check, Checked};
use crate::diag;
use crate::value::{Callable, Value};

fn leaf(expected: &'static str, test: fn(&Value) -> bool) -> Check {
    Arc::new(move |value, path| {
        if test(value) {
            Checked::ok(value.clone())
        } else {
            Checked::fail(value, issue(path, &format!("expected {expected}"), value))
        }
    })
}

/// Matches only `Value::Str`.
pub fn string() -> Check {
    leaf("a string", |v| matches!(v, Value::Str(_)))
}

/// Matches only `Value::Bytes`.
pub fn bytes() -> Check {
    leaf("a byte buffer", |v| matches!(v, Value::Bytes(_)))
}

/// Matches only `Value::Bool`.
pub fn boolean() -> Check {
    leaf("a boolean", |v| matches!(v, Value::Bool(_)))
}

/// Matches only `Value::Int`.
pub fn integer() -> Check {
    leaf("an integer", |v| matches!(v, Value::Int(_)))
}

/// Matches only `Value::Regex`.
pub fn regex() -> Check {
    leaf("a regular expression", |v| matches!(v, Value::Regex(_)))
}

/// Matches only `Value::Fn`.
pub fn callable() -> Check {
    leaf("a function", |v| matches!(v, Value::Fn(_)))
}

/// Matches only `Value::Absent` (an omitted attribute).
pub fn absent() -> Check {
    leaf("nothing", |v| v.is_absent())
}

/// Accepts any value unchanged. Used as the identity refinement.
pub fn anything() -> Check {
    Arc::new(|value, _| Checked::ok(value.clone()))
}

/// Shape gate for [`branch`]: any object, contents unchecked.
pub fn any_object() -> Check {
    leaf("an object", |v| matches!(v, Value::Map(_)))
}

/// Shape gate for [`branch`]: any sequence, elements unchecked.
pub fn any_sequence() -> Check {
    leaf("a sequence", |v| matches!(v, Value::Seq(_)))
}

/// Apply a per-field check to each schema attribute, aggregating errors
/// and producing a canonicalized copy. Attributes outside the schema are
/// rejected; absent conformed fields are dropped from the copy.
pub fn object(fields: &[(&'static str, Check)]) -> Check {
    let fields: Vec<(&'static str, Check)> = fields.to_vec();
    Arc::new(move |value, path| {
        let Value::Map(map) = value else {
            return Checked::fail(value, issue(path, "expected an object", value));
        };

        let mut errors = Vec::new();
        let mut conformed = BTreeMap::new();

        for (name, check) in &fields {
            let field = map.get(*name).unwrap_or(&Value::Absent);
            let child = format!("{path}.{name}");
            let checked = check(field, &child);
            errors.extend(checked.errors);
            if !checked.conformed.is_absent() {
                conformed.insert((*name).to_string(), checked.conformed);
            }
        }

        for (key, stray) in map {
            if !fields.iter().any(|(name, _)| *name == key.as_str()) {
                errors.push(issue(&format!("{path}.{key}"), "unknown attribute", stray));
            }
        }

        Checked {
            conformed: Value::Map(conformed),
            errors,
        }
    })
}

/// Apply `item` to every element of a sequence.
pub fn array(item: Check) -> Check {
    Arc::new(move |value, path| {
        let Value::Seq(items) = value else {
            return Checked::fail(value, issue(path, "expected a sequence", value));
        };

        let mut errors = Vec::new();
        let mut conformed = Vec::with_capacity(items.len());
        for (i, element) in items.iter().enumerate() {
            let child = format!("{path}.{i}");
            let checked = item(element, &child);
            errors.extend(checked.errors);
            conformed.push(checked.conformed);
        }
        Checked {
            conformed: Value::Seq(conformed),
            errors,
        }
    })
}

/// Apply `key` to every key (as a string value) and `value_check` to every
/// value of a mapping with caller-chosen keys.
pub fn mapping(key: Check, value_check: Check) -> Check {
    Arc::new(move |value, path| {
        let Value::Map(map) = value else {
            return Checked::fail(value, issue(path, "expected a mapping", value));
        };

        let mut errors = Vec::new();
        let mut conformed = BTreeMap::new();
        for (name, entry) in map {
            let child = format!("{path}.{name}");
            let key_checked = key(&Value::Str(name.clone()), &child);
            errors.extend(key_checked.errors);
            let checked = value_check(entry, &child);
            errors.extend(checked.errors);
            conformed.insert(name.clone(), checked.conformed);
        }
        Checked {
            conformed: Value::Map(conformed),
            errors,
        }
    })
}

/// Run checks in sequence, threading the conformed value; stop at the
/// first failure.
pub fn and(checks: Vec<Check>) -> Check {
    Arc::new(move |value, path| {
        let mut current = value.clone();
        for check in &checks {
            let checked = check(&current, path);
            if !checked.errors.is_empty() {
                return checked;
            }
            current = checked.conformed;
        }
        Checked::ok(current)
    })
}

/// Pick the first arm whose gate conforms, then apply the matching
/// refinement to the gate's output. No arm ⇒ one error naming
/// `expectation`.
pub fn branch(arms: Vec<(Check, Check)>, expectation: &str) -> Check {
    let expectation = expectation.to_string();
    Arc::new(move |value, path| {
        for (gate, refine) in &arms {
            let gated = gate(value, path);
            if gated.errors.is_empty() {
                return refine(&gated.conformed, path);
            }
        }
        Checked::fail(value, issue(path, &format!("expected {expectation}"), value))
    })
}

/// The first check that conforms wins; otherwise one error naming
/// `expectation`.
pub fn or(checks: Vec<Check>, expectation: &str) -> Check {
    branch(
        checks.into_iter().map(|c| (c, anything())).collect(),
        expectation,
    )
}

/// Reject objects carrying an attribute from `group_a` together with one
/// from `group_b`. Non-objects pass through untouched (an `object` check
/// elsewhere reports those).
pub fn exclusive(group_a: &[&'static str], group_b: &[&'static str]) -> Check {
    let group_a: Vec<&'static str> = group_a.to_vec();
    let group_b: Vec<&'static str> = group_b.to_vec();
    Arc::new(move |value, path| {
        let Value::Map(map) = value else {
            return Checked::ok(value.clone());
        };
        // An attribute explicitly set to absent counts as omitted.
        let present = |k: &&str| map.get(*k).is_some_and(|v| !v.is_absent());
        let in_a: Vec<&str> = group_a.iter().copied().filter(|k| present(k)).collect();
        let in_b: Vec<&str> = group_b.iter().copied().filter(|k| present(k)).collect();
        if !in_a.is_empty() && !in_b.is_empty() {
            let message = format!(
                "cannot combine {} with {}",
                in_a.join(", "),
                in_b.join(", ")
            );
            return Checked::fail(value, issue(path, &message, value));
        }
        Checked::ok(value.clone())
    })
}

/// Run `inner`, replacing its diagnostics with one human message.
pub fn alias(inner: Check, message: &str) -> Check {
    let message = message.to_string();
    Arc::new(move |value, path| {
        let checked = inner(value, path);
        if checked.errors.is_empty() {
            checked
        } else {
            Checked::fail(value, issue(path, &message, value))
        }
    })
}

/// Accept a function whose *output* must conform to `inner`.
///
/// The conformed value is a guard function: at each call site it invokes
/// the user function and re-validates the result against `inner` under the
/// path suffixed with `()`. Guard failures are logged on the server
/// diagnostics channel and resolve as absent, so the resolver defaults
/// apply instead of the fault propagating. Re-validating an
/// already-guarded function leaves it untouched.
pub fn late_bound(inner: Check) -> Check {
    Arc::new(move |value, path| {
        let Value::Fn(user) = value else {
            return Checked::fail(value, issue(path, "expected a function", value));
        };
        if user.is_guard() {
            return Checked::ok(value.clone());
        }

        let user = user.clone();
        let inner = inner.clone();
        let call_path = format!("{path}()");
        let callee = user.clone();
        let guard = Callable::guard(user.name(), move |args: &[Value]| {
            let Some(out) = callee.invoke(args) else {
                return Value::Absent;
            };
            let checked = inner(&out, &call_path);
            if checked.errors.is_empty() {
                checked.conformed
            } else {
                for error in &checked.errors {
                    warn!(target: diag::SERVER, "{error}");
                }
                Value::Absent
            }
        });
        Checked::ok(Value::Fn(guard))
    })
}
