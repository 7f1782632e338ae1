//! The comparator: does `desired` describe `actual`?
//!
//! [`is_match`] is total and pure: it never propagates user faults and
//! repeated calls return the same result. Every `false` leaf emits a
//! `trace!` on the `standin::matcher` target naming the rule that failed,
//! which is the first place to look when a mock unexpectedly stays
//! pending.

use tracing::trace;

use crate::diag;
use crate::value::Value;

/// Decide whether the predicate `desired` is satisfied by `actual`.
///
/// The rules, applied in order:
///
/// 1. an absent predicate is a wildcard;
/// 2. a function predicate is invoked with `actual`; a fault or a
///    non-boolean result reads as `false`;
/// 3. maps recurse per desired key (missing actual keys read as absent,
///    extra actual keys are ignored);
/// 4. sequences recurse per desired index (`desired` may be a prefix);
/// 5. byte buffers compare byte-exact;
/// 6. bytes against a string compare via the buffer's UTF-8 interpretation;
/// 7. strings compare exactly, case-sensitive;
/// 8. a regex tests the (UTF-8 interpreted) string or buffer;
/// 9. anything else is a mismatch.
pub fn is_match(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Absent, _) => true,

        (Value::Fn(predicate), _) => match predicate.invoke(std::slice::from_ref(actual)) {
            Some(Value::Bool(verdict)) => {
                if !verdict {
                    trace!(
                        target: diag::MATCHER,
                        "predicate `{}` rejected {}",
                        predicate.name(),
                        actual.inspect()
                    );
                }
                verdict
            }
            Some(other) => {
                trace!(
                    target: diag::MATCHER,
                    "predicate `{}` returned non-boolean {}",
                    predicate.name(),
                    other.inspect()
                );
                false
            }
            None => {
                trace!(target: diag::MATCHER, "predicate `{}` faulted", predicate.name());
                false
            }
        },

        (Value::Map(want), Value::Map(_)) => want
            .iter()
            .all(|(key, want_value)| is_match(want_value, actual.get(key))),

        (Value::Seq(want), Value::Seq(have)) => want.iter().enumerate().all(|(i, want_value)| {
            let have_value = have.get(i).unwrap_or(&Value::Absent);
            is_match(want_value, have_value)
        }),

        (Value::Bytes(want), Value::Bytes(have)) => {
            let hit = want == have;
            if !hit {
                trace!(
                    target: diag::MATCHER,
                    "bytes {} != {}",
                    desired.inspect(),
                    actual.inspect()
                );
            }
            hit
        }

        (Value::Bytes(want), Value::Str(have)) => {
            text_eq(&String::from_utf8_lossy(want), have, desired, actual)
        }
        (Value::Str(want), Value::Bytes(have)) => {
            text_eq(want, &String::from_utf8_lossy(have), desired, actual)
        }

        (Value::Str(want), Value::Str(have)) => text_eq(want, have, desired, actual),

        (Value::Regex(re), Value::Str(have)) => regex_test(re, have, actual),
        (Value::Regex(re), Value::Bytes(have)) => {
            regex_test(re, &String::from_utf8_lossy(have), actual)
        }

        _ => {
            trace!(
                target: diag::MATCHER,
                "no rule for {} vs {}",
                desired.type_name(),
                actual.type_name()
            );
            false
        }
    }
}

fn text_eq(want: &str, have: &str, desired: &Value, actual: &Value) -> bool {
    let hit = want == have;
    if !hit {
        trace!(
            target: diag::MATCHER,
            "text {} != {}",
            desired.inspect(),
            actual.inspect()
        );
    }
    hit
}

fn regex_test(re: &regex::Regex, text: &str, actual: &Value) -> bool {
    let hit = re.is_match(text);
    if !hit {
        trace!(
            target: diag::MATCHER,
            "/{}/ did not match {}",
            re.as_str(),
            actual.inspect()
        );
    }
    hit
}
