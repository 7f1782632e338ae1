//! Convenience predicates for common body encodings.
//!
//! These are thin adapters: each wraps a named predicate function around a
//! parser, so structural equality replaces brittle byte-exact comparisons
//! of encoded bodies.

use serde_json::Value as Json;

use crate::value::Value;

/// Match a body whose JSON parse deep-equals `expected`.
///
/// `{"a":1, "b":2}` and `{"b":2,"a":1}` both match `json!({"a":1,"b":2})`;
/// a body that fails to parse never matches.
pub fn json_match(expected: Json) -> Value {
    Value::func("jsonMatch", move |args| {
        let actual = match args.first() {
            Some(Value::Bytes(bytes)) => serde_json::from_slice::<Json>(bytes).ok(),
            Some(Value::Str(text)) => serde_json::from_str::<Json>(text).ok(),
            _ => None,
        };
        Value::Bool(actual.as_ref() == Some(&expected))
    })
}

/// Match an `application/x-www-form-urlencoded` body against exact
/// `(key, value)` pairs, in order.
pub fn form_match(expected: &[(&str, &str)]) -> Value {
    let expected: Vec<(String, String)> = expected
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Value::func("formMatch", move |args| {
        let body = match args.first() {
            Some(Value::Bytes(bytes)) => String::from_utf8_lossy(bytes).to_string(),
            Some(Value::Str(text)) => text.clone(),
            _ => return Value::Bool(false),
        };
        Value::Bool(parse_form(&body).as_deref() == Some(&expected[..]))
    })
}

/// Match a query string (the literal `?...` form) against exact
/// `(key, value)` pairs, in order, ignoring the leading `?`.
///
/// Useful when the query predicate should not depend on percent-encoding
/// details: any encoding that decodes to the same pairs matches.
pub fn query_match(expected: &[(&str, &str)]) -> Value {
    let expected: Vec<(String, String)> = expected
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Value::func("queryMatch", move |args| {
        let query = match args.first() {
            Some(Value::Str(text)) => text.clone(),
            Some(Value::Bytes(bytes)) => String::from_utf8_lossy(bytes).to_string(),
            _ => return Value::Bool(false),
        };
        let bare = query.strip_prefix('?').unwrap_or(&query);
        Value::Bool(parse_form(bare).as_deref() == Some(&expected[..]))
    })
}

fn parse_form(body: &str) -> Option<Vec<(String, String)>> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key).ok()?.into_owned();
            let value = urlencoding::decode(value).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}
