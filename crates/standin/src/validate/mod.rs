//! The validation layer.
//!
//! Validation is compositional: a *check* is a pure function
//! `(value, path) -> Checked { conformed, errors }`. Checks for leaf types
//! combine through [`combinators`] (`object`, `array`, `mapping`, `or`,
//! `and`, `branch`, `exclusive`, `alias`, `late_bound`) into the mock
//! option schemas in [`schema`].
//!
//! Errors are formatted as
//! `` `dot.joined.path` message (got <inspected-value>) `` and aggregated
//! across fields, so a malformed declaration reports every problem at
//! once. On success the conformed (canonicalized) copy of the input is
//! returned; function-valued fields that must produce a schema-shaped
//! result are conformed into *guards* that re-validate the function's
//! output at each call site, reporting failures under the path suffixed
//! with `()` (for example `options.res.statusCode()`).

pub mod combinators;
pub mod schema;

use std::sync::Arc;

use crate::error::ValidationError;
use crate::value::Value;

/// The result of running a check.
pub struct Checked {
    /// Canonicalized copy of the input; meaningful only when `errors` is
    /// empty.
    pub conformed: Value,
    pub errors: Vec<String>,
}

impl Checked {
    pub fn ok(conformed: Value) -> Self {
        Self {
            conformed,
            errors: Vec::new(),
        }
    }

    pub fn fail(value: &Value, error: String) -> Self {
        Self {
            conformed: value.clone(),
            errors: vec![error],
        }
    }
}

/// A composable validation predicate.
pub type Check = Arc<dyn Fn(&Value, &str) -> Checked + Send + Sync>;

/// Format one diagnostic in the canonical shape.
pub(crate) fn issue(path: &str, message: &str, value: &Value) -> String {
    format!("`{path}` {message} (got {})", value.inspect())
}

/// Run `check` against `options` (rooted at the path `options`), returning
/// the conformed copy or a [`ValidationError`] joining every issue.
pub fn conform(options: &Value, check: &Check) -> Result<Value, ValidationError> {
    let checked = check(options, "options");
    if checked.errors.is_empty() {
        Ok(checked.conformed)
    } else {
        Err(ValidationError::new(checked.errors))
    }
}
