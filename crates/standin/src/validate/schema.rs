//! Mock option schemas, built from the check combinators.
//!
//! Three public schemas exist: HTTP mocks, TCP mocks, and TCP *child*
//! mocks (spawned from a handle to join a pinning group, where `init` is
//! not allowed).
//!
//! Structured alternatives are expressed with `branch` rather than `or`:
//! the gate only tests the value's shape, so diagnostics from inside the
//! chosen refinement keep their precise paths instead of collapsing into
//! one generic "expected X" message.

use super::combinators::{
    absent, alias, and, any_object, any_sequence, anything, array, boolean, branch, bytes,
    callable, exclusive, integer, late_bound, mapping, object, or, regex, string,
};
use super::Check;

const LEAF_EXPECTATION: &str =
    "a string, a byte buffer, a regular expression, or a predicate function";

/// A leaf request predicate: literal, regex, function, or omitted.
fn leaf_predicate() -> Check {
    or(
        vec![absent(), string(), bytes(), regex(), callable()],
        LEAF_EXPECTATION,
    )
}

/// A header-map entry: a leaf predicate, or a sequence of leaf predicates
/// for repeated header fields.
fn header_entry_predicate() -> Check {
    branch(
        vec![
            (absent(), anything()),
            (string(), anything()),
            (bytes(), anything()),
            (regex(), anything()),
            (callable(), anything()),
            (
                any_sequence(),
                array(or(
                    vec![string(), bytes(), regex(), callable()],
                    LEAF_EXPECTATION,
                )),
            ),
        ],
        "a leaf predicate or a sequence of leaf predicates",
    )
}

/// The `headers` predicate: a leaf over the whole header map, or a mapping
/// from wire-case header names to entry predicates.
fn headers_predicate() -> Check {
    branch(
        vec![
            (absent(), anything()),
            (string(), anything()),
            (bytes(), anything()),
            (regex(), anything()),
            (callable(), anything()),
            (any_object(), mapping(string(), header_entry_predicate())),
        ],
        "a leaf predicate or a mapping of header names to predicates",
    )
}

/// The `req` attribute of an HTTP mock: a whole-request predicate function
/// or a structured request record.
fn http_request_predicate() -> Check {
    branch(
        vec![
            (absent(), anything()),
            (callable(), anything()),
            (
                any_object(),
                object(&[
                    ("method", leaf_predicate()),
                    ("pathname", leaf_predicate()),
                    ("query", leaf_predicate()),
                    ("headers", headers_predicate()),
                    ("body", leaf_predicate()),
                ]),
            ),
        ],
        "a request predicate function or a request record",
    )
}

/// Anything coercible to bytes.
fn bufferable() -> Check {
    or(
        vec![absent(), string(), bytes()],
        "a string or a byte buffer",
    )
}

/// A bufferable literal, or a function producing one at response time.
fn bufferable_attr() -> Check {
    or(
        vec![absent(), string(), bytes(), late_bound(bufferable())],
        "a string, a byte buffer, or a function returning one",
    )
}

/// An integer literal, or a function producing one at response time.
fn integer_attr() -> Check {
    or(
        vec![
            absent(),
            integer(),
            late_bound(or(vec![absent(), integer()], "an integer")),
        ],
        "an integer or a function returning one",
    )
}

/// A boolean literal, or a function producing one at response time.
fn boolean_attr() -> Check {
    or(
        vec![
            absent(),
            boolean(),
            late_bound(or(vec![absent(), boolean()], "a boolean")),
        ],
        "a boolean or a function returning one",
    )
}

/// The `headers` attribute of an HTTP response: a mapping of names to
/// bufferable attributes, or a function producing the whole mapping.
fn response_headers_attr() -> Check {
    branch(
        vec![
            (absent(), anything()),
            (
                late_bound(branch(
                    vec![
                        (absent(), anything()),
                        (any_object(), mapping(string(), bufferable())),
                    ],
                    "a header mapping",
                )),
                anything(),
            ),
            (any_object(), mapping(string(), bufferable_attr())),
        ],
        "a header mapping or a function returning one",
    )
}

/// The structured HTTP response record.
fn http_response_record() -> Check {
    object(&[
        ("body", bufferable_attr()),
        ("statusCode", integer_attr()),
        ("headers", response_headers_attr()),
        ("headerDelay", integer_attr()),
        ("bodyDelay", integer_attr()),
        ("destroySocket", boolean_attr()),
    ])
}

/// The `res` attribute of an HTTP mock.
fn http_response() -> Check {
    branch(
        vec![
            (absent(), anything()),
            (
                late_bound(branch(
                    vec![
                        (absent(), anything()),
                        (any_object(), http_response_record()),
                    ],
                    "a response record",
                )),
                anything(),
            ),
            (any_object(), http_response_record()),
        ],
        "a response record or a function returning one",
    )
}

/// The full HTTP mock options schema.
pub fn http_mock() -> Check {
    object(&[("req", http_request_predicate()), ("res", http_response())])
}

/// The structured TCP response record.
fn tcp_response_record() -> Check {
    object(&[
        ("body", bufferable_attr()),
        ("bodyDelay", integer_attr()),
        ("destroySocket", boolean_attr()),
    ])
}

/// The `res` attribute of a TCP mock: a bufferable literal, a response
/// record, or a function producing either.
fn tcp_response() -> Check {
    branch(
        vec![
            (absent(), anything()),
            (string(), anything()),
            (bytes(), anything()),
            (
                late_bound(branch(
                    vec![
                        (absent(), anything()),
                        (string(), anything()),
                        (bytes(), anything()),
                        (any_object(), tcp_response_record()),
                    ],
                    "a payload or a response record",
                )),
                anything(),
            ),
            (any_object(), tcp_response_record()),
        ],
        "a payload, a response record, or a function returning one",
    )
}

/// The `init` attribute: a payload written as soon as a connection is
/// accepted, or a function producing one.
fn tcp_init() -> Check {
    or(
        vec![absent(), string(), bytes(), late_bound(bufferable())],
        "a payload or a function returning one",
    )
}

/// The full TCP mock options schema. `init` and `req`/`res` are mutually
/// exclusive: a mock either speaks first or answers traffic, never both.
pub fn tcp_mock() -> Check {
    and(vec![
        exclusive(&["init"], &["req", "res"]),
        object(&[
            ("init", tcp_init()),
            ("req", leaf_predicate()),
            ("res", tcp_response()),
        ]),
    ])
}

/// The schema for pinned child mocks: as [`tcp_mock`], minus `init`.
pub fn tcp_child_mock() -> Check {
    object(&[
        (
            "init",
            alias(absent(), "init is not allowed on a pinned child mock"),
        ),
        ("req", leaf_predicate()),
        ("res", tcp_response()),
    ])
}
