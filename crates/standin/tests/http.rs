//! End-to-end tests for the HTTP listener, driven over real sockets.
//!
//! Well-behaved client traffic goes through `reqwest`; wire-level
//! assertions (header case, split flushes, resets) use raw `TcpStream`s,
//! because a polite HTTP client normalizes exactly the things these tests
//! need to observe.

use std::time::{Duration, Instant};

use serde_json::json;
use standin::helpers::json_match;
use standin::{http_server, ResetOptions, ServerOptions, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn server() -> standin::HttpServer {
    http_server(ServerOptions::default())
        .await
        .expect("listener should bind")
}

/// Send raw bytes and collect the full response (the request must ask for
/// `Connection: close`).
async fn raw_exchange(port: u16, request: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

fn body_of(response: &[u8]) -> &[u8] {
    let at = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response should have a head");
    &response[at + 4..]
}

#[tokio::test]
async fn basic_post_match() {
    let server = server().await;
    let handle = server
        .mock(Value::map([
            (
                "req",
                Value::map([
                    ("method", Value::from("POST")),
                    ("pathname", Value::from("/bloop")),
                ]),
            ),
            (
                "res",
                Value::map([
                    ("statusCode", Value::from(200)),
                    ("body", Value::from("bloop")),
                ]),
            ),
        ]))
        .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/bloop", server.port()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"bloop");
    handle.assert_done().unwrap();
    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn empty_mock_matches_anything_with_an_empty_200() {
    let server = server().await;
    let handle = server.mock(Value::map::<&str, _>([])).unwrap();

    let response = reqwest::get(format!("http://127.0.0.1:{}/whatever", server.port()))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.headers().get("content-type").is_none());
    assert!(response.bytes().await.unwrap().is_empty());

    handle.assert_done().unwrap();
    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn fallback_404_quotes_the_request_line() {
    let server = server().await;
    let response = raw_exchange(
        server.port(),
        "GET /nope?x=1 HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;

    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert_eq!(
        body_of(&response),
        b"No matching mock was found for [GET /nope?x=1 HTTP/1.1]"
    );
    server.teardown().await;
}

#[tokio::test]
async fn json_body_match_and_mismatch() {
    let server = server().await;
    server
        .mock(Value::map([
            (
                "req",
                Value::map([("body", json_match(json!({"a": 1, "b": ["c", 2, {}]})))]),
            ),
            ("res", Value::map([("body", Value::from("ok"))])),
        ]))
        .unwrap();

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/", server.port());

    // Wrong value: falls through to the 404 fallback.
    let miss = client
        .post(&url)
        .body(r#"{"a":1,"b":["c",3,{}]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(miss.status().as_u16(), 404);

    // Structural match, independent of key order.
    let hit = client
        .post(&url)
        .body(r#"{"b":["c",2,{}],"a":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(hit.status().as_u16(), 200);
    assert_eq!(hit.bytes().await.unwrap().as_ref(), b"ok");

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn header_names_match_in_wire_case() {
    let server = server().await;
    server
        .mock(Value::map([
            (
                "req",
                Value::map([(
                    "headers",
                    Value::map([("X-Bloop", Value::from("true"))]),
                )]),
            ),
            ("res", Value::map([("body", Value::from("hit"))])),
        ]))
        .unwrap();

    // Lowercased wire name does not match the predicate.
    let miss = raw_exchange(
        server.port(),
        "GET / HTTP/1.1\r\nx-bloop: true\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(String::from_utf8_lossy(&miss).starts_with("HTTP/1.1 404"));

    let hit = raw_exchange(
        server.port(),
        "GET / HTTP/1.1\r\nX-Bloop: true\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(String::from_utf8_lossy(&hit).starts_with("HTTP/1.1 200"));

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn repeated_headers_align_element_wise() {
    let server = server().await;
    server
        .mock(Value::map([
            (
                "req",
                Value::map([(
                    "headers",
                    Value::map([(
                        "X-N",
                        Value::seq([Value::from("1"), Value::from("2")]),
                    )]),
                )]),
            ),
            ("res", Value::map([("body", Value::from("both"))])),
        ]))
        .unwrap();

    // A single occurrence cannot satisfy a two-element predicate.
    let miss = raw_exchange(
        server.port(),
        "GET / HTTP/1.1\r\nX-N: 1\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(String::from_utf8_lossy(&miss).starts_with("HTTP/1.1 404"));

    let hit = raw_exchange(
        server.port(),
        "GET / HTTP/1.1\r\nX-N: 1\r\nX-N: 2\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(String::from_utf8_lossy(&hit).starts_with("HTTP/1.1 200"));

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn faulty_response_callable_degrades_to_defaults() {
    let server = server().await;
    server
        .mock(Value::map([(
            "res",
            Value::map([(
                "body",
                Value::func("boom", |_| panic!("descriptor bug")),
            )]),
        )]))
        .unwrap();

    let response = reqwest::get(format!("http://127.0.0.1:{}/", server.port()))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.bytes().await.unwrap().is_empty());

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn response_callable_builds_the_record_from_the_request() {
    let server = server().await;
    server
        .mock(Value::map([(
            "res",
            Value::func("echoMethod", |args| {
                let method = args
                    .first()
                    .map(|request| request.get("method").clone())
                    .unwrap_or_default();
                Value::map([("statusCode", Value::from(201)), ("body", method)])
            }),
        )]))
        .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .put(format!("http://127.0.0.1:{}/anywhere", server.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"PUT");

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn whole_request_predicate_sees_the_canonical_request() {
    let server = server().await;
    server
        .mock(Value::map([
            (
                "req",
                Value::func("wantsDelete", |args| {
                    let method = args
                        .first()
                        .map(|request| request.get("method").as_str() == Some("DELETE"))
                        .unwrap_or(false);
                    Value::Bool(method)
                }),
            ),
            ("res", Value::map([("statusCode", Value::from(204))])),
        ]))
        .unwrap();

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/", server.port());
    assert_eq!(client.get(&url).send().await.unwrap().status().as_u16(), 404);
    assert_eq!(
        client.delete(&url).send().await.unwrap().status().as_u16(),
        204
    );

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn header_and_body_delays_split_the_response() {
    let server = server().await;
    server
        .mock(Value::map([(
            "res",
            Value::map([
                ("body", Value::from("late")),
                ("headerDelay", Value::from(100)),
                ("bodyDelay", Value::from(100)),
            ]),
        )]))
        .unwrap();

    let start = Instant::now();
    let mut stream = TcpStream::connect(("127.0.0.1", server.port()))
        .await
        .unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    // Read until the head is complete; the body must not be included in
    // that first arrival.
    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before the head arrived");
        received.extend_from_slice(&chunk[..n]);
        if let Some(at) = received.windows(4).position(|w| w == b"\r\n\r\n") {
            break at + 4;
        }
    };
    let head_elapsed = start.elapsed();
    assert!(head_elapsed >= Duration::from_millis(90));
    assert!(
        received[head_end..].is_empty(),
        "body leaked before its delay"
    );

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, b"late");
    assert!(start.elapsed() >= Duration::from_millis(190));

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn destroy_socket_is_an_abortive_close() {
    let server = server().await;
    server
        .mock(Value::map([(
            "res",
            Value::map([("destroySocket", Value::from(true))]),
        )]))
        .unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", server.port()))
        .await
        .unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    // The head goes out, then the connection is reset instead of a body.
    let mut received = Vec::new();
    let outcome = stream.read_to_end(&mut received).await;
    assert!(
        outcome.is_err(),
        "expected ECONNRESET, read {:?}",
        String::from_utf8_lossy(&received)
    );
    assert_eq!(
        outcome.unwrap_err().kind(),
        std::io::ErrorKind::ConnectionReset
    );

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn keep_alive_serves_sequential_requests() {
    let server = server().await;
    server
        .mock(Value::map([
            ("req", Value::map([("pathname", Value::from("/one"))])),
            ("res", Value::map([("body", Value::from("1"))])),
        ]))
        .unwrap();
    server
        .mock(Value::map([
            ("req", Value::map([("pathname", Value::from("/two"))])),
            ("res", Value::map([("body", Value::from("2"))])),
        ]))
        .unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", server.port()))
        .await
        .unwrap();

    stream
        .write_all(b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let first = read_one_response(&mut stream).await;
    assert!(first.ends_with(b"1"));

    stream
        .write_all(b"GET /two HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.ends_with(b"2"));

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

/// Read exactly one response framed by Content-Length.
async fn read_one_response(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let head_end = received.windows(4).position(|w| w == b"\r\n\r\n");
        if let Some(at) = head_end {
            let head = String::from_utf8_lossy(&received[..at]).to_string();
            let length: usize = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse().ok())?
                })
                .expect("response should carry Content-Length");
            if received.len() >= at + 4 + length {
                return received;
            }
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed mid-response");
        received.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn chunked_request_bodies_are_buffered_before_matching() {
    let server = server().await;
    server
        .mock(Value::map([
            ("req", Value::map([("body", Value::from("hello world"))])),
            ("res", Value::map([("body", Value::from("chunky"))])),
        ]))
        .unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", server.port()))
        .await
        .unwrap();
    stream
        .write_all(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
              6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n",
        )
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200"));
    assert_eq!(body_of(&response), b"chunky");

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn query_predicate_sees_the_literal_query_string() {
    let server = server().await;
    server
        .mock(Value::map([
            (
                "req",
                Value::map([("query", Value::from("?page=2&sort=asc"))]),
            ),
            ("res", Value::map([("body", Value::from("page2"))])),
        ]))
        .unwrap();
    server
        .mock(Value::map([
            (
                "req",
                Value::map([("query", standin::helpers::query_match(&[("name", "a b")]))]),
            ),
            ("res", Value::map([("body", Value::from("decoded"))])),
        ]))
        .unwrap();

    let base = format!("http://127.0.0.1:{}", server.port());
    let hit = reqwest::get(format!("{base}/items?page=2&sort=asc"))
        .await
        .unwrap();
    assert_eq!(hit.bytes().await.unwrap().as_ref(), b"page2");

    let decoded = reqwest::get(format!("{base}/items?name=a%20b"))
        .await
        .unwrap();
    assert_eq!(decoded.bytes().await.unwrap().as_ref(), b"decoded");

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn regex_predicates_match_paths_and_bodies() {
    let server = server().await;
    server
        .mock(Value::map([
            (
                "req",
                Value::map([
                    ("pathname", Value::regex("^/users/\\d+$").unwrap()),
                    ("body", Value::regex("\"role\":\\s*\"admin\"").unwrap()),
                ]),
            ),
            ("res", Value::map([("statusCode", Value::from(202))])),
        ]))
        .unwrap();

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", server.port());

    let wrong_path = client
        .post(format!("{base}/users/alice"))
        .body(r#"{"role": "admin"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_path.status().as_u16(), 404);

    let hit = client
        .post(format!("{base}/users/42"))
        .body(r#"{"role": "admin"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(hit.status().as_u16(), 202);

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn headers_predicate_can_be_a_function_over_the_whole_map() {
    let server = server().await;
    server
        .mock(Value::map([
            (
                "req",
                Value::map([(
                    "headers",
                    Value::func("hasAuth", |args| {
                        let has = args
                            .first()
                            .map(|headers| !headers.get("Authorization").is_absent())
                            .unwrap_or(false);
                        Value::Bool(has)
                    }),
                )]),
            ),
            ("res", Value::map([("body", Value::from("authed"))])),
        ]))
        .unwrap();

    let miss = raw_exchange(
        server.port(),
        "GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(String::from_utf8_lossy(&miss).starts_with("HTTP/1.1 404"));

    let hit = raw_exchange(
        server.port(),
        "GET / HTTP/1.1\r\nAuthorization: Bearer t\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(body_of(&hit), b"authed");

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn response_headers_come_from_literals_and_functions() {
    let server = server().await;
    server
        .mock(Value::map([(
            "res",
            Value::map([
                ("body", Value::from("payload")),
                (
                    "headers",
                    Value::map([
                        ("Content-Type", Value::from("application/json")),
                        (
                            "X-Request-Method",
                            Value::func("methodOf", |args| {
                                args.first()
                                    .map(|request| request.get("method").clone())
                                    .unwrap_or_default()
                            }),
                        ),
                    ]),
                ),
            ]),
        )]))
        .unwrap();

    let response = reqwest::get(format!("http://127.0.0.1:{}/", server.port()))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(response.headers().get("x-request-method").unwrap(), "GET");

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn concurrent_requests_consume_mocks_at_most_once() {
    let server = server().await;
    for _ in 0..4 {
        server
            .mock(Value::map([(
                "res",
                Value::map([("statusCode", Value::from(200))]),
            )]))
            .unwrap();
    }

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/", server.port());
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            client.get(&url).send().await.unwrap().status().as_u16()
        }));
    }

    let mut hits = 0;
    let mut fallbacks = 0;
    for task in tasks {
        match task.await.unwrap() {
            200 => hits += 1,
            404 => fallbacks += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    // Four mocks, eight requests: each mock matched exactly once.
    assert_eq!(hits, 4);
    assert_eq!(fallbacks, 4);

    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn reset_raises_on_pending_and_lists_the_printable_form() {
    let server = server().await;
    server
        .mock(Value::map([
            ("req", Value::map([("pathname", Value::from("/seen"))])),
            ("res", Value::map([("body", Value::from("y"))])),
        ]))
        .unwrap();
    server
        .mock(Value::map([
            ("req", Value::map([("pathname", Value::from("/never"))])),
            ("res", Value::map([("statusCode", Value::from(418))])),
        ]))
        .unwrap();

    reqwest::get(format!("http://127.0.0.1:{}/seen", server.port()))
        .await
        .unwrap();

    let err = server.reset(ResetOptions::default()).unwrap_err();
    assert_eq!(
        err.pending(),
        &["HTTP{req={pathname=\"/never\"}, res={statusCode=418}}".to_string()]
    );

    // The failing reset already emptied the list; the next one is clean.
    server.reset(ResetOptions::default()).unwrap();
    server.teardown().await;
}

#[tokio::test]
async fn malformed_options_are_rejected_at_registration() {
    let server = server().await;
    let err = server
        .mock(Value::map([(
            "req",
            Value::map([("method", Value::from(7))]),
        )]))
        .unwrap_err();
    assert!(err.issues()[0].starts_with("`options.req.method`"));
    server.teardown().await;
}

#[tokio::test]
async fn ephemeral_port_is_reported() {
    let server = server().await;
    assert_ne!(server.port(), 0);
    server.teardown().await;
}
