//! Response synthesis for matched HTTP mocks, and the 404 fallback.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::request::ParsedRequest;
use crate::diag;
use crate::mock::MockSet;
use crate::resolve;
use crate::value::Value;

/// What the connection loop should do after an exchange.
pub(crate) enum Flow {
    KeepAlive,
    Destroy,
}

/// Match `request` against the set and write the synthesized response.
pub(crate) async fn respond<S: AsyncWrite + Unpin>(
    stream: &mut S,
    set: &MockSet,
    request: &ParsedRequest,
) -> io::Result<Flow> {
    let request_value = request.to_value();

    let Some(mock) = set.claim_request(&request_value) else {
        debug!(target: diag::SERVER, "no mock for {}", request.request_line());
        return write_fallback(stream, request).await;
    };

    // Resolution args for every descriptor callable: (request, body).
    let args = [request_value, Value::Bytes(request.body.clone())];

    let descriptor = match mock.res() {
        Value::Fn(producer) => producer.invoke(&args).unwrap_or(Value::Absent),
        literal => literal.clone(),
    };

    let status = resolve::to_status(descriptor.get("statusCode"), &args);
    let headers = resolve::to_headers(descriptor.get("headers"), &args);
    let body = resolve::to_bytes(descriptor.get("body"), &args);
    let header_delay = resolve::to_int(descriptor.get("headerDelay"), &args).max(0) as u64;
    let body_delay = resolve::to_int(descriptor.get("bodyDelay"), &args).max(0) as u64;
    let destroy = resolve::to_bool(descriptor.get("destroySocket"), &args);

    if header_delay > 0 {
        debug!(target: diag::SERVER, "delaying headers {header_delay}ms");
        tokio::time::sleep(Duration::from_millis(header_delay)).await;
    }

    write_head(stream, status, &headers, body.len()).await?;

    if body_delay > 0 {
        debug!(target: diag::SERVER, "delaying body {body_delay}ms");
        tokio::time::sleep(Duration::from_millis(body_delay)).await;
    }

    if destroy {
        debug!(target: diag::SERVER, "destroying socket instead of completing response");
        return Ok(Flow::Destroy);
    }

    stream.write_all(&body).await?;
    stream.flush().await?;
    debug!(
        target: diag::SERVER,
        "wrote {status} with {} body byte(s)",
        body.len()
    );
    Ok(Flow::KeepAlive)
}

/// Write the status line and headers, flushing so a delayed body is
/// observable as a separate arrival on the peer.
async fn write_head<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: u16,
    headers: &[(String, Bytes)],
    body_len: usize,
) -> io::Result<()> {
    let mut head = Vec::with_capacity(128);
    head.extend_from_slice(format!("HTTP/1.1 {status} {}\r\n", reason_phrase(status)).as_bytes());

    let mut has_content_length = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("content-length") {
            has_content_length = true;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value);
        head.extend_from_slice(b"\r\n");
    }
    if !has_content_length {
        head.extend_from_slice(format!("Content-Length: {body_len}\r\n").as_bytes());
    }
    head.extend_from_slice(b"\r\n");

    stream.write_all(&head).await?;
    stream.flush().await
}

/// The response when no mock matched.
async fn write_fallback<S: AsyncWrite + Unpin>(
    stream: &mut S,
    request: &ParsedRequest,
) -> io::Result<Flow> {
    let body = format!(
        "No matching mock was found for [{}]",
        request.request_line()
    );
    let head = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.flush().await?;
    Ok(Flow::KeepAlive)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        410 => "Gone",
        418 => "I'm a teapot",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}
