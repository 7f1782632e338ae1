//! HTTP/1.1 request reading and canonicalization.
//!
//! Parsing proper is delegated to `httparse` (the parser underneath the
//! Rust HTTP stack); this module drives it over the socket, frames the
//! body (`Content-Length` or `chunked`), and canonicalizes the result into
//! the shape the comparator sees.
//!
//! Header names are kept exactly as observed on the wire. Most HTTP
//! libraries normalize names, which would make a predicate like
//! `{headers: {"X-Bloop": "true"}}` silently unmatchable; matching the
//! wire model is the whole point of standing in for a real peer.

use std::collections::BTreeMap;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::value::Value;

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 8 * 1024;

/// A fully buffered request in canonical shape.
#[derive(Debug)]
pub(crate) struct ParsedRequest {
    /// Uppercased method.
    pub method: String,
    /// The request target exactly as sent, for the fallback message.
    pub raw_target: String,
    /// Path portion of the target.
    pub pathname: String,
    /// Literal query string including the leading `?`, or empty.
    pub query: String,
    /// HTTP/1.x minor version.
    pub minor_version: u8,
    /// Headers in wire order with wire-case names.
    pub headers: Vec<(String, String)>,
    /// The entire request body.
    pub body: Bytes,
}

enum Framing {
    None,
    Length(usize),
    Chunked,
}

impl ParsedRequest {
    /// Case-insensitive header lookup, used only for transport framing
    /// decisions (never for matching).
    pub fn header_ci(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `<METHOD> <RAW-URL> HTTP/<VERSION>`, as quoted by the fallback
    /// response.
    pub fn request_line(&self) -> String {
        format!(
            "{} {} HTTP/1.{}",
            self.method, self.raw_target, self.minor_version
        )
    }

    /// Whether the peer asked to close the connection after this exchange.
    pub fn wants_close(&self) -> bool {
        match self.header_ci("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => true,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => false,
            _ => self.minor_version == 0,
        }
    }

    /// The canonical value the comparator and user callables see:
    /// `{method, pathname, query, headers, body}` with repeated header
    /// names collapsing to ordered sequences.
    pub fn to_value(&self) -> Value {
        let mut headers: BTreeMap<String, Value> = BTreeMap::new();
        for (name, value) in &self.headers {
            match headers.get_mut(name) {
                None => {
                    headers.insert(name.clone(), Value::Str(value.clone()));
                }
                Some(slot @ Value::Str(_)) => {
                    let Value::Str(first) = std::mem::take(slot) else {
                        unreachable!()
                    };
                    *slot = Value::Seq(vec![Value::Str(first), Value::Str(value.clone())]);
                }
                Some(Value::Seq(values)) => values.push(Value::Str(value.clone())),
                Some(_) => unreachable!("headers hold strings or sequences"),
            }
        }

        Value::map([
            ("method", Value::Str(self.method.clone())),
            ("pathname", Value::Str(self.pathname.clone())),
            ("query", Value::Str(self.query.clone())),
            ("headers", Value::Map(headers)),
            ("body", Value::Bytes(self.body.clone())),
        ])
    }
}

/// Read one request off the stream, buffering the entire body.
///
/// `residual` carries bytes already read past the previous request
/// (keep-alive pipelining). `Ok(None)` means the peer closed cleanly
/// between requests.
pub(crate) async fn read_request<S: AsyncRead + Unpin>(
    stream: &mut S,
    residual: &mut BytesMut,
) -> io::Result<Option<ParsedRequest>> {
    loop {
        if let Some((mut request, consumed, framing)) = parse_head(&residual[..])? {
            let _ = residual.split_to(consumed);
            request.body = match framing {
                Framing::None => Bytes::new(),
                Framing::Length(n) => read_exact_buffered(stream, residual, n).await?,
                Framing::Chunked => read_chunked(stream, residual).await?,
            };
            return Ok(Some(request));
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if residual.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-request",
            ));
        }
        residual.extend_from_slice(&chunk[..n]);
    }
}

/// Try to parse a complete request head out of `buf`.
fn parse_head(buf: &[u8]) -> io::Result<Option<(ParsedRequest, usize, Framing)>> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_storage);

    let consumed = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => consumed,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed request head: {e}"),
            ))
        }
    };

    let method = parsed.method.unwrap_or("").to_ascii_uppercase();
    let raw_target = parsed.path.unwrap_or("/").to_string();
    let minor_version = parsed.version.unwrap_or(1) as u8;

    let (pathname, query) = match raw_target.find('?') {
        Some(at) => (raw_target[..at].to_string(), raw_target[at..].to_string()),
        None => (raw_target.clone(), String::new()),
    };

    let mut headers = Vec::with_capacity(parsed.headers.len());
    let mut framing = Framing::None;
    for header in parsed.headers.iter() {
        let value = String::from_utf8_lossy(header.value).to_string();
        if header.name.eq_ignore_ascii_case("content-length") {
            let length = value.trim().parse::<usize>().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "bad content-length")
            })?;
            framing = Framing::Length(length);
        } else if header.name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            framing = Framing::Chunked;
        }
        headers.push((header.name.to_string(), value));
    }

    Ok(Some((
        ParsedRequest {
            method,
            raw_target,
            pathname,
            query,
            minor_version,
            headers,
            body: Bytes::new(),
        },
        consumed,
        framing,
    )))
}

/// Take `n` bytes, consuming `residual` first and the stream for the rest.
async fn read_exact_buffered<S: AsyncRead + Unpin>(
    stream: &mut S,
    residual: &mut BytesMut,
    n: usize,
) -> io::Result<Bytes> {
    while residual.len() < n {
        let mut chunk = [0u8; READ_CHUNK];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-body",
            ));
        }
        residual.extend_from_slice(&chunk[..read]);
    }
    Ok(residual.split_to(n).freeze())
}

/// Decode a chunked body into one contiguous buffer. Trailers are read and
/// discarded.
async fn read_chunked<S: AsyncRead + Unpin>(
    stream: &mut S,
    residual: &mut BytesMut,
) -> io::Result<Bytes> {
    let mut body = BytesMut::new();
    loop {
        let size_line = read_line(stream, residual).await?;
        let size_text = size_line
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        let size = usize::from_str_radix(&size_text, 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad chunk size"))?;

        if size == 0 {
            // Consume trailers up to the blank line.
            loop {
                let trailer = read_line(stream, residual).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body.freeze());
        }

        let chunk = read_exact_buffered(stream, residual, size).await?;
        body.extend_from_slice(&chunk);
        let crlf = read_exact_buffered(stream, residual, 2).await?;
        if &crlf[..] != b"\r\n" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad chunk terminator",
            ));
        }
    }
}

/// Read one CRLF-terminated line (without the terminator).
async fn read_line<S: AsyncRead + Unpin>(
    stream: &mut S,
    residual: &mut BytesMut,
) -> io::Result<String> {
    loop {
        if let Some(at) = residual.windows(2).position(|w| w == b"\r\n") {
            let line = residual.split_to(at);
            let _ = residual.split_to(2);
            return Ok(String::from_utf8_lossy(&line).to_string());
        }
        let mut chunk = [0u8; READ_CHUNK];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-body",
            ));
        }
        residual.extend_from_slice(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> (ParsedRequest, Framing) {
        let (request, consumed, framing) = parse_head(raw.as_bytes())
            .expect("head should parse")
            .expect("head should be complete");
        assert_eq!(consumed, raw.len());
        (request, framing)
    }

    #[test]
    fn parses_the_canonical_shape() {
        let (request, _) = head("POST /bloop?a=1&b=2 HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(request.method, "POST");
        assert_eq!(request.pathname, "/bloop");
        assert_eq!(request.query, "?a=1&b=2");
        assert_eq!(request.minor_version, 1);
        assert_eq!(request.raw_target, "/bloop?a=1&b=2");
        assert_eq!(request.request_line(), "POST /bloop?a=1&b=2 HTTP/1.1");
    }

    #[test]
    fn query_is_empty_without_a_question_mark() {
        let (request, _) = head("GET /plain HTTP/1.1\r\n\r\n");
        assert_eq!(request.query, "");
        assert_eq!(request.pathname, "/plain");
    }

    #[test]
    fn header_names_keep_wire_case() {
        let (request, _) = head("GET / HTTP/1.1\r\nX-Bloop: true\r\n\r\n");
        assert_eq!(request.headers, vec![("X-Bloop".to_string(), "true".to_string())]);
        let value = request.to_value();
        assert_eq!(value.get("headers").get("X-Bloop").as_str(), Some("true"));
        assert!(value.get("headers").get("x-bloop").is_absent());
    }

    #[test]
    fn repeated_headers_become_ordered_sequences() {
        let (request, _) = head("GET / HTTP/1.1\r\nX-N: 1\r\nX-N: 2\r\nX-N: 3\r\n\r\n");
        let headers = request.to_value();
        let Value::Seq(values) = headers.get("headers").get("X-N") else {
            panic!("repeated header should collapse to a sequence");
        };
        assert_eq!(
            values,
            &vec![Value::from("1"), Value::from("2"), Value::from("3")]
        );
    }

    #[test]
    fn framing_comes_from_content_length() {
        let (_, framing) = head("POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n");
        assert!(matches!(framing, Framing::Length(5)));
        let (_, framing) = head("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert!(matches!(framing, Framing::Chunked));
        let (_, framing) = head("GET / HTTP/1.1\r\n\r\n");
        assert!(matches!(framing, Framing::None));
    }

    #[test]
    fn methods_are_uppercased() {
        let (request, _) = head("get / HTTP/1.1\r\n\r\n");
        assert_eq!(request.method, "GET");
    }

    #[test]
    fn close_semantics() {
        let (request, _) = head("GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert!(request.wants_close());
        let (request, _) = head("GET / HTTP/1.1\r\n\r\n");
        assert!(!request.wants_close());
        let (request, _) = head("GET / HTTP/1.0\r\n\r\n");
        assert!(request.wants_close());
        let (request, _) = head("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert!(!request.wants_close());
    }

    #[test]
    fn partial_heads_ask_for_more() {
        assert!(parse_head(b"GET / HT").unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_a_request_split_across_writes() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(256);
        let writer = tokio::spawn(async move {
            client
                .write_all(b"POST /split HTTP/1.1\r\nContent-Le")
                .await
                .unwrap();
            client.write_all(b"ngth: 5\r\n\r\nbo").await.unwrap();
            client.write_all(b"dy!").await.unwrap();
            client
        });

        let mut residual = BytesMut::new();
        let request = read_request(&mut server, &mut residual)
            .await
            .unwrap()
            .expect("request should arrive");
        assert_eq!(request.pathname, "/split");
        assert_eq!(&request.body[..], b"body!");
        assert!(residual.is_empty());
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn pipelined_requests_come_out_one_at_a_time() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(512);
        client
            .write_all(
                b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nonePOST /b HTTP/1.1\r\n\r\n",
            )
            .await
            .unwrap();
        drop(client);

        let mut residual = BytesMut::new();
        let first = read_request(&mut server, &mut residual)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.pathname, "/a");
        assert_eq!(&first.body[..], b"one");

        let second = read_request(&mut server, &mut residual)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.pathname, "/b");
        assert!(second.body.is_empty());

        assert!(read_request(&mut server, &mut residual)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn decodes_chunked_bodies_with_trailers() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(512);
        client
            .write_all(
                b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                  6\r\nhello \r\n5\r\nworld\r\n0\r\nX-Trailer: t\r\n\r\n",
            )
            .await
            .unwrap();
        drop(client);

        let mut residual = BytesMut::new();
        let request = read_request(&mut server, &mut residual)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&request.body[..], b"hello world");
        assert!(residual.is_empty());
    }

    #[tokio::test]
    async fn eof_mid_request_is_an_error() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(b"GET / HTTP/1.1\r\nHo").await.unwrap();
        drop(client);

        let mut residual = BytesMut::new();
        let outcome = read_request(&mut server, &mut residual).await;
        assert_eq!(
            outcome.unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }
}
