//! Minimal HTTP/1.1 framing: one request in, one response out.
//!
//! Only what the chirp API needs is understood. The request line is split on
//! single spaces, `Content-Length` is the only interpreted header, and bodies
//! are always length-delimited. Chunked encoding and compression are not
//! supported.

use std::io;

use http::{Method, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

pub const MAX_LINE_BYTES: usize = 8 * 1024;
pub const MAX_HEADERS: usize = 100;
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_JSON: &str = "application/json";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Request target with any query string removed.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// First value of the named header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request line {0:?}")]
    MalformedRequestLine(String),
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
    #[error("invalid Content-Length {0:?}")]
    InvalidContentLength(String),
    #[error("declared body of {0} bytes exceeds the {limit} byte limit", limit = MAX_BODY_BYTES)]
    BodyTooLarge(usize),
    #[error("line exceeds {limit} bytes", limit = MAX_LINE_BYTES)]
    LineTooLong,
    #[error("more than {limit} header lines", limit = MAX_HEADERS)]
    TooManyHeaders,
    #[error("connection closed before the request was complete")]
    Truncated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HttpError {
    /// Whether the byte stream is still aligned on a request boundary after
    /// this error, so the connection can carry on.
    pub fn keeps_connection(&self) -> bool {
        matches!(self, HttpError::MalformedRequestLine(_))
    }

    /// The response owed to the client, if it can still receive one.
    pub fn response(&self) -> Option<Response> {
        match self {
            HttpError::Io(_) | HttpError::Truncated => None,
            HttpError::BodyTooLarge(_) => Some(Response::text(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Payload Too Large",
            )),
            _ => Some(Response::text(StatusCode::BAD_REQUEST, "Bad Request")),
        }
    }
}

/// Reads the next request from the connection.
///
/// Returns `Ok(None)` when the client closes the stream or sends a blank
/// line where a request line was expected. A request line with fewer than two
/// tokens is reported only after its headers and body have been consumed, so
/// the caller may answer it and keep reading.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let request_line = match read_line(reader).await? {
        Some(line) if !line.is_empty() => line,
        _ => return Ok(None),
    };

    let headers = read_headers(reader).await?;
    let body = read_body(reader, content_length(&headers)?).await?;

    let Some((method, path)) = parse_request_line(&request_line) else {
        return Err(HttpError::MalformedRequestLine(request_line));
    };

    Ok(Some(Request {
        method,
        path,
        headers,
        body,
    }))
}

/// Method and query-less path; `None` unless both tokens are present.
fn parse_request_line(line: &str) -> Option<(Method, String)> {
    let mut tokens = line.split(' ');
    let method = tokens.next().filter(|token| !token.is_empty())?;
    let target = tokens.next().filter(|token| !token.is_empty())?;
    let method = Method::from_bytes(method.as_bytes()).ok()?;

    let path = match target.split_once('?') {
        Some((path, _query)) => path,
        None => target,
    };
    Some((method, path.to_string()))
}

async fn read_line<R>(reader: &mut R) -> Result<Option<String>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if buf.len() == MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
        return Err(HttpError::LineTooLong);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

async fn read_headers<R>(reader: &mut R) -> Result<Vec<(String, String)>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Vec::new();
    loop {
        let line = read_line(reader).await?.ok_or(HttpError::Truncated)?;
        if line.is_empty() {
            return Ok(headers);
        }
        if headers.len() == MAX_HEADERS {
            return Err(HttpError::TooManyHeaders);
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::MalformedHeader(line));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(HttpError::MalformedHeader(line));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }
}

fn content_length(headers: &[(String, String)]) -> Result<usize, HttpError> {
    let Some((_, raw)) = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
    else {
        return Ok(0);
    };

    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HttpError::InvalidContentLength(raw.clone()));
    }
    let length: usize = raw
        .parse()
        .map_err(|_| HttpError::InvalidContentLength(raw.clone()))?;
    if length > MAX_BODY_BYTES {
        return Err(HttpError::BodyTooLarge(length));
    }
    Ok(length)
}

async fn read_body<R>(reader: &mut R, length: usize) -> Result<Vec<u8>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = vec![0; length];
    if length > 0 {
        reader.read_exact(&mut body).await.map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => HttpError::Truncated,
            _ => HttpError::Io(err),
        })?;
    }
    Ok(body)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Announce `Connection: close`; the server hangs up after writing.
    pub close: bool,
}

impl Response {
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
            close: false,
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(status, TEXT_PLAIN, body)
    }

    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status, APPLICATION_JSON, body),
            Err(err) => {
                warn!(error = ?err, "failed to encode response body");
                Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    pub fn closing(mut self) -> Self {
        self.close = true;
        self
    }
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or("Unknown"),
        response.content_type,
        response.body.len(),
    );
    if response.close {
        head.push_str("Connection: close\r\n");
    }
    head.push_str("\r\n");

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&response.body).await?;
    writer.flush().await?;
    Ok(())
}
