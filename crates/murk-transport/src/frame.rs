/// HTTP-like frame codec.
///
/// One request or response per frame. The start line and headers are
/// ASCII text terminated by CRLF; the body is raw bytes whose length is
/// announced in `Content-Length`. Only the handful of headers the
/// protocol needs are recognized; everything else is ignored.
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{MurkTransportError, SessionId};

/// Longest accepted header line, including the CRLF.
const MAX_LINE: usize = 1024;

/// Maximum number of header lines per frame.
const MAX_HEADERS: usize = 32;

const SESSION_HEADER: &str = "x-murk-session";
const LENGTH_HEADER: &str = "content-length";
const LOCATION_HEADER: &str = "location";

// ── Status codes ───────────────────────────────────────────────────────

/// Response status. The relay answers with exactly these codes:
///
/// - `Ok` — frame accepted, response body optional
/// - `Found` — transfer redirect to another relay
/// - `SeeOther` — administrative redirect to another relay address
/// - `Unauthorized` — bad/expired session or checksum failure
/// - `NotFound` — empty/garbage request body
/// - `NotImplemented` — unsupported protocol version or disabled feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Found,
    SeeOther,
    Unauthorized,
    NotFound,
    NotImplemented,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Found => 302,
            Status::SeeOther => 303,
            Status::Unauthorized => 401,
            Status::NotFound => 404,
            Status::NotImplemented => 501,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Found => "Found",
            Status::SeeOther => "See Other",
            Status::Unauthorized => "Unauthorized",
            Status::NotFound => "Not Found",
            Status::NotImplemented => "Not Implemented",
        }
    }

    pub fn from_code(code: u16) -> Result<Self, MurkTransportError> {
        match code {
            200 => Ok(Status::Ok),
            302 => Ok(Status::Found),
            303 => Ok(Status::SeeOther),
            401 => Ok(Status::Unauthorized),
            404 => Ok(Status::NotFound),
            501 => Ok(Status::NotImplemented),
            other => Err(MurkTransportError::UnknownStatus(other)),
        }
    }

    /// Whether this status redirects the client to another relay.
    pub fn is_redirect(&self) -> bool {
        matches!(self, Status::Found | Status::SeeOther)
    }
}

// ── Request / Response ─────────────────────────────────────────────────

/// A transport request: optional session id plus an opaque body
/// (the sealed envelope, or empty for a bare probe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub session: Option<SessionId>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(session: Option<SessionId>, body: Vec<u8>) -> Self {
        Self { session, body }
    }

    /// A request with no session and no body — used as a liveness probe.
    pub fn probe() -> Self {
        Self {
            session: None,
            body: Vec::new(),
        }
    }

    pub fn is_bare(&self) -> bool {
        self.session.is_none() && self.body.is_empty()
    }
}

/// A transport response: status, optional redirect location, opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: Status, body: Vec<u8>) -> Self {
        Self {
            status,
            location: None,
            body,
        }
    }

    pub fn empty(status: Status) -> Self {
        Self::new(status, Vec::new())
    }

    /// A redirect response pointing at `location` (`host:port`).
    pub fn redirect(status: Status, location: String) -> Self {
        Self {
            status,
            location: Some(location),
            body: Vec::new(),
        }
    }
}

// ── Wire I/O ───────────────────────────────────────────────────────────

pub(crate) async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: &Request,
) -> Result<(), MurkTransportError> {
    let mut head = String::with_capacity(128);
    head.push_str("POST /relay HTTP/1.1\r\n");
    if let Some(session) = request.session {
        head.push_str(&format!("X-Murk-Session: {session}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", request.body.len()));

    writer
        .write_all(head.as_bytes())
        .await
        .map_err(MurkTransportError::Write)?;
    writer
        .write_all(&request.body)
        .await
        .map_err(MurkTransportError::Write)?;
    writer.flush().await.map_err(MurkTransportError::Write)
}

pub(crate) async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> Result<(), MurkTransportError> {
    let mut head = String::with_capacity(128);
    head.push_str(&format!(
        "HTTP/1.1 {} {}\r\n",
        response.status.code(),
        response.status.reason()
    ));
    if let Some(location) = &response.location {
        head.push_str(&format!("Location: {location}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));

    writer
        .write_all(head.as_bytes())
        .await
        .map_err(MurkTransportError::Write)?;
    writer
        .write_all(&response.body)
        .await
        .map_err(MurkTransportError::Write)?;
    writer.flush().await.map_err(MurkTransportError::Write)
}

pub(crate) async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_body: usize,
) -> Result<Request, MurkTransportError> {
    let start = read_line(reader).await?;
    if !start.starts_with("POST ") || !start.ends_with("HTTP/1.1") {
        return Err(MurkTransportError::Malformed(format!(
            "bad request line: {start:?}"
        )));
    }

    let headers = read_headers(reader).await?;
    let session = match header_value(&headers, SESSION_HEADER) {
        Some(value) => Some(value.parse()?),
        None => None,
    };
    let body = read_body(reader, &headers, max_body).await?;

    Ok(Request { session, body })
}

pub(crate) async fn read_response<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_body: usize,
) -> Result<Response, MurkTransportError> {
    let start = read_line(reader).await?;
    let code = parse_status_line(&start)?;
    let status = Status::from_code(code)?;

    let headers = read_headers(reader).await?;
    let location = header_value(&headers, LOCATION_HEADER).map(str::to_string);
    let body = read_body(reader, &headers, max_body).await?;

    Ok(Response {
        status,
        location,
        body,
    })
}

// ── Parsing helpers ────────────────────────────────────────────────────

/// Parse `HTTP/1.1 <code> <reason>` into the numeric code.
fn parse_status_line(line: &str) -> Result<u16, MurkTransportError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if version != "HTTP/1.1" {
        return Err(MurkTransportError::Malformed(format!(
            "bad status line: {line:?}"
        )));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| MurkTransportError::Malformed(format!("bad status line: {line:?}")))
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, MurkTransportError> {
    let mut buf = Vec::with_capacity(64);
    let mut limited = reader.take(MAX_LINE as u64);
    let read = limited
        .read_until(b'\n', &mut buf)
        .await
        .map_err(MurkTransportError::Read)?;
    if read == 0 {
        return Err(MurkTransportError::Closed);
    }
    if !buf.ends_with(b"\n") {
        return Err(MurkTransportError::Malformed("header line too long".into()));
    }
    while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| MurkTransportError::Malformed("non-ascii header".into()))
}

/// Read header lines until the blank separator. Names are lowercased.
async fn read_headers<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<(String, String)>, MurkTransportError> {
    let mut headers = Vec::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            return Ok(headers);
        }
        if headers.len() >= MAX_HEADERS {
            return Err(MurkTransportError::Malformed("too many headers".into()));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MurkTransportError::Malformed(format!("bad header: {line:?}")))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
}

async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    headers: &[(String, String)],
    max_body: usize,
) -> Result<Vec<u8>, MurkTransportError> {
    let length: usize = header_value(headers, LENGTH_HEADER)
        .ok_or_else(|| MurkTransportError::Malformed("missing content-length".into()))?
        .parse()
        .map_err(|_| MurkTransportError::Malformed("bad content-length".into()))?;

    if length > max_body {
        return Err(MurkTransportError::MessageTooLarge {
            size: length,
            max: max_body,
        });
    }

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(MurkTransportError::Read)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn roundtrip_request(request: Request) -> Request {
        let mut wire = Vec::new();
        write_request(&mut wire, &request).await.unwrap();
        let mut reader = BufReader::new(Cursor::new(wire));
        read_request(&mut reader, 1024 * 1024).await.unwrap()
    }

    async fn roundtrip_response(response: Response) -> Response {
        let mut wire = Vec::new();
        write_response(&mut wire, &response).await.unwrap();
        let mut reader = BufReader::new(Cursor::new(wire));
        read_response(&mut reader, 1024 * 1024).await.unwrap()
    }

    #[tokio::test]
    async fn request_roundtrip_with_session() {
        let request = Request::new(Some(SessionId::from_raw(42)), b"sealed frame".to_vec());
        assert_eq!(roundtrip_request(request.clone()).await, request);
    }

    #[tokio::test]
    async fn request_roundtrip_bare() {
        let request = Request::probe();
        let decoded = roundtrip_request(request).await;
        assert!(decoded.is_bare());
    }

    #[tokio::test]
    async fn response_roundtrip_with_location() {
        let response = Response::redirect(Status::SeeOther, "10.0.0.2:4040".into());
        assert_eq!(roundtrip_response(response.clone()).await, response);
    }

    #[tokio::test]
    async fn response_roundtrip_all_statuses() {
        for status in [
            Status::Ok,
            Status::Found,
            Status::SeeOther,
            Status::Unauthorized,
            Status::NotFound,
            Status::NotImplemented,
        ] {
            let response = Response::new(status, vec![1, 2, 3]);
            assert_eq!(roundtrip_response(response.clone()).await, response);
        }
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let request = Request::new(None, vec![0u8; 2048]);
        let mut wire = Vec::new();
        write_request(&mut wire, &request).await.unwrap();
        let mut reader = BufReader::new(Cursor::new(wire));
        let err = read_request(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            MurkTransportError::MessageTooLarge { size: 2048, max: 1024 }
        ));
    }

    #[tokio::test]
    async fn malformed_request_line_rejected() {
        let wire = b"GET /other HTTP/1.0\r\n\r\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(wire));
        let err = read_request(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, MurkTransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn missing_content_length_rejected() {
        let wire = b"POST /relay HTTP/1.1\r\n\r\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(wire));
        let err = read_request(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, MurkTransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn unknown_status_rejected() {
        let wire = b"HTTP/1.1 418 Teapot\r\nContent-Length: 0\r\n\r\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(wire));
        let err = read_response(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, MurkTransportError::UnknownStatus(418)));
    }

    #[tokio::test]
    async fn closed_stream_reports_closed() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        let err = read_request(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, MurkTransportError::Closed));
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(Status::Ok.code(), 200);
        assert_eq!(Status::Unauthorized.code(), 401);
        assert_eq!(Status::NotImplemented.code(), 501);
        assert!(Status::Found.is_redirect());
        assert!(Status::SeeOther.is_redirect());
        assert!(!Status::Ok.is_redirect());
    }
}
