//! HTTP/1.x response parsing.
//!
//! The parser reads a status line, header lines and a body framed by
//! `Transfer-Encoding: chunked`, `Content-Length` or the end of the stream.
//! Interim `1xx` responses (other than `101`) are skipped.

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};
use thiserror::Error;

use super::Response;
use crate::body::ResponseBlock;
use crate::headers::Headers;
use crate::transport::Socket;
use crate::Error;

const MAX_LINE: usize = 64 * 1024;
const MAX_HEADERS: usize = 256;

/// A malformed or truncated response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The status line is not `HTTP/1.x NNN reason`.
    #[error("invalid status line {0:?}")]
    InvalidStatusLine(String),

    /// The protocol version is not HTTP/1.0 or HTTP/1.1.
    #[error("unsupported version {0:?}")]
    InvalidVersion(String),

    /// The status code is not three digits.
    #[error("invalid status code {0:?}")]
    InvalidStatusCode(String),

    /// A header line has no name or no `:` separator.
    #[error("invalid header line {0:?}")]
    InvalidHeader(String),

    /// `Content-Length` is not a number, or several disagree.
    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),

    /// A chunk size line is not hexadecimal.
    #[error("invalid chunk size {0:?}")]
    InvalidChunkSize(String),

    /// The stream ended before the response was complete.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A line exceeded the parser's limit.
    #[error("line too long")]
    LineTooLong,

    /// Too many header lines.
    #[error("too many headers")]
    TooManyHeaders,
}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Error::Socket(Box::new(error))
    }
}

/// Request details the parser needs.
#[derive(Debug)]
pub(crate) struct ParseOptions<'a> {
    pub(crate) method: &'a Method,
    pub(crate) expects: Option<&'a [u16]>,
    pub(crate) chunk_size: usize,
    pub(crate) response_block: Option<&'a mut ResponseBlock>,
}

/// A parsed response, and whether the socket can carry another request.
#[derive(Debug)]
pub(crate) struct Parsed {
    pub(crate) response: Response,
    pub(crate) reusable: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct StatusLine {
    http10: bool,
    code: StatusCode,
    reason: String,
}

impl StatusLine {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts
            .next()
            .ok_or_else(|| ParseError::InvalidStatusLine(line.to_owned()))?;
        let reason = parts.next().unwrap_or_default().trim();

        let http10 = match version {
            "HTTP/1.0" => true,
            "HTTP/1.1" => false,
            _ if version.starts_with("HTTP/") => {
                return Err(ParseError::InvalidVersion(version.to_owned()))
            }
            _ => return Err(ParseError::InvalidStatusLine(line.to_owned())),
        };

        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidStatusCode(code.to_owned()));
        }
        let code = StatusCode::from_bytes(code.as_bytes())
            .map_err(|_| ParseError::InvalidStatusCode(code.to_owned()))?;

        Ok(StatusLine {
            http10,
            code,
            reason: reason.to_owned(),
        })
    }
}

enum Framing {
    Empty,
    Chunked,
    Length(u64),
    Close,
}

async fn read_line(socket: &mut Socket) -> Result<String, Error> {
    let mut line = socket.read_line(MAX_LINE).await?;
    if line.last() != Some(&b'\n') {
        return Err(if line.len() >= MAX_LINE {
            ParseError::LineTooLong.into()
        } else {
            ParseError::UnexpectedEof.into()
        });
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Read header lines up to and including the blank line, appending them to `headers`.
async fn read_headers(socket: &mut Socket, headers: &mut Headers) -> Result<(), Error> {
    let mut count = 0;
    loop {
        let line = read_line(socket).await?;
        if line.is_empty() {
            return Ok(());
        }

        count += 1;
        if count > MAX_HEADERS {
            return Err(ParseError::TooManyHeaders.into());
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidHeader(line.clone()))?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::InvalidHeader(line.clone()).into());
        }
        headers.append(name, value.trim());
    }
}

fn framing(method: &Method, status: StatusCode, headers: &Headers) -> Result<Framing, ParseError> {
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(Framing::Empty);
    }

    let last_coding = headers
        .get_all("Transfer-Encoding")
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|coding| !coding.is_empty())
        .last();
    if let Some(coding) = last_coding {
        return Ok(if coding.eq_ignore_ascii_case("chunked") {
            Framing::Chunked
        } else {
            Framing::Close
        });
    }

    let mut length = None;
    for value in headers.get_all("Content-Length") {
        for item in value.split(',') {
            let parsed: u64 = item
                .trim()
                .parse()
                .map_err(|_| ParseError::InvalidContentLength(value.to_owned()))?;
            if length.is_some_and(|seen| seen != parsed) {
                return Err(ParseError::InvalidContentLength(value.to_owned()));
            }
            length = Some(parsed);
        }
    }

    Ok(match length {
        Some(0) => Framing::Empty,
        Some(n) => Framing::Length(n),
        None => Framing::Close,
    })
}

/// Where body bytes go: the caller's sink, or a buffer.
struct BodySink<'a> {
    block: Option<&'a mut ResponseBlock>,
    buffer: BytesMut,
}

impl BodySink<'_> {
    fn push(&mut self, chunk: &[u8], remaining: Option<u64>, total: Option<u64>) {
        match self.block.as_mut() {
            Some(block) => block.call(chunk, remaining, total),
            None => self.buffer.extend_from_slice(chunk),
        }
    }

    fn finish(self) -> Bytes {
        self.buffer.freeze()
    }
}

async fn read_sized(
    socket: &mut Socket,
    sink: &mut BodySink<'_>,
    len: u64,
    chunk_size: usize,
    total: Option<u64>,
) -> Result<(), Error> {
    let mut left = len;
    while left > 0 {
        let want = usize::try_from(left).unwrap_or(usize::MAX).min(chunk_size);
        let chunk = socket.read(want).await?;
        if chunk.is_empty() {
            return Err(ParseError::UnexpectedEof.into());
        }
        left -= chunk.len() as u64;
        sink.push(&chunk, total.map(|_| left), total);
    }
    Ok(())
}

async fn read_chunked(
    socket: &mut Socket,
    sink: &mut BodySink<'_>,
    headers: &mut Headers,
    chunk_size: usize,
) -> Result<(), Error> {
    loop {
        let line = read_line(socket).await?;
        let size = line.split(';').next().unwrap_or_default().trim();
        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidChunkSize(line).into());
        }
        let size = u64::from_str_radix(size, 16)
            .map_err(|_| ParseError::InvalidChunkSize(line.clone()))?;

        if size == 0 {
            return read_headers(socket, headers).await;
        }

        read_sized(socket, sink, size, chunk_size, None).await?;
        if !read_line(socket).await?.is_empty() {
            return Err(ParseError::InvalidChunkSize("missing chunk terminator".into()).into());
        }
    }
}

async fn read_to_close(
    socket: &mut Socket,
    sink: &mut BodySink<'_>,
    chunk_size: usize,
) -> Result<(), Error> {
    loop {
        let chunk = socket.read(chunk_size).await?;
        if chunk.is_empty() {
            return Ok(());
        }
        sink.push(&chunk, None, None);
    }
}

/// Read one response from `socket`.
///
/// When a response block is supplied and the status is expected, body bytes are
/// handed to the block as they arrive and the returned response has an empty body.
/// A status outside `expects` raises [`Error::HttpStatus`] after the body is read.
pub(crate) async fn parse(socket: &mut Socket, options: ParseOptions<'_>) -> Result<Parsed, Error> {
    let (status, mut headers) = loop {
        let line = read_line(socket).await?;
        let status = StatusLine::parse(&line)?;
        let mut headers = Headers::new();
        read_headers(socket, &mut headers).await?;

        if status.code.is_informational() && status.code != StatusCode::SWITCHING_PROTOCOLS {
            tracing::trace!(status = %status.code, "skipping interim response");
            continue;
        }
        break (status, headers);
    };

    let expected = options
        .expects
        .map_or(true, |expects| expects.contains(&status.code.as_u16()));
    let chunk_size = options.chunk_size.max(1);
    let mut sink = BodySink {
        block: if expected { options.response_block } else { None },
        buffer: BytesMut::new(),
    };

    let mut reusable = !status.http10 || headers.has_token("Connection", "keep-alive");
    match framing(options.method, status.code, &headers)? {
        Framing::Empty => {}
        Framing::Length(len) => read_sized(socket, &mut sink, len, chunk_size, Some(len)).await?,
        Framing::Chunked => read_chunked(socket, &mut sink, &mut headers, chunk_size).await?,
        Framing::Close => {
            reusable = false;
            read_to_close(socket, &mut sink, chunk_size).await?;
        }
    }

    let response = Response::from_parts(status.code, status.reason, headers, sink.finish());
    tracing::trace!(status = %response.status(), body = response.body().len(), "response parsed");

    if !expected {
        return Err(Error::HttpStatus {
            expected: options.expects.unwrap_or_default().to_vec(),
            response: Box::new(response),
        });
    }

    Ok(Parsed { response, reusable })
}
