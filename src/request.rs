//! HTTP/1.1 request serialization.
//!
//! The request line and headers are rendered into one buffer and written in a single
//! call. The body follows: chunked when a request block is supplied, otherwise
//! copied from the body in `chunk_size` pieces.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::body::{Body, RequestBlock};
use crate::config::{port_string, Scheme};
use crate::connection::RequestDatum;
use crate::transport::Socket;
use crate::Error;

/// Write the request described by `datum` to `socket`.
///
/// Framing headers (`Content-Length` or `Transfer-Encoding`, `TE` and `Connection`)
/// are set on the datum's headers before they are written. Every failure is returned
/// reclassified as a socket error, unless it is already terminal.
pub(crate) async fn write_request(socket: &mut Socket, datum: &mut RequestDatum) -> Result<(), Error> {
    send(socket, datum).await.map_err(Error::reclassify)
}

async fn send(socket: &mut Socket, datum: &mut RequestDatum) -> Result<(), Error> {
    frame(datum).await?;
    let head = render_head(datum)?;
    trace!(bytes = head.len(), "writing request head");
    socket.write(&head).await?;

    let chunk_size = datum.chunk_size.max(1);
    if let Some(block) = datum.request_block.as_mut() {
        write_chunked(socket, block).await
    } else if let Some(body) = datum.body.as_mut() {
        write_body(socket, body, chunk_size).await
    } else {
        Ok(())
    }
}

/// Decide body framing and connection handling, updating the datum's headers.
async fn frame(datum: &mut RequestDatum) -> Result<(), Error> {
    if datum.request_block.is_some() {
        datum.headers.remove("Content-Length");
        datum.headers.insert("Transfer-Encoding", "chunked");
    } else if !(datum.method == Method::GET && datum.body.is_none()) {
        let len = match datum.body.as_mut() {
            Some(body) => body.size().await?,
            None => 0,
        };
        datum.headers.insert_if_absent("Content-Length", len.to_string());
    }

    let te = if datum.response_block.is_some() {
        "trailers"
    } else {
        "trailers, deflate, gzip"
    };
    datum.headers.insert("TE", te);

    let connection = if datum.persistent { "TE" } else { "TE, close" };
    datum.headers.insert("Connection", connection);
    Ok(())
}

/// The request target: absolute-form when a plain HTTP request goes through a proxy.
fn request_target(datum: &RequestDatum) -> String {
    let mut target = String::new();
    if datum.proxy.is_some() && datum.scheme == Scheme::Http {
        target.push_str(datum.scheme.as_str());
        target.push_str("://");
        let host = datum.host.as_deref().unwrap_or_default();
        if host.contains(':') {
            target.push('[');
            target.push_str(host);
            target.push(']');
        } else {
            target.push_str(host);
        }
        target.push_str(&port_string(datum.scheme, datum.port, datum.omit_default_port));
    }

    target.push_str(&datum.path);
    if let Some(query) = &datum.query {
        let query = query.encode();
        if !query.is_empty() {
            target.push('?');
            target.push_str(&query);
        }
    }
    target
}

fn render_head(datum: &RequestDatum) -> Result<Vec<u8>, Error> {
    let mut head = format!("{} {} HTTP/1.1\r\n", datum.method, request_target(datum)).into_bytes();

    for (name, value) in datum.headers.iter() {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::config(format!("invalid header name {name:?}")))?;
        HeaderValue::from_str(value)
            .map_err(|_| Error::config(format!("invalid value for header {name:?}")))?;

        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    Ok(head)
}

/// One chunk of a chunked body. An empty chunk is the terminator.
pub(crate) fn encode_chunk(chunk: &[u8]) -> Vec<u8> {
    if chunk.is_empty() {
        return b"0\r\n\r\n".to_vec();
    }
    let mut out = format!("{:x}\r\n", chunk.len()).into_bytes();
    out.extend_from_slice(chunk);
    out.extend_from_slice(b"\r\n");
    out
}

async fn write_chunked(socket: &mut Socket, block: &mut RequestBlock) -> Result<(), Error> {
    loop {
        let chunk: Bytes = block.next_chunk();
        trace!(len = chunk.len(), "writing chunk");
        socket.write(&encode_chunk(&chunk)).await?;
        if chunk.is_empty() {
            return Ok(());
        }
    }
}

async fn write_body(socket: &mut Socket, body: &mut Body, chunk_size: usize) -> Result<(), Error> {
    body.rewind().await?;
    match body {
        Body::Full(bytes) => {
            for piece in bytes.chunks(chunk_size) {
                socket.write(piece).await?;
            }
            Ok(())
        }
        Body::Seekable(reader) => copy(socket, reader, None, chunk_size).await,
        Body::Sized { reader, len } => copy(socket, reader, Some(*len), chunk_size).await,
    }
}

async fn copy<R>(
    socket: &mut Socket,
    reader: &mut R,
    limit: Option<u64>,
    chunk_size: usize,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0; chunk_size];
    let mut left = limit;
    loop {
        let want = match left {
            Some(0) => return Ok(()),
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX).min(chunk_size),
            None => chunk_size,
        };
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return match left {
                Some(n) => Err(Error::socket(format!("request body ended {n} bytes early"))),
                None => Ok(()),
            };
        }
        socket.write(&buf[..n]).await?;
        if let Some(left) = left.as_mut() {
            *left -= n as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::middleware::tests::datum;
    use crate::proxy::ProxyDescriptor;
    use crate::RequestParams;

    async fn rendered(datum: &mut RequestDatum) -> String {
        frame(datum).await.unwrap();
        String::from_utf8(render_head(datum).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn get_without_body_has_no_content_length() {
        let mut datum = datum(RequestParams::get("/search").query("q=rust"));
        let head = rendered(&mut datum).await;
        assert!(head.starts_with("GET /search?q=rust HTTP/1.1\r\n"));
        assert!(!head.to_ascii_lowercase().contains("content-length"));
        assert!(head.contains("TE: trailers, deflate, gzip\r\n"));
        assert!(head.contains("Connection: TE, close\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn empty_post_has_zero_content_length() {
        let mut datum = datum(RequestParams::post("/items").body(""));
        let head = rendered(&mut datum).await;
        assert!(head.contains("Content-Length: 0\r\n"));

        let mut datum = datum_with_body(Body::seekable(Cursor::new(b"abcdef".to_vec())));
        let head = rendered(&mut datum).await;
        assert!(head.contains("Content-Length: 6\r\n"));
    }

    fn datum_with_body(body: Body) -> RequestDatum {
        datum(RequestParams::put("/upload").body(body))
    }

    #[tokio::test]
    async fn caller_content_length_is_kept() {
        let mut datum = datum(
            RequestParams::post("/")
                .header("content-length", "3")
                .body("abc"),
        );
        let head = rendered(&mut datum).await;
        assert!(head.contains("content-length: 3\r\n"));
        assert_eq!(datum.headers.get_all("Content-Length").count(), 1);
    }

    #[tokio::test]
    async fn request_block_forces_chunked() {
        let mut datum = datum(
            RequestParams::post("/stream")
                .header("Content-Length", "99")
                .request_block(RequestBlock::new(Bytes::new)),
        );
        datum.persistent = true;
        let head = rendered(&mut datum).await;
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!head.contains("Content-Length"));
        assert!(head.contains("Connection: TE\r\n"));
    }

    #[tokio::test]
    async fn proxied_http_uses_absolute_form() {
        let mut datum = datum(RequestParams::get("/a"));
        datum.proxy = Some(ProxyDescriptor::parse("http://proxy.example.com:8080").unwrap());
        datum.port = Some(8000);
        let head = rendered(&mut datum).await;
        assert!(head.starts_with("GET http://example.com:8000/a HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn invalid_header_is_rejected() {
        let mut datum = datum(RequestParams::get("/").header("X-Bad", "line\r\nbreak"));
        frame(&mut datum).await.unwrap();
        assert!(matches!(render_head(&datum), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn chunk_encoding() {
        assert_eq!(encode_chunk(b"hello world, hi"), b"f\r\nhello world, hi\r\n");
        assert_eq!(encode_chunk(b""), b"0\r\n\r\n");
    }

    #[tokio::test]
    async fn writes_body_in_chunks() {
        let mut datum = datum(RequestParams::post("/").body("abcdefgh").chunk_size(3));
        let (client, mut server) = tokio::io::duplex(4096);
        let mut socket = Socket::new(client);
        write_request(&mut socket, &mut datum).await.unwrap();
        drop(socket);

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert!(written.starts_with("POST / HTTP/1.1\r\n"));
        assert!(written.contains("Content-Length: 8\r\n"));
        assert!(written.ends_with("\r\n\r\nabcdefgh"));
    }

    #[tokio::test]
    async fn writes_chunked_body() {
        let mut chunks = vec![Bytes::from_static(b"hello "), Bytes::from_static(b"world")].into_iter();
        let block = RequestBlock::new(move || chunks.next().unwrap_or_default());
        let mut datum = datum(RequestParams::post("/").request_block(block));
        let (client, mut server) = tokio::io::duplex(4096);
        let mut socket = Socket::new(client);
        write_request(&mut socket, &mut datum).await.unwrap();
        drop(socket);

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert!(written.ends_with("\r\n\r\n6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn short_sized_body_is_a_socket_error() {
        let mut datum = datum(RequestParams::post("/").body(Body::sized(Cursor::new(b"ab".to_vec()), 5)));
        let mut socket = Socket::new(Cursor::new(Vec::new()));
        let error = write_request(&mut socket, &mut datum).await.unwrap_err();
        assert!(matches!(error, Error::Socket(_)));
    }
}
