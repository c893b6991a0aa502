//! Request bodies and the streaming callbacks used for request and response bodies.

use std::fmt;
use std::io::SeekFrom;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};

/// A reader which can be rewound and measured.
pub trait SeekableReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T> SeekableReader for T where T: AsyncRead + AsyncSeek + Send + Unpin {}

/// The body of a request.
pub enum Body {
    /// A fully buffered body.
    Full(Bytes),

    /// A body read from a seekable source, such as a file. It is rewound before
    /// every write, so requests using it can be retried.
    Seekable(Box<dyn SeekableReader>),

    /// A body read once from a reader of known length.
    Sized {
        /// Source of the body bytes.
        reader: Box<dyn AsyncRead + Send + Unpin>,
        /// Number of bytes the reader will produce.
        len: u64,
    },
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Seekable(_) => f.debug_tuple("Seekable").finish(),
            Body::Sized { len, .. } => f.debug_struct("Sized").field("len", len).finish(),
        }
    }
}

impl Body {
    /// An empty, buffered body.
    pub fn empty() -> Self {
        Body::Full(Bytes::new())
    }

    /// Wrap a seekable reader.
    pub fn seekable<R>(reader: R) -> Self
    where
        R: SeekableReader + 'static,
    {
        Body::Seekable(Box::new(reader))
    }

    /// Wrap a reader which will yield exactly `len` bytes.
    pub fn sized<R>(reader: R, len: u64) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Body::Sized {
            reader: Box::new(reader),
            len,
        }
    }

    /// Can this body be written a second time?
    pub fn is_rewindable(&self) -> bool {
        !matches!(self, Body::Sized { .. })
    }

    /// Size of the body in bytes. Seekable bodies are measured by seeking to their end.
    pub(crate) async fn size(&mut self) -> std::io::Result<u64> {
        match self {
            Body::Full(bytes) => Ok(bytes.len() as u64),
            Body::Seekable(reader) => {
                let end = reader.seek(SeekFrom::End(0)).await?;
                reader.rewind().await?;
                Ok(end)
            }
            Body::Sized { len, .. } => Ok(*len),
        }
    }

    /// Rewind the body to its first byte, if it can be rewound.
    pub(crate) async fn rewind(&mut self) -> std::io::Result<()> {
        if let Body::Seekable(reader) = self {
            reader.rewind().await?;
        }
        Ok(())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Full(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Full(value.into())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Full(value.into())
    }
}

impl From<&'static str> for Body {
    fn from(value: &'static str) -> Self {
        Body::Full(Bytes::from_static(value.as_bytes()))
    }
}

/// Produces request body chunks on demand. An empty chunk ends the body.
///
/// Supplying a request block forces `Transfer-Encoding: chunked`.
pub struct RequestBlock(Box<dyn FnMut() -> Bytes + Send>);

impl RequestBlock {
    /// Wrap a chunk producer.
    pub fn new<F>(producer: F) -> Self
    where
        F: FnMut() -> Bytes + Send + 'static,
    {
        Self(Box::new(producer))
    }

    pub(crate) fn next_chunk(&mut self) -> Bytes {
        (self.0)()
    }
}

impl fmt::Debug for RequestBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestBlock").finish()
    }
}

/// Receives response body chunks as they arrive.
///
/// The sink is called with the chunk, the number of body bytes still to come after
/// this chunk, and the total body length. Both counts are `None` when the length is
/// not known up front (chunked or read-to-close responses).
pub struct ResponseBlock(Box<dyn FnMut(&[u8], Option<u64>, Option<u64>) + Send>);

impl ResponseBlock {
    /// Wrap a chunk sink.
    pub fn new<F>(sink: F) -> Self
    where
        F: FnMut(&[u8], Option<u64>, Option<u64>) + Send + 'static,
    {
        Self(Box::new(sink))
    }

    pub(crate) fn call(&mut self, chunk: &[u8], remaining: Option<u64>, total: Option<u64>) {
        (self.0)(chunk, remaining, total)
    }
}

impl fmt::Debug for ResponseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResponseBlock").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Body: Send);
    assert_impl_all!(RequestBlock: Send);
    assert_impl_all!(ResponseBlock: Send);

    #[tokio::test]
    async fn seekable_size_rewinds() {
        let mut body = Body::seekable(Cursor::new(b"hello world".to_vec()));
        assert_eq!(body.size().await.unwrap(), 11);
        if let Body::Seekable(reader) = &mut body {
            assert_eq!(reader.stream_position().await.unwrap(), 0);
        }
        assert!(body.is_rewindable());
    }

    #[tokio::test]
    async fn sized_is_not_rewindable() {
        let mut body = Body::sized(Cursor::new(b"abc".to_vec()), 3);
        assert_eq!(body.size().await.unwrap(), 3);
        assert!(!body.is_rewindable());
    }

    #[test]
    fn request_block_yields_chunks() {
        let mut chunks = vec![Bytes::from_static(b"a"), Bytes::new()].into_iter();
        let mut block = RequestBlock::new(move || chunks.next().unwrap_or_default());
        assert_eq!(block.next_chunk(), Bytes::from_static(b"a"));
        assert!(block.next_chunk().is_empty());
    }
}
