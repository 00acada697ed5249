//! Request, response and upload bodies
//!
//! Everything that is not a fully buffered `Bytes` value travels as a
//! [`ByteStream`]: a pinned, boxed stream of `io::Result<Bytes>` chunks. The
//! consumer pulls chunks, so a slow upload naturally stops reading its source.

use crate::s3::error::{Result, S3Error};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Pull-based stream of body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Read buffer used when adapting files and readers into streams
const READ_CHUNK_SIZE: usize = 256 * 1024;

/// Body of an outgoing HTTP request.
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    /// Streamed body; the request must carry an explicit `content-length`
    Stream(ByteStream),
}

impl RequestBody {
    /// Buffer the whole body. Used by transports that cannot stream.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Bytes(bytes) => Ok(bytes),
            RequestBody::Stream(stream) => collect_stream(stream).await,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("RequestBody::Empty"),
            RequestBody::Bytes(b) => write!(f, "RequestBody::Bytes({} bytes)", b.len()),
            RequestBody::Stream(_) => f.write_str("RequestBody::Stream"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            RequestBody::Empty
        } else {
            RequestBody::Bytes(bytes)
        }
    }
}

/// Body of an HTTP response, consumed either whole or as a stream.
pub struct ResponseBody {
    stream: ByteStream,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::from_stream(futures::stream::empty())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::from_stream(futures::stream::once(async move { Ok(bytes) }))
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self { stream: Box::pin(stream) }
    }

    /// Read the remaining body into memory.
    pub async fn collect(self) -> Result<Bytes> {
        collect_stream(self.stream).await.map_err(S3Error::transport)
    }

    /// Body as lossy UTF-8 text, for diagnostics.
    pub async fn text(self) -> Result<String> {
        let bytes = self.collect().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseBody")
    }
}

async fn collect_stream(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Payload handed to `put`: either a buffer or a stream of chunks.
pub enum ObjectBody {
    Bytes(Bytes),
    Stream {
        stream: ByteStream,
        /// Total length when known upfront (files, sized readers)
        content_length: Option<u64>,
    },
}

impl ObjectBody {
    /// Stream of unknown length.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        ObjectBody::Stream {
            stream: Box::pin(stream),
            content_length: None,
        }
    }

    /// Any async reader, read in fixed-size chunks.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::from_stream(ReaderStream::with_capacity(reader, READ_CHUNK_SIZE))
    }

    /// Open a file as a stream of known length.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let len = file.metadata().await?.len();
        Ok(Self::from_reader(file).with_content_length(len))
    }

    /// Declare the total length of a streamed body.
    pub fn with_content_length(self, len: u64) -> Self {
        match self {
            ObjectBody::Stream { stream, .. } => ObjectBody::Stream {
                stream,
                content_length: Some(len),
            },
            bytes @ ObjectBody::Bytes(_) => bytes,
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        match self {
            ObjectBody::Bytes(bytes) => Some(bytes.len() as u64),
            ObjectBody::Stream { content_length, .. } => *content_length,
        }
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectBody::Bytes(b) => write!(f, "ObjectBody::Bytes({} bytes)", b.len()),
            ObjectBody::Stream { content_length, .. } => f
                .debug_struct("ObjectBody::Stream")
                .field("content_length", content_length)
                .finish(),
        }
    }
}

impl From<Bytes> for ObjectBody {
    fn from(bytes: Bytes) -> Self {
        ObjectBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for ObjectBody {
    fn from(data: Vec<u8>) -> Self {
        ObjectBody::Bytes(Bytes::from(data))
    }
}

impl From<String> for ObjectBody {
    fn from(data: String) -> Self {
        ObjectBody::Bytes(Bytes::from(data))
    }
}

impl From<&'static [u8]> for ObjectBody {
    fn from(data: &'static [u8]) -> Self {
        ObjectBody::Bytes(Bytes::from_static(data))
    }
}

impl From<&'static str> for ObjectBody {
    fn from(data: &'static str) -> Self {
        ObjectBody::Bytes(Bytes::from_static(data.as_bytes()))
    }
}
