//! Splitting upload payloads into multipart parts
//!
//! Buffers are sliced by offset (zero-copy). Streams go through [`PartReader`],
//! which holds at most one part's worth of bytes (plus the tail of the last
//! chunk it pulled) and only pulls from its source when asked for the next part.

use crate::s3::body::ByteStream;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::io;

/// One part of a multipart upload, numbered from 1.
#[derive(Debug, Clone)]
pub struct Part {
    pub part_number: u32,
    pub data: Bytes,
}

/// Slice a buffer into `part_size` parts; the last part may be shorter.
pub fn split_buffer(data: Bytes, part_size: usize) -> impl Iterator<Item = Part> + Send {
    let part_size = part_size.max(1);
    let total = data.len();
    (0..total.div_ceil(part_size)).map(move |index| {
        let start = index * part_size;
        let end = std::cmp::min(start + part_size, total);
        Part {
            part_number: (index + 1) as u32,
            data: data.slice(start..end),
        }
    })
}

/// Pull chunks from `stream` until at least `limit` bytes are buffered or the
/// stream ends. The result is shorter than `limit` only when the stream ended.
pub async fn read_prefix(stream: &mut ByteStream, limit: u64) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while (buf.len() as u64) < limit {
        match stream.next().await {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => break,
        }
    }
    Ok(buf.freeze())
}

/// Pull-based reader that turns a byte stream into fixed-size parts.
pub struct PartReader {
    stream: ByteStream,
    part_size: usize,
    buf: BytesMut,
    next_part_number: u32,
    eof: bool,
}

impl PartReader {
    pub fn new(stream: ByteStream, part_size: usize) -> Self {
        let part_size = part_size.max(1);
        Self {
            stream,
            part_size,
            buf: BytesMut::with_capacity(part_size),
            next_part_number: 1,
            eof: false,
        }
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// True once the source has ended and every buffered byte was handed out.
    pub fn is_exhausted(&self) -> bool {
        self.eof && self.buf.is_empty()
    }

    /// Read the next part, waiting for the source until a full part is buffered
    /// or the source ends. Returns `None` after the final (possibly short) part.
    pub async fn next_part(&mut self) -> io::Result<Option<Part>> {
        while self.buf.len() < self.part_size && !self.eof {
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.eof = true,
            }
        }

        if self.buf.is_empty() {
            return Ok(None);
        }

        let take = self.buf.len().min(self.part_size);
        let data = self.buf.split_to(take).freeze();
        let part_number = self.next_part_number;
        self.next_part_number += 1;

        Ok(Some(Part { part_number, data }))
    }

    /// Adapt into a stream of parts; each poll reads at most one more part.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Part>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_part().await?.map(|part| (part, reader)))
        })
    }
}
