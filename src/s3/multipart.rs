//! Multipart upload orchestration
//!
//! A [`MultipartUploadSession`] owns one remote upload ID from initiation until
//! it is completed or aborted. Parts are recorded by part number, so they may
//! finish in any order; `complete` sends them sorted and refuses to run with a
//! gap. Any failure while the session is open aborts it before the original
//! error is returned, and a session dropped while still open (for example
//! because the future driving it was cancelled) spawns the abort instead.

use crate::s3::body::ByteStream;
use crate::s3::client::{check_error_document, error_for_status, header_string, S3Client};
use crate::s3::canonical::uri_encode;
use crate::s3::error::{Result, S3Error};
use crate::s3::part_reader::{read_prefix, split_buffer, Part, PartReader};
use crate::s3::types::{
    CompleteMultipartUploadOutput, CompletedPart, InitiateMultipartUploadOutput, PutObjectOutput,
    UploadOptions, MAX_PARTS,
};
use crate::s3::xml::{complete_multipart_body, trim_etag, FromXml};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use hyper::Method;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lifecycle of a multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initiated,
    PartsUploading,
    Completed,
    Aborted,
}

impl SessionState {
    fn is_open(self) -> bool {
        matches!(self, SessionState::Initiated | SessionState::PartsUploading)
    }
}

/// One in-flight multipart upload.
///
/// Created by [`S3Client::create_multipart_upload`] and consumed by
/// [`complete`](Self::complete) or [`abort`](Self::abort), so it cannot be
/// reused afterwards.
#[derive(Debug)]
pub struct MultipartUploadSession {
    client: S3Client,
    key: Arc<str>,
    upload_id: Arc<str>,
    /// part number -> ETag
    parts: BTreeMap<u32, String>,
    state: SessionState,
}

impl MultipartUploadSession {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Upload one part and record its ETag.
    pub async fn upload_part(&mut self, part_number: u32, data: Bytes) -> Result<CompletedPart> {
        validate_part_number(part_number)?;
        let part = self
            .uploader()
            .upload(Part { part_number, data })
            .await?;
        self.record_part(part.clone())?;
        Ok(part)
    }

    /// Record a part uploaded elsewhere (e.g. concurrently through a
    /// [`PartUploader`]). Re-recording a part number replaces its ETag, as
    /// re-uploading a part does on the service.
    pub fn record_part(&mut self, part: CompletedPart) -> Result<()> {
        validate_part_number(part.part_number)?;
        self.state = SessionState::PartsUploading;
        self.parts.insert(part.part_number, part.etag);
        Ok(())
    }

    /// Handle for uploading parts without borrowing the session.
    pub fn uploader(&self) -> PartUploader {
        PartUploader {
            client: self.client.clone(),
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
        }
    }

    /// Recorded parts in ascending order, checked to be exactly 1..=N.
    pub fn completed_parts(&self) -> Result<Vec<CompletedPart>> {
        if self.parts.is_empty() {
            return Err(S3Error::InvalidArgument(
                "multipart upload has no parts".to_string(),
            ));
        }

        let mut parts = Vec::with_capacity(self.parts.len());
        for (expected, (&part_number, etag)) in (1u32..).zip(self.parts.iter()) {
            if part_number != expected {
                return Err(S3Error::InvalidArgument(format!(
                    "multipart upload is missing part {}",
                    expected
                )));
            }
            parts.push(CompletedPart::new(part_number, etag.clone()));
        }
        Ok(parts)
    }

    /// Finish the upload. On failure the upload is aborted first and the
    /// original error returned.
    pub async fn complete(mut self) -> Result<CompleteMultipartUploadOutput> {
        let parts = match self.completed_parts() {
            Ok(parts) => parts,
            Err(err) => return Err(self.abort_after(err).await),
        };

        match self.send_complete(&parts).await {
            Ok(output) => {
                self.state = SessionState::Completed;
                tracing::info!(
                    key = %self.key,
                    upload_id = %self.upload_id,
                    parts = parts.len(),
                    "multipart upload completed"
                );
                Ok(output)
            }
            Err(err) => Err(self.abort_after(err).await),
        }
    }

    /// Abort the upload, discarding every uploaded part.
    pub async fn abort(mut self) -> Result<()> {
        self.state = SessionState::Aborted;
        tracing::warn!(key = %self.key, upload_id = %self.upload_id, "aborting multipart upload");
        abort_upload(&self.client, &self.key, &self.upload_id).await
    }

    /// Best-effort abort on a failure path; returns `err` unchanged.
    pub(crate) async fn abort_after(self, err: S3Error) -> S3Error {
        let key = self.key.clone();
        let upload_id = self.upload_id.clone();
        tracing::warn!(%key, %upload_id, error = %err, "multipart upload failed");

        if let Err(abort_err) = self.abort().await {
            tracing::error!(
                %key,
                %upload_id,
                error = %abort_err,
                "failed to abort multipart upload"
            );
        }
        err
    }

    /// Upload every part of `parts`, at most `concurrency` at a time, and
    /// record the results. Stops at the first failure without aborting.
    pub(crate) async fn upload_all<S>(&mut self, parts: S, concurrency: usize) -> Result<()>
    where
        S: Stream<Item = Result<Part>>,
    {
        let uploader = self.uploader();
        let mut uploads = std::pin::pin!(parts
            .map_ok(|part| uploader.clone().upload(part))
            .try_buffer_unordered(concurrency.max(1)));

        while let Some(part) = uploads.try_next().await? {
            tracing::debug!(key = %self.key, part_number = part.part_number, "part uploaded");
            self.record_part(part)?;
        }
        Ok(())
    }

    async fn send_complete(
        &self,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadOutput> {
        let url = upload_url(&self.client, &self.key, &self.upload_id)?;
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());

        let body = Bytes::from(complete_multipart_body(parts));
        let response = self
            .client
            .send_bytes(Method::POST, &url, headers, body)
            .await?;
        let status = response.status();
        let response = error_for_status(response).await?;
        let body = response.into_body().collect().await?;

        // CompleteMultipartUpload can fail after sending 200 OK
        check_error_document(status, &body)?;
        CompleteMultipartUploadOutput::from_xml(&body)
    }
}

impl Drop for MultipartUploadSession {
    fn drop(&mut self) {
        if !self.state.is_open() {
            return;
        }

        let client = self.client.clone();
        let key = self.key.clone();
        let upload_id = self.upload_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(%key, %upload_id, "multipart upload dropped while open, aborting");
                handle.spawn(async move {
                    if let Err(err) = abort_upload(&client, &key, &upload_id).await {
                        tracing::error!(
                            %key,
                            %upload_id,
                            error = %err,
                            "failed to abort multipart upload"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    %key,
                    %upload_id,
                    "multipart upload dropped outside a runtime, not aborted"
                );
            }
        }
    }
}

/// Uploads parts of one session. Cheap to clone; each clone can run
/// concurrently with the others.
#[derive(Debug, Clone)]
pub struct PartUploader {
    client: S3Client,
    key: Arc<str>,
    upload_id: Arc<str>,
}

impl PartUploader {
    /// Upload one part, signed with its own payload hash.
    pub async fn upload(self, part: Part) -> Result<CompletedPart> {
        let mut url = self.client.object_url(&self.key)?;
        url.push_str("?partNumber=");
        url.push_str(&part.part_number.to_string());
        url.push_str("&uploadId=");
        url.push_str(&uri_encode(&self.upload_id, true));

        let size = part.data.len();
        let response = self
            .client
            .send_bytes(Method::PUT, &url, BTreeMap::new(), part.data)
            .await?;
        let response = error_for_status(response).await?;

        let etag = header_string(response.headers(), "etag").ok_or_else(|| {
            S3Error::InvalidResponse(format!("no ETag for part {}", part.part_number))
        })?;
        tracing::trace!(key = %self.key, part_number = part.part_number, size, "part response");

        Ok(CompletedPart::new(part.part_number, trim_etag(&etag)))
    }
}

fn validate_part_number(part_number: u32) -> Result<()> {
    if part_number == 0 || u64::from(part_number) > MAX_PARTS {
        return Err(S3Error::InvalidArgument(format!(
            "part number {} outside 1..={}",
            part_number, MAX_PARTS
        )));
    }
    Ok(())
}

/// `{object}?uploadId=...`
fn upload_url(client: &S3Client, key: &str, upload_id: &str) -> Result<String> {
    let mut url = client.object_url(key)?;
    url.push_str("?uploadId=");
    url.push_str(&uri_encode(upload_id, true));
    Ok(url)
}

async fn abort_upload(client: &S3Client, key: &str, upload_id: &str) -> Result<()> {
    let url = upload_url(client, key, upload_id)?;
    let response = client.send_empty(Method::DELETE, &url, BTreeMap::new()).await?;
    error_for_status(response).await?;
    tracing::info!(key, upload_id, "multipart upload aborted");
    Ok(())
}

impl S3Client {
    /// Initiate a multipart upload (CreateMultipartUpload).
    pub async fn create_multipart_upload(
        &self,
        key: &str,
        options: &UploadOptions,
    ) -> Result<MultipartUploadSession> {
        let mut url = self.object_url(key)?;
        url.push_str("?uploads");

        let response = self
            .send_bytes(Method::POST, &url, options.object_headers(), Bytes::new())
            .await?;
        let response = error_for_status(response).await?;
        let body = response.into_body().collect().await?;
        let initiated = InitiateMultipartUploadOutput::from_xml(&body)?;

        tracing::info!(key, upload_id = %initiated.upload_id, "multipart upload initiated");

        Ok(MultipartUploadSession {
            client: self.clone(),
            key: Arc::from(key),
            upload_id: Arc::from(initiated.upload_id),
            parts: BTreeMap::new(),
            state: SessionState::Initiated,
        })
    }

    /// Multipart upload of a buffer. Parts are zero-copy slices of `data`,
    /// uploaded `concurrency` at a time.
    pub async fn multipart_upload(
        &self,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<PutObjectOutput> {
        if data.is_empty() {
            return self.put_object(key, data, options).await;
        }

        let part_size = self
            .multipart_config()
            .effective_part_size(options.part_size, Some(data.len() as u64));
        let session = self.create_multipart_upload(key, options).await?;
        tracing::debug!(key, size = data.len(), part_size, "splitting buffer into parts");

        let parts = futures::stream::iter(split_buffer(data, part_size).map(Ok));
        self.drive(session, parts).await
    }

    /// Multipart upload of a stream, read one part at a time.
    ///
    /// A stream of unknown length is first buffered up to the multipart
    /// threshold; if it ends before that, it goes out as a single PUT with its
    /// real payload hash. A stream that ends within its first part is also
    /// sent as a single PUT.
    pub async fn multipart_upload_stream(
        &self,
        key: &str,
        mut stream: ByteStream,
        content_length: Option<u64>,
        options: &UploadOptions,
    ) -> Result<PutObjectOutput> {
        if content_length.is_none() {
            let threshold = self.multipart_config().threshold;
            let head = read_prefix(&mut stream, threshold).await?;
            if (head.len() as u64) < threshold {
                tracing::debug!(
                    key,
                    size = head.len(),
                    "stream ended below threshold, using single put"
                );
                return self.put_object(key, head, options).await;
            }
            let head = futures::stream::once(async move { Ok::<_, std::io::Error>(head) });
            stream = Box::pin(head.chain(stream));
        }

        let part_size = self
            .multipart_config()
            .effective_part_size(options.part_size, content_length);
        let mut reader = PartReader::new(stream, part_size);

        let first = reader.next_part().await?;
        if reader.is_exhausted() {
            let data = first.map(|part| part.data).unwrap_or_default();
            tracing::debug!(
                key,
                size = data.len(),
                "stream fits in one part, using single put"
            );
            return self.put_object(key, data, options).await;
        }

        let session = self.create_multipart_upload(key, options).await?;
        let parts = futures::stream::iter(first.map(Ok))
            .chain(reader.into_stream().map_err(S3Error::from));
        self.drive(session, parts).await
    }

    /// Upload all parts then complete, aborting on any failure.
    async fn drive<S>(
        &self,
        mut session: MultipartUploadSession,
        parts: S,
    ) -> Result<PutObjectOutput>
    where
        S: Stream<Item = Result<Part>>,
    {
        if let Err(err) = session
            .upload_all(parts, self.multipart_config().concurrency)
            .await
        {
            return Err(session.abort_after(err).await);
        }

        let part_count = session.part_count() as u32;
        let output = session.complete().await?;
        Ok(PutObjectOutput {
            etag: Some(output.etag),
            parts: Some(part_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::s3::body::{RequestBody, ResponseBody};
    use crate::s3::transport::HttpTransport;
    use hyper::{Request, Response};

    struct Unreachable;

    #[async_trait::async_trait]
    impl HttpTransport for Unreachable {
        async fn send(&self, _request: Request<RequestBody>) -> Result<Response<ResponseBody>> {
            Err(S3Error::InvalidResponse("unreachable".to_string()))
        }
    }

    fn session() -> MultipartUploadSession {
        let config = ClientConfig::new("https://s3.example.com", "key", "secret", "us-east-1", "b");
        let client = S3Client::with_transport(config, Arc::new(Unreachable)).unwrap();
        MultipartUploadSession {
            client,
            key: Arc::from("big.bin"),
            upload_id: Arc::from("upload-1"),
            parts: BTreeMap::new(),
            // Closed so dropping the fixture does not try to abort
            state: SessionState::Completed,
        }
    }

    #[test]
    fn test_parts_sorted_by_number() {
        let mut session = session();
        for number in [3, 1, 2] {
            session
                .record_part(CompletedPart::new(number, format!("etag-{}", number)))
                .unwrap();
        }
        let numbers: Vec<u32> = session
            .completed_parts()
            .unwrap()
            .iter()
            .map(|p| p.part_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        session.state = SessionState::Completed;
    }

    #[test]
    fn test_gap_is_rejected() {
        let mut session = session();
        session.record_part(CompletedPart::new(1, "a".to_string())).unwrap();
        session.record_part(CompletedPart::new(3, "c".to_string())).unwrap();
        let err = session.completed_parts().unwrap_err();
        assert!(err.to_string().contains("missing part 2"));

        session.parts.clear();
        assert!(session.completed_parts().is_err());
        session.state = SessionState::Completed;
    }

    #[test]
    fn test_part_number_range() {
        let mut session = session();
        assert!(session.record_part(CompletedPart::new(0, "x".to_string())).is_err());
        assert!(session.record_part(CompletedPart::new(10_001, "x".to_string())).is_err());
        assert!(session.record_part(CompletedPart::new(10_000, "x".to_string())).is_ok());
        session.state = SessionState::Completed;
    }

    #[test]
    fn test_drop_outside_runtime_does_not_panic() {
        let mut session = session();
        session.state = SessionState::Initiated;
        drop(session);
    }
}
