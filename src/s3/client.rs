//! S3 client implementation with core operations
//!
//! - Every request is signed with SigV4 just before it goes to the transport
//! - Buffered bodies are signed with their real SHA256; streams sent as they are
//!   read use UNSIGNED-PAYLOAD
//! - Response bodies stream; only XML documents and error bodies are collected
//! - No internal retries: transport and protocol errors reach the caller as-is

use crate::config::ClientConfig;
use crate::s3::body::{ByteStream, ObjectBody, RequestBody, ResponseBody};
use crate::s3::canonical::{encode_key, uri_encode_into, PayloadHash};
use crate::s3::error::{Result, S3Error};
use crate::s3::signer::S3SignerV4;
use crate::s3::transport::{HttpTransport, HyperTransport};
use crate::s3::types::{
    CopyObjectOutput, GetObjectOutput, HeadObjectOutput, ListPage, ListParams, MultipartConfig,
    PresignedOperation, PutObjectOutput, UploadOptions, METADATA_PREFIX,
};
use crate::s3::xml::{error_document, trim_etag, FromXml};
use bytes::Bytes;
use futures::StreamExt;
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response, StatusCode};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// S3 client bound to one endpoint and bucket
///
/// Clone is cheap - transport, signer and configuration are shared behind `Arc`.
#[derive(Clone)]
pub struct S3Client {
    /// Sends signed requests (hyper in production, mocks in tests)
    transport: Arc<dyn HttpTransport>,
    /// AWS SigV4 signer (with signing key cache)
    signer: Arc<S3SignerV4>,
    config: Arc<ClientConfig>,
    multipart: MultipartConfig,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("config", &self.config)
            .field("multipart", &self.multipart)
            .finish_non_exhaustive()
    }
}

impl S3Client {
    /// Create a client with the hyper transport.
    ///
    /// Fails with a configuration error when any required setting is missing;
    /// nothing is deferred to the first request.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HyperTransport::new(config.timeout(), config.insecure_tls)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client that sends through `transport`.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;
        let signer = S3SignerV4::new(&config.access_key, &config.secret_key, &config.region)?;

        Ok(Self {
            transport,
            signer: Arc::new(signer),
            config: Arc::new(config),
            multipart: MultipartConfig::default(),
        })
    }

    pub fn with_multipart_config(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn multipart_config(&self) -> &MultipartConfig {
        &self.multipart
    }

    /// Build full S3 URL for a key with pre-allocated capacity
    pub(crate) fn object_url(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(S3Error::InvalidArgument("object key is empty".to_string()));
        }
        let endpoint = self.config.endpoint.trim_end_matches('/');
        let encoded_key = encode_key(key);
        let mut url = String::with_capacity(
            endpoint.len() + 1 + self.config.bucket.len() + 1 + encoded_key.len(),
        );
        url.push_str(endpoint);
        url.push('/');
        url.push_str(&self.config.bucket);
        url.push('/');
        url.push_str(&encoded_key);
        Ok(url)
    }

    /// Build bucket URL (no key) with pre-allocated capacity
    fn bucket_url(&self) -> String {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        let mut url = String::with_capacity(endpoint.len() + 1 + self.config.bucket.len());
        url.push_str(endpoint);
        url.push('/');
        url.push_str(&self.config.bucket);
        url
    }

    /// Sign and send one request. Status handling is left to the caller.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: RequestBody,
        payload_hash: &PayloadHash,
    ) -> Result<Response<ResponseBody>> {
        let signed_headers = self.signer.sign(method.as_str(), url, headers, payload_hash);

        let mut req = Request::builder().method(method.clone()).uri(url);
        for (name, value) in signed_headers.iter() {
            req = req.header(name, value);
        }
        let request = req.body(body)?;

        let response = self.transport.send(request).await.inspect_err(|e| {
            tracing::debug!(method = %method, url, error = %e, "s3 request failed");
        })?;
        tracing::debug!(method = %method, url, status = response.status().as_u16(), "s3 request");

        Ok(response)
    }

    /// Send a request with no body.
    pub(crate) async fn send_empty(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
    ) -> Result<Response<ResponseBody>> {
        self.send(method, url, headers, RequestBody::Empty, &PayloadHash::Empty)
            .await
    }

    /// Send a fully buffered body signed with its SHA256.
    pub(crate) async fn send_bytes(
        &self,
        method: Method,
        url: &str,
        mut headers: BTreeMap<String, String>,
        data: Bytes,
    ) -> Result<Response<ResponseBody>> {
        let payload_hash = PayloadHash::of(&data);
        headers.insert("content-length".to_string(), data.len().to_string());
        self.send(method, url, headers, RequestBody::from(data), &payload_hash)
            .await
    }

    /// Upload a payload, choosing single PUT or multipart by size.
    ///
    /// Buffers and known-length streams below the multipart threshold go in
    /// one request; everything else goes through the multipart orchestrator.
    /// A stream of unknown length is buffered up to the threshold and sent as
    /// a single PUT if it ends below it.
    ///
    /// Payload signing follows the body: buffers and streams read to the end
    /// before sending are signed with their SHA256, and so is every multipart
    /// part. A known-length stream below the threshold is sent as it is read,
    /// so it is signed with `UNSIGNED-PAYLOAD`.
    pub async fn put(
        &self,
        key: &str,
        body: impl Into<ObjectBody>,
        options: &UploadOptions,
    ) -> Result<PutObjectOutput> {
        let threshold = self.multipart.threshold;

        match body.into() {
            ObjectBody::Bytes(data) if (data.len() as u64) < threshold => {
                self.put_object(key, data, options).await
            }
            ObjectBody::Bytes(data) => self.multipart_upload(key, data, options).await,
            ObjectBody::Stream {
                stream,
                content_length: Some(len),
            } if len < threshold => self.put_stream(key, stream, len, options).await,
            ObjectBody::Stream {
                stream,
                content_length,
            } => {
                self.multipart_upload_stream(key, stream, content_length, options)
                    .await
            }
        }
    }

    /// Single PUT of a buffered payload with its real payload hash.
    pub async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<PutObjectOutput> {
        let url = self.object_url(key)?;
        let response = self
            .send_bytes(Method::PUT, &url, options.object_headers(), data)
            .await?;
        let response = error_for_status(response).await?;

        Ok(PutObjectOutput {
            etag: header_string(response.headers(), "etag").map(|etag| trim_etag(&etag)),
            parts: None,
        })
    }

    /// Single PUT of a stream of known length, signed with UNSIGNED-PAYLOAD.
    async fn put_stream(
        &self,
        key: &str,
        stream: ByteStream,
        content_length: u64,
        options: &UploadOptions,
    ) -> Result<PutObjectOutput> {
        let url = self.object_url(key)?;
        let mut headers = options.object_headers();
        headers.insert("content-length".to_string(), content_length.to_string());

        let response = self
            .send(
                Method::PUT,
                &url,
                headers,
                RequestBody::Stream(stream),
                &PayloadHash::Unsigned,
            )
            .await?;
        let response = error_for_status(response).await?;

        Ok(PutObjectOutput {
            etag: header_string(response.headers(), "etag").map(|etag| trim_etag(&etag)),
            parts: None,
        })
    }

    /// Get an object as a stream together with its metadata.
    ///
    /// A missing object is [`S3Error::NotFound`].
    pub async fn get_object(&self, key: &str) -> Result<GetObjectOutput> {
        let url = self.object_url(key)?;
        let response = self.send_empty(Method::GET, &url, BTreeMap::new()).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(S3Error::NotFound { key: key.to_string() });
        }
        let (parts, body) = error_for_status(response).await?.into_parts();

        let headers = &parts.headers;
        Ok(GetObjectOutput {
            body,
            content_length: header_string(headers, "content-length").and_then(|v| v.parse().ok()),
            content_type: header_string(headers, "content-type"),
            etag: header_string(headers, "etag").map(|etag| trim_etag(&etag)),
            last_modified: header_string(headers, "last-modified"),
            metadata: user_metadata(headers),
        })
    }

    /// Get an object fully buffered.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        self.get_object(key).await?.body.collect().await
    }

    /// Download object directly to a file (streaming)
    ///
    /// Returns the number of bytes written.
    pub async fn download_to_file(&self, key: &str, path: &Path) -> Result<u64> {
        let output = self.get_object(key).await?;

        let file = tokio::fs::File::create(path).await?;
        let mut writer = tokio::io::BufWriter::with_capacity(256 * 1024, file);
        let mut body = output.body.into_stream();
        let mut total_bytes = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(S3Error::transport)?;
            writer.write_all(&chunk).await?;
            total_bytes += chunk.len() as u64;
        }

        writer.flush().await?;
        tracing::debug!(key, bytes = total_bytes, path = %path.display(), "downloaded object");
        Ok(total_bytes)
    }

    /// Delete an object. Deleting a missing object succeeds.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let url = self.object_url(key)?;
        let response = self.send_empty(Method::DELETE, &url, BTreeMap::new()).await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(key, "delete of missing object");
            return Ok(());
        }
        error_for_status(response).await?;
        Ok(())
    }

    /// Existence and user metadata of an object. A missing object is
    /// `exists: false`, not an error.
    pub async fn head(&self, key: &str) -> Result<HeadObjectOutput> {
        let url = self.object_url(key)?;
        let response = self.send_empty(Method::HEAD, &url, BTreeMap::new()).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(HeadObjectOutput::missing());
        }
        let response = error_for_status(response).await?;

        let headers = response.headers();
        Ok(HeadObjectOutput {
            exists: true,
            metadata: user_metadata(headers),
            content_length: header_string(headers, "content-length").and_then(|v| v.parse().ok()),
            content_type: header_string(headers, "content-type"),
            etag: header_string(headers, "etag").map(|etag| trim_etag(&etag)),
            last_modified: header_string(headers, "last-modified"),
        })
    }

    /// Server-side copy within the bucket. No object data passes through the client.
    pub async fn copy(&self, source_key: &str, dest_key: &str) -> Result<CopyObjectOutput> {
        if source_key.is_empty() {
            return Err(S3Error::InvalidArgument("copy source key is empty".to_string()));
        }
        let url = self.object_url(dest_key)?;

        let mut copy_source =
            String::with_capacity(self.config.bucket.len() + source_key.len() + 2);
        copy_source.push('/');
        copy_source.push_str(&self.config.bucket);
        copy_source.push('/');
        copy_source.push_str(&encode_key(source_key));

        let mut headers = BTreeMap::new();
        headers.insert("x-amz-copy-source".to_string(), copy_source);

        let response = self.send_empty(Method::PUT, &url, headers).await?;
        let status = response.status();
        let response = error_for_status(response).await?;
        let body = response.into_body().collect().await?;

        // CopyObject can fail after sending 200 OK
        check_error_document(status, &body)?;
        CopyObjectOutput::from_xml(&body)
    }

    /// One page of keys under `prefix`. Pass the previous page's continuation
    /// token to get the next one.
    pub async fn list(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        let params = ListParams {
            prefix: prefix.map(str::to_string),
            continuation_token: continuation_token.map(str::to_string),
            ..ListParams::default()
        };
        self.list_objects_v2(&params).await
    }

    /// List objects in bucket (S3 ListObjectsV2)
    pub async fn list_objects_v2(&self, params: &ListParams) -> Result<ListPage> {
        let url = self.build_list_url(params);
        let response = self.send_empty(Method::GET, &url, BTreeMap::new()).await?;
        let response = error_for_status(response).await?;
        let body = response.into_body().collect().await?;

        ListPage::from_xml(&body)
    }

    /// Build the full URL for a ListObjectsV2 request.
    pub fn build_list_url(&self, params: &ListParams) -> String {
        let mut url = self.bucket_url();
        url.reserve(256);
        url.push_str("?list-type=2");

        if let Some(ref token) = params.continuation_token {
            url.push_str("&continuation-token=");
            uri_encode_into(&mut url, token, true);
        }
        if let Some(ref delimiter) = params.delimiter {
            url.push_str("&delimiter=");
            uri_encode_into(&mut url, delimiter, true);
        }
        if let Some(max_keys) = params.max_keys {
            let _ = write!(url, "&max-keys={}", max_keys);
        }
        if let Some(ref prefix) = params.prefix {
            url.push_str("&prefix=");
            uri_encode_into(&mut url, prefix, true);
        }

        url
    }

    /// Query-signed URL that lets its bearer perform one GET or PUT on `key`
    /// for `expires_in` seconds (1 to 604800).
    pub fn presigned_url(
        &self,
        key: &str,
        expires_in: u64,
        operation: PresignedOperation,
    ) -> Result<String> {
        let url = self.object_url(key)?;
        let presigned = self.signer.presign(operation.method(), &url, expires_in)?;
        tracing::debug!(key, expires_in, method = operation.method(), "presigned url");
        Ok(presigned)
    }
}

/// Turn a non-2xx response into [`S3Error::Protocol`] carrying the body text.
pub(crate) async fn error_for_status(
    response: Response<ResponseBody>,
) -> Result<Response<ResponseBody>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.into_body().collect().await?;
    let code = error_document(&body).map(|error| error.code);
    let message = String::from_utf8_lossy(&body).into_owned();
    tracing::debug!(status = status.as_u16(), code = ?code, "s3 error response");

    Err(S3Error::Protocol {
        status,
        code,
        message,
    })
}

/// Reject a success response whose body is an `<Error>` document.
pub(crate) fn check_error_document(status: StatusCode, body: &[u8]) -> Result<()> {
    match error_document(body) {
        Some(error) => Err(S3Error::Protocol {
            status,
            code: Some(error.code),
            message: String::from_utf8_lossy(body).into_owned(),
        }),
        None => Ok(()),
    }
}

pub(crate) fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// `x-amz-meta-*` headers with the prefix removed
fn user_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix(METADATA_PREFIX)?;
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            Some((name.to_string(), value))
        })
        .collect()
}
