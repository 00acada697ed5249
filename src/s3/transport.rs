//! HTTP transport used by the S3 client
//!
//! The client only needs "send this signed request, give me the response".
//! [`HttpTransport`] is that seam; [`HyperTransport`] is the production
//! implementation:
//! - Tuned connection pool (1024 idle per host, 90s timeout)
//! - TCP_NODELAY for low latency
//! - native-tls (OpenSSL) for TLS
//! - Streaming request and response bodies

use crate::s3::body::{RequestBody, ResponseBody};
use crate::s3::error::{Result, S3Error};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::{Request, Response};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::convert::Infallible;
use std::io;
use std::time::Duration;

/// Sends one already-signed request.
///
/// Implementations must not retry: transport failures go back to the caller
/// unchanged as [`S3Error::Transport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: Request<RequestBody>) -> Result<Response<ResponseBody>>;
}

type HyperBody = UnsyncBoxBody<Bytes, io::Error>;

/// hyper-based transport with a pooled HTTPS connector.
///
/// Clone is cheap - the underlying HTTP client uses Arc internally.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, HyperBody>,
    /// Time allowed until response headers arrive
    timeout: Duration,
}

impl HyperTransport {
    pub fn new(timeout: Duration, insecure_tls: bool) -> Result<Self> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
        } else {
            TlsConnector::new()
        }
        .map_err(|e| S3Error::Config(format!("failed to build TLS connector: {}", e)))?;

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(1024)
            .set_host(true)
            .build(https);

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, request: Request<RequestBody>) -> Result<Response<ResponseBody>> {
        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, into_hyper_body(body));

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| {
                S3Error::transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no response within {:?}", self.timeout),
                ))
            })?
            .map_err(S3Error::transport)?;

        let (parts, incoming) = response.into_parts();
        let stream = incoming.into_data_stream().map_err(io::Error::other);
        Ok(Response::from_parts(parts, ResponseBody::from_stream(stream)))
    }
}

fn into_hyper_body(body: RequestBody) -> HyperBody {
    fn never(never: Infallible) -> io::Error {
        match never {}
    }

    match body {
        RequestBody::Empty => Empty::<Bytes>::new().map_err(never).boxed_unsync(),
        RequestBody::Bytes(bytes) => Full::new(bytes).map_err(never).boxed_unsync(),
        RequestBody::Stream(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
    }
}
