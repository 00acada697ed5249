//! Error types for the S3 client

use hyper::StatusCode;
use thiserror::Error;

/// Boxed error used for transport failures coming from arbitrary HTTP stacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    /// Missing or invalid credentials, endpoint or bucket.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network failure, timeout, DNS or TLS error. Never retried by the client.
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// The object does not exist (404 on GET).
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Non-2xx response from the service.
    #[error("S3 error: {status} - {message}")]
    Protocol {
        status: StatusCode,
        /// S3 error code from the `<Error>` body, when the body carried one
        code: Option<String>,
        /// Raw response body text
        message: String,
    },

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),
}

impl S3Error {
    /// True for the distinct "object does not exist" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, S3Error::NotFound { .. })
    }

    /// HTTP status carried by protocol errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            S3Error::Protocol { status, .. } => Some(*status),
            S3Error::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            _ => None,
        }
    }

    pub(crate) fn transport<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        S3Error::Transport(err.into())
    }
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::XmlParse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;
