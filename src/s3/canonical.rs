//! Canonical request construction for AWS Signature Version 4
//!
//! The canonical request is the exact byte sequence both the client and the
//! service hash before signing:
//!
//! ```text
//! METHOD\nPATH\nQUERY\nHEADERS\n\nSIGNED_HEADERS\nPAYLOAD_HASH
//! ```
//!
//! Header names are lower-cased and de-duplicated, query parameters are sorted
//! and RFC 3986 encoded (space as `%20`, never `+`).

use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA256 of the empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Payload-hash sentinel for bodies whose hash is not known upfront
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Value of the `x-amz-content-sha256` header / last canonical request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadHash {
    /// No body (GET, DELETE, HEAD, ...)
    Empty,
    /// Hex SHA256 of a fully buffered body
    Sha256(String),
    /// Streamed body, see [`UNSIGNED_PAYLOAD`]
    Unsigned,
}

impl PayloadHash {
    /// Hash a buffered payload. Empty payloads use the precomputed constant.
    pub fn of(payload: &[u8]) -> Self {
        if payload.is_empty() {
            PayloadHash::Empty
        } else {
            PayloadHash::Sha256(hex::encode(Sha256::digest(payload)))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PayloadHash::Empty => EMPTY_SHA256,
            PayloadHash::Sha256(hash) => hash,
            PayloadHash::Unsigned => UNSIGNED_PAYLOAD,
        }
    }
}

/// Canonical form of one HTTP request.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    method: String,
    path: String,
    query: String,
    headers: BTreeMap<String, String>,
    payload_hash: String,
}

impl CanonicalRequest {
    /// `path` must already be URI-encoded (object keys are encoded when the URL
    /// is built); `query` is the raw query string and is canonicalized here.
    pub fn new(method: &str, path: &str, query: &str, payload_hash: &PayloadHash) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query: canonical_query_string(query),
            headers: BTreeMap::new(),
            payload_hash: payload_hash.as_str().to_string(),
        }
    }

    /// Add a header. Names are lower-cased; a repeated name has its values
    /// joined with `,` so every name appears exactly once.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        let name = name.trim().to_ascii_lowercase();
        let value = normalize_header_value(value);
        self.headers
            .entry(name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in headers {
            self.insert_header(name, value);
        }
        self
    }

    /// Lower-cased, de-duplicated headers in sorted order.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn canonical_query(&self) -> &str {
        &self.query
    }

    pub fn payload_hash(&self) -> &str {
        &self.payload_hash
    }

    /// `name:value\n` for every header, sorted by name
    pub fn canonical_headers(&self) -> String {
        let mut result = String::with_capacity(self.headers.len() * 64);
        for (k, v) in &self.headers {
            result.push_str(k);
            result.push(':');
            result.push_str(v);
            result.push('\n');
        }
        result
    }

    /// Sorted, semicolon-joined header names
    pub fn signed_headers(&self) -> String {
        let mut result = String::with_capacity(self.headers.len() * 20);
        for (i, k) in self.headers.keys().enumerate() {
            if i > 0 {
                result.push(';');
            }
            result.push_str(k);
        }
        result
    }

    /// The full canonical request string.
    pub fn build(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.query,
            self.canonical_headers(),
            self.signed_headers(),
            self.payload_hash
        )
    }

    /// Hex SHA256 of [`Self::build`], the last line of the string to sign.
    pub fn hashed(&self) -> String {
        hex::encode(Sha256::digest(self.build().as_bytes()))
    }
}

/// Trim and collapse runs of spaces, as SigV4 requires for header values.
fn normalize_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_space = false;
    for ch in value.trim().chars() {
        if ch == ' ' {
            if !last_space {
                out.push(ch);
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

/// Create canonical query string: each name and value decoded, re-encoded per
/// RFC 3986, then sorted by name (and value for repeated names).
///
/// Parameters without `=` (like `?uploads`) become `uploads=`.
pub fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = match pair.find('=') {
                Some(pos) => (&pair[..pos], &pair[pos + 1..]),
                None => (pair, ""),
            };
            let key = urlencoding::decode(key).unwrap_or(Cow::Borrowed(key));
            let value = urlencoding::decode(value).unwrap_or(Cow::Borrowed(value));
            (uri_encode(&key, true), uri_encode(&value, true))
        })
        .collect();

    params.sort_unstable();

    let mut out = String::with_capacity(query.len() + 16);
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// URI encode a string (RFC 3986) using hex lookup table
pub fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut result = String::with_capacity(s.len() + 16);
    uri_encode_into(&mut result, s, encode_slash);
    result
}

/// Encode into an existing buffer. Unreserved characters pass through.
pub fn uri_encode_into(buf: &mut String, s: &str, encode_slash: bool) {
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                buf.push(byte as char);
            }
            b'/' if !encode_slash => {
                buf.push('/');
            }
            _ => {
                buf.push('%');
                buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
}

/// Encode an S3 key for the URL path, preserving forward slashes.
/// Returns Cow::Borrowed when no encoding is needed.
pub fn encode_key(key: &str) -> Cow<'_, str> {
    let needs_encoding = key.bytes().any(|b| {
        !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
    });

    if needs_encoding {
        Cow::Owned(uri_encode(key, false))
    } else {
        Cow::Borrowed(key)
    }
}

/// Split a URL into `(host, path, query)` slices.
///
/// Default ports (:443 for https, :80 for http) are stripped from the host,
/// matching what HTTP clients put in the `Host` header.
pub fn split_url(url: &str) -> (&str, &str, &str) {
    let after_scheme = if let Some(rest) = url.strip_prefix("https://") {
        rest
    } else if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else {
        url
    };

    let (authority, path_and_query) = match after_scheme.find('/') {
        Some(pos) => (&after_scheme[..pos], &after_scheme[pos..]),
        None => match after_scheme.find('?') {
            Some(pos) => (&after_scheme[..pos], &after_scheme[pos..]),
            None => (after_scheme, "/"),
        },
    };

    let (path, query) = match path_and_query.find('?') {
        Some(pos) => (&path_and_query[..pos], &path_and_query[pos + 1..]),
        None => (path_and_query, ""),
    };
    let path = if path.is_empty() { "/" } else { path };

    let host = if url.starts_with("https") {
        authority.strip_suffix(":443").unwrap_or(authority)
    } else {
        authority.strip_suffix(":80").unwrap_or(authority)
    };

    (host, path, query)
}
