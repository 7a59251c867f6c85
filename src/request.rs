//! Request descriptor and builder.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{FetchError, FetchResult};
use crate::headers::Headers;

/// A boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = FetchResult<Bytes>> + Send + 'static>>;

/// Request body payload.
pub enum Body {
    /// UTF-8 text, framed with a `content-length`.
    Text(String),
    /// Raw bytes, framed with a `content-length`.
    Bytes(Bytes),
    /// A lazy byte stream, framed with chunked transfer encoding unless the
    /// caller supplied explicit framing headers.
    Stream(ByteStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An HTTP request descriptor.
///
/// Built via [`Request::builder`] or the method shorthands. The URL must be
/// absolute; its origin decides which pool and agent serve the request.
#[derive(Debug)]
pub struct Request {
    /// Absolute request URL.
    pub url: Url,
    /// Upper-case method token.
    pub method: String,
    /// Ordered request headers.
    pub headers: Headers,
    /// Optional body payload.
    pub body: Option<Body>,
    /// Optional caller-side cancellation token.
    pub cancel: Option<CancellationToken>,
}

impl Request {
    /// Start building a request with an explicit method.
    pub fn builder(method: impl Into<String>, url: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder {
            method: method.into().to_ascii_uppercase(),
            url: url.as_ref().to_string(),
            headers: Headers::new(),
            body: None,
            cancel: None,
        }
    }

    /// Shorthand for a GET request builder.
    pub fn get(url: impl AsRef<str>) -> RequestBuilder {
        Self::builder("GET", url)
    }

    /// Shorthand for a POST request builder.
    pub fn post(url: impl AsRef<str>) -> RequestBuilder {
        Self::builder("POST", url)
    }

    /// Shorthand for a PUT request builder.
    pub fn put(url: impl AsRef<str>) -> RequestBuilder {
        Self::builder("PUT", url)
    }

    /// Shorthand for a DELETE request builder.
    pub fn delete(url: impl AsRef<str>) -> RequestBuilder {
        Self::builder("DELETE", url)
    }

    /// Shorthand for a HEAD request builder.
    pub fn head(url: impl AsRef<str>) -> RequestBuilder {
        Self::builder("HEAD", url)
    }
}

/// Builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    method: String,
    url: String,
    headers: Headers,
    body: Option<Body>,
    cancel: Option<CancellationToken>,
}

impl RequestBuilder {
    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set a UTF-8 text body.
    #[must_use]
    pub fn body_text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(Body::Text(text.into()));
        self
    }

    /// Set a raw byte body.
    #[must_use]
    pub fn body_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = Some(Body::Bytes(bytes.into()));
        self
    }

    /// Set a lazy streaming body.
    #[must_use]
    pub fn body_stream(mut self, stream: ByteStream) -> Self {
        self.body = Some(Body::Stream(stream));
        self
    }

    /// Attach a cancellation token; cancelling it aborts the request.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate and build the request.
    pub fn build(self) -> FetchResult<Request> {
        let url = Url::parse(&self.url)
            .map_err(|e| FetchError::InvalidRequest(format!("invalid url {:?}: {e}", self.url)))?;
        if self.method.is_empty() || !self.method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(FetchError::InvalidRequest(format!(
                "invalid method token {:?}",
                self.method
            )));
        }
        Ok(Request {
            url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            cancel: self.cancel,
        })
    }
}
