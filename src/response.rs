//! Response descriptor.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

use crate::body::{Blob, ResponseBody};
use crate::error::FetchResult;
use crate::headers::Headers;

/// A parsed response head together with its lazy body.
///
/// Redirect responses are surfaced verbatim; callers inspect `location`
/// themselves and decide whether to follow.
#[derive(Debug)]
pub struct Response {
    version: String,
    status: u16,
    status_text: String,
    headers: Headers,
    url: Url,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn new(
        version: String,
        status: u16,
        status_text: String,
        headers: Headers,
        url: Url,
        body: ResponseBody,
    ) -> Self {
        Response {
            version,
            status,
            status_text,
            headers,
            url,
            body,
        }
    }

    /// Protocol version from the status line, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Numeric status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Status text from the status line (may be empty).
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// True for statuses in `[200, 300)`.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response headers (names lowercased on parse, duplicates preserved).
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The URL the request was sent to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// True once a materializer has claimed the body.
    pub fn body_used(&self) -> bool {
        self.body.is_used()
    }

    /// Raw access to the body stream.
    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Consume the response, keeping only the body.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Materialize the body as UTF-8 text.
    pub async fn text(&mut self) -> FetchResult<String> {
        self.body.text().await
    }

    /// Materialize and deserialize the body as JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> FetchResult<T> {
        self.body.json().await
    }

    /// Materialize the body as raw bytes.
    pub async fn bytes(&mut self) -> FetchResult<Bytes> {
        self.body.bytes().await
    }

    /// Materialize the body as a content-type-tagged [`Blob`].
    pub async fn blob(&mut self) -> FetchResult<Blob> {
        self.body.blob().await
    }

    /// Materialize an urlencoded body as decoded name/value pairs.
    pub async fn form_entries(&mut self) -> FetchResult<Vec<(String, String)>> {
        self.body.form_entries().await
    }
}
