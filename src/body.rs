//! Lazy response body and one-shot materializers.
//!
//! The body is a stream of chunks fed by the owning agent's drain task.
//! Materializers consume the stream at most once; raw chunk access is a
//! separate path that bypasses the used-flag, leaving consumption
//! discipline to the caller.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::{FetchError, FetchResult};

/// An opaque binary value tagged with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// The response `content-type`, empty when the header was absent.
    pub content_type: String,
    /// The materialized bytes.
    pub data: Bytes,
}

/// A lazy, at-most-once-consumed response body.
#[derive(Debug)]
pub struct ResponseBody {
    rx: mpsc::Receiver<FetchResult<Bytes>>,
    content_type: Option<String>,
    used: bool,
}

impl ResponseBody {
    pub(crate) fn new(rx: mpsc::Receiver<FetchResult<Bytes>>, content_type: Option<String>) -> Self {
        ResponseBody {
            rx,
            content_type,
            used: false,
        }
    }

    /// An already-terminated body (HEAD and 1xx/204/304 responses).
    pub(crate) fn empty(content_type: Option<String>) -> Self {
        let (_, rx) = mpsc::channel(1);
        Self::new(rx, content_type)
    }

    /// The response `content-type`, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// True once a materializer has claimed the body.
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Next raw chunk, or `None` once the body has ended.
    ///
    /// This path does not set the used-flag; mixing it with materializers
    /// is the caller's responsibility.
    pub async fn chunk(&mut self) -> Option<FetchResult<Bytes>> {
        self.rx.recv().await
    }

    fn mark_used(&mut self) -> FetchResult<()> {
        if self.used {
            return Err(FetchError::BodyAlreadyRead);
        }
        self.used = true;
        Ok(())
    }

    async fn collect(&mut self) -> FetchResult<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.rx.recv().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }

    /// Materialize the body as UTF-8 text (invalid sequences replaced).
    pub async fn text(&mut self) -> FetchResult<String> {
        self.mark_used()?;
        let bytes = self.collect().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Materialize and deserialize the body as JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> FetchResult<T> {
        self.mark_used()?;
        let bytes = self.collect().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(format!("invalid json: {e}")))
    }

    /// Materialize the body as raw bytes.
    pub async fn bytes(&mut self) -> FetchResult<Bytes> {
        self.mark_used()?;
        self.collect().await
    }

    /// Materialize the body as a [`Blob`] preserving the content type.
    pub async fn blob(&mut self) -> FetchResult<Blob> {
        self.mark_used()?;
        let data = self.collect().await?;
        Ok(Blob {
            content_type: self.content_type.clone().unwrap_or_default(),
            data,
        })
    }

    /// Materialize an `application/x-www-form-urlencoded` body as decoded
    /// name/value pairs.
    pub async fn form_entries(&mut self) -> FetchResult<Vec<(String, String)>> {
        self.mark_used()?;
        let essence = self
            .content_type
            .as_deref()
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if essence == "multipart/form-data" {
            return Err(FetchError::UnsupportedContent(
                "multipart/form-data is not supported".into(),
            ));
        }
        if essence != "application/x-www-form-urlencoded" {
            return Err(FetchError::UnsupportedContent(format!(
                "cannot parse {essence:?} as form entries"
            )));
        }
        let bytes = self.collect().await?;
        Ok(url::form_urlencoded::parse(&bytes).into_owned().collect())
    }
}

impl Stream for ResponseBody {
    type Item = FetchResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
