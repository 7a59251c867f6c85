//! # fetchwire
//!
//! An HTTP/1.1 client engine with a fetch-shaped surface and two properties
//! the stock platform client does not offer:
//!
//! - **Verbatim redirects**: 3xx responses are surfaced as-is so the caller
//!   can inspect `location` and decide whether to follow.
//! - **Lazy bodies**: response bodies are never buffered eagerly; the
//!   caller streams chunks or explicitly materializes the body (at most
//!   once) as text, JSON, bytes, a blob, or form entries.
//!
//! A per-origin connection pool reuses idle TCP/TLS connections subject to
//! concurrency, idle-count, and idle-timeout limits.
//!
//! ## Module Organization
//!
//! ```text
//! fetchwire/
//! ├── client/    # origin → pool facade, fetch entry point
//! ├── pool/      # bounded per-origin agent set, queueing, eviction
//! ├── agent/     # one socket, one in-flight request, reuse decisions
//! ├── codec/     # request serialization, head parsing, chunked, codings
//! ├── body/      # lazy stream + one-shot materializers
//! └── conn/      # buffered TCP/TLS connection
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use fetchwire::{Client, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .pool_max_per_host(4)
//!         .pool_max_idle_per_host(2)
//!         .build();
//!
//!     let mut response = client
//!         .fetch(Request::get("http://example.com/").build()?)
//!         .await?;
//!
//!     if response.status() / 100 == 3 {
//!         println!("redirected to {:?}", response.headers().get("location"));
//!     } else {
//!         println!("{}", response.text().await?);
//!     }
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! Cancellation composes through [`CancellationToken`]: attach one to a
//! request and cancel it to abort connecting, writing, header parsing, or
//! body streaming; the owning connection is closed and its agent returns
//! to idle.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod agent;
mod body;
mod client;
mod codec;
mod conn;
mod error;
mod headers;
mod origin;
mod pool;
mod request;
mod response;

pub use agent::Agent;
pub use body::{Blob, ResponseBody};
pub use client::{Client, ClientBuilder};
pub use error::{FetchError, FetchResult};
pub use headers::Headers;
pub use origin::{Origin, Scheme};
pub use pool::{Pool, PoolConfig};
pub use request::{Body, ByteStream, Request, RequestBuilder};
pub use response::Response;

// Re-exported so callers can attach cancellation without depending on
// tokio-util directly.
pub use tokio_util::sync::CancellationToken;
