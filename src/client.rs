//! Client facade: one pool per origin.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{FetchError, FetchResult};
use crate::origin::Origin;
use crate::pool::{Pool, PoolConfig};
use crate::request::Request;
use crate::response::Response;

struct ClientInner {
    config: PoolConfig,
    pools: Mutex<Option<HashMap<Origin, Pool>>>,
}

/// The fetch entry point.
///
/// Routes each request to the pool for its origin, creating pools on
/// demand; at most one pool exists per origin for the client's lifetime.
/// Cloning shares the same pools.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pools = self.inner.pools.lock();
        f.debug_struct("Client")
            .field("closed", &pools.is_none())
            .field(
                "pools",
                &pools.as_ref().map(|map| map.len()).unwrap_or_default(),
            )
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a client with default pool options.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            config: PoolConfig::default(),
        }
    }

    fn with_config(config: PoolConfig) -> Self {
        Client {
            inner: Arc::new(ClientInner {
                config,
                pools: Mutex::new(Some(HashMap::new())),
            }),
        }
    }

    /// Execute a request and surface the response verbatim.
    ///
    /// Redirects are not followed and bodies are not buffered; see
    /// [`Response`] for streaming and materialization.
    pub async fn fetch(&self, request: Request) -> FetchResult<Response> {
        let origin = Origin::from_url(&request.url)?;
        let pool = {
            let mut pools = self.inner.pools.lock();
            let pools = pools
                .as_mut()
                .ok_or_else(|| FetchError::ConnectionFailed("client is closed".into()))?;
            pools
                .entry(origin.clone())
                .or_insert_with(|| {
                    debug!(%origin, "creating pool");
                    Pool::new(origin.clone(), self.inner.config.clone())
                })
                .clone()
        };
        pool.send(request).await
    }

    /// Number of pools created so far (zero after [`Client::close`]).
    pub fn pool_count(&self) -> usize {
        self.inner
            .pools
            .lock()
            .as_ref()
            .map(|map| map.len())
            .unwrap_or_default()
    }

    /// Close every pool, aborting in-flight requests. Idempotent; further
    /// fetches fail.
    pub fn close(&self) {
        let pools = self.inner.pools.lock().take();
        if let Some(pools) = pools {
            debug!(count = pools.len(), "closing client pools");
            for pool in pools.values() {
                pool.close();
            }
        }
    }
}

/// Builder plumbing pool options into a [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    config: PoolConfig,
}

impl ClientBuilder {
    /// Maximum concurrent agents per origin (effective minimum 1).
    #[must_use]
    pub fn pool_max_per_host(mut self, max: usize) -> Self {
        self.config.max_per_host = Some(max);
        self
    }

    /// Upper bound on retained idle agents per origin.
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.max_idle_per_host = max;
        self
    }

    /// Idle eviction timeout; `None` disables eviction.
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Limit on TCP connect plus TLS handshake; `None` disables it.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> Client {
        Client::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_rejects_unsupported_schemes() {
        let client = Client::new();
        let request = Request::get("ftp://example.com/file").build().unwrap();
        assert!(matches!(
            client.fetch(request).await,
            Err(FetchError::UnsupportedProtocol(_))
        ));
        assert_eq!(client.pool_count(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_later_fetches() {
        let client = Client::new();
        client.close();
        client.close();
        let request = Request::get("http://example.com/").build().unwrap();
        assert!(matches!(
            client.fetch(request).await,
            Err(FetchError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn builder_sets_pool_options() {
        let client = Client::builder()
            .pool_max_per_host(4)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Some(Duration::from_secs(5)))
            .connect_timeout(None)
            .build();
        assert_eq!(client.inner.config.max_per_host, Some(4));
        assert_eq!(client.inner.config.max_idle_per_host, 2);
        assert_eq!(
            client.inner.config.idle_timeout,
            Some(Duration::from_secs(5))
        );
        assert_eq!(client.inner.config.connect_timeout, None);
    }
}
