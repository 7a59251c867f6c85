//! Single-connection HTTP/1.1 request executor.
//!
//! An agent owns at most one socket and runs exactly one request/response
//! exchange at a time. The response is returned as soon as its head is
//! parsed; a background drain task keeps ownership of the socket until the
//! body ends, the request is cancelled, or the response is dropped
//! unconsumed, and then releases the agent back to idle exactly once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::body::ResponseBody;
use crate::codec::chunked::ChunkedDecoder;
use crate::codec::compress::{ContentCoding, Decompressor};
use crate::codec::request::{encode_request, write_body};
use crate::codec::response::{body_framing, is_reusable, read_head, BodyFraming};
use crate::conn::Conn;
use crate::error::{FetchError, FetchResult};
use crate::origin::Origin;
use crate::request::Request;
use crate::response::Response;

/// Chunks buffered between the drain task and a slow body consumer.
const BODY_CHANNEL_CAPACITY: usize = 8;

struct AgentState {
    conn: Option<Conn>,
    busy: bool,
    closed: bool,
}

struct AgentInner {
    origin: Origin,
    connect_timeout: Option<Duration>,
    /// Agent-local controller; cancelling it tears down any in-flight
    /// request. Every request runs under a child of this token.
    token: CancellationToken,
    state: Mutex<AgentState>,
    busy: watch::Sender<bool>,
}

impl AgentInner {
    fn try_acquire(&self) -> FetchResult<()> {
        let mut st = self.state.lock();
        if st.closed {
            return Err(FetchError::ConnectionFailed("agent is closed".into()));
        }
        if st.busy {
            return Err(FetchError::AgentBusy);
        }
        st.busy = true;
        self.busy.send_replace(true);
        Ok(())
    }

    /// One-shot release back to idle, retaining the socket when offered.
    fn release(&self, conn: Option<Conn>) {
        let mut st = self.state.lock();
        if let Some(conn) = conn {
            if !st.closed && !self.token.is_cancelled() {
                st.conn = Some(conn);
            }
        }
        st.busy = false;
        self.busy.send_replace(false);
    }
}

/// A single-connection request executor bound to one origin.
///
/// Cloning an agent clones a handle to the same underlying connection
/// slot; the pool and the drain task share it this way.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Agent")
            .field("origin", &self.inner.origin.to_string())
            .field("busy", &st.busy)
            .field("closed", &st.closed)
            .field("has_connection", &st.conn.is_some())
            .finish()
    }
}

impl Agent {
    /// Create an idle agent for `origin`. The socket is opened lazily on
    /// the first send.
    pub fn new(origin: Origin, connect_timeout: Option<Duration>) -> Self {
        let (busy, _) = watch::channel(false);
        Agent {
            inner: Arc::new(AgentInner {
                origin,
                connect_timeout,
                token: CancellationToken::new(),
                state: Mutex::new(AgentState {
                    conn: None,
                    busy: false,
                    closed: false,
                }),
                busy,
            }),
        }
    }

    /// The origin this agent is bound to.
    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// Hostname of the bound origin.
    pub fn hostname(&self) -> &str {
        &self.inner.origin.host
    }

    /// Port of the bound origin.
    pub fn port(&self) -> u16 {
        self.inner.origin.port
    }

    /// True when no request is in flight.
    pub fn is_idle(&self) -> bool {
        !self.inner.state.lock().busy
    }

    /// True once the agent has been force-closed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// True while the agent retains an open socket for reuse.
    pub(crate) fn has_live_connection(&self) -> bool {
        self.inner.state.lock().conn.is_some()
    }

    pub(crate) fn ptr_eq(&self, other: &Agent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wait for the next idle transition (resolves immediately when idle).
    pub async fn when_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Abort any in-flight request, discard the socket, and retire the
    /// agent permanently.
    pub fn force_close(&self) {
        self.inner.token.cancel();
        let mut st = self.inner.state.lock();
        if st.conn.take().is_some() {
            debug!(origin = %self.inner.origin, "idle connection discarded on close");
        }
        st.closed = true;
        // An in-flight drain task observes the cancelled token and flips
        // the busy flag itself.
    }

    /// Execute one request.
    ///
    /// Fails fast with [`FetchError::AgentBusy`] while a request is in
    /// flight, and with [`FetchError::OriginMismatch`] before any bytes
    /// are written when the URL's origin differs from the agent's.
    /// On success the response head is available immediately; the body
    /// streams lazily while the agent stays busy.
    pub async fn send(&self, request: Request) -> FetchResult<Response> {
        self.inner.try_acquire()?;
        match self.send_inner(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                // Whatever happened, the socket tied to this attempt is
                // gone; just flip back to idle.
                self.inner.release(None);
                Err(e)
            }
        }
    }

    async fn send_inner(&self, request: Request) -> FetchResult<Response> {
        let inner = &self.inner;
        let request_origin = Origin::from_url(&request.url)?;
        if request_origin != inner.origin {
            return Err(FetchError::OriginMismatch {
                expected: inner.origin.to_string(),
                requested: request_origin.to_string(),
            });
        }

        // Request-scoped token: fires when the caller's token fires, when
        // the agent is force-closed, or (via the guard) never outlives the
        // request.
        let token = inner.token.child_token();
        if let Some(caller) = request.cancel.clone() {
            let local = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => local.cancel(),
                    _ = local.cancelled() => {}
                }
            });
        }
        let guard = token.clone().drop_guard();

        let pooled = inner.state.lock().conn.take();
        let mut conn = match pooled {
            Some(conn) => {
                debug!(origin = %inner.origin, "reusing open connection");
                conn
            }
            None => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(FetchError::Aborted),
                    conn = Conn::connect(&inner.origin, inner.connect_timeout) => conn?,
                }
            }
        };

        let url = request.url;
        let method = request.method;
        let encoded = encode_request(&method, &url, &request.headers, request.body, &inner.origin)?;

        let write = async {
            conn.write_all(&encoded.head).await?;
            write_body(&mut conn, encoded.body).await?;
            conn.flush().await
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Aborted),
            result = write => result?,
        }

        let mut head = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Aborted),
            result = read_head(&mut conn) => result?,
        };

        // Reuse is decided from the head as parsed, before the framing
        // decision strips headers from bodiless responses.
        let reusable = is_reusable(&head) && !token.is_cancelled();
        let framing = body_framing(&method, &mut head)?;
        let coding = ContentCoding::from_headers(&head.headers);
        let content_type = head.headers.get("content-type").map(str::to_string);

        let body = match framing {
            BodyFraming::Empty => {
                inner.release(if reusable { Some(conn) } else { None });
                ResponseBody::empty(content_type)
            }
            framing => {
                let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
                tokio::spawn(drain_body(
                    conn,
                    framing,
                    Decompressor::new(coding),
                    tx,
                    token,
                    guard,
                    Arc::clone(&self.inner),
                    reusable,
                ));
                ResponseBody::new(rx, content_type)
            }
        };

        Ok(Response::new(
            head.version,
            head.status,
            head.status_text,
            head.headers,
            url,
            body,
        ))
    }
}

enum Framer {
    Chunked(ChunkedDecoder),
    Length { remaining: u64 },
    UntilClose,
}

impl Framer {
    fn new(framing: BodyFraming) -> Self {
        match framing {
            BodyFraming::Chunked => Framer::Chunked(ChunkedDecoder::new()),
            BodyFraming::Length(remaining) => Framer::Length { remaining },
            // Empty never reaches the drain task.
            BodyFraming::Empty | BodyFraming::UntilClose => Framer::UntilClose,
        }
    }

    async fn next(&mut self, conn: &mut Conn) -> FetchResult<Option<Bytes>> {
        match self {
            Framer::Chunked(decoder) => decoder.next_chunk(conn).await,
            Framer::Length { remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let max = usize::try_from(*remaining).unwrap_or(usize::MAX);
                match conn.read_data(max).await? {
                    None => Err(FetchError::UnexpectedEof("eof inside sized body".into())),
                    Some(data) => {
                        *remaining -= data.len() as u64;
                        Ok(Some(data))
                    }
                }
            }
            Framer::UntilClose => Ok(conn.read_data(64 * 1024).await?),
        }
    }
}

enum BodyEnd {
    Complete,
    Cancelled,
    Abandoned,
    Failed,
}

/// Forward one item to the consumer without outliving a cancellation:
/// a full channel must not stall teardown.
async fn forward(
    tx: &mpsc::Sender<FetchResult<Bytes>>,
    token: &CancellationToken,
    item: FetchResult<Bytes>,
) -> Result<(), BodyEnd> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(BodyEnd::Cancelled),
        sent = tx.send(item) => sent.map_err(|_| BodyEnd::Abandoned),
    }
}

/// Drain the response body, forwarding decoded chunks to the consumer, and
/// release the agent exactly once on whichever end condition fires first:
/// decoder completion, cancellation, consumer gone, or a framing error.
#[allow(clippy::too_many_arguments)]
async fn drain_body(
    mut conn: Conn,
    framing: BodyFraming,
    mut decoder: Decompressor,
    tx: mpsc::Sender<FetchResult<Bytes>>,
    token: CancellationToken,
    _guard: DropGuard,
    inner: Arc<AgentInner>,
    reusable: bool,
) {
    let mut framer = Framer::new(framing);
    let end = loop {
        let step = tokio::select! {
            biased;
            _ = token.cancelled() => break BodyEnd::Cancelled,
            _ = tx.closed() => break BodyEnd::Abandoned,
            step = framer.next(&mut conn) => step,
        };
        match step {
            Ok(Some(raw)) => match decoder.push(raw) {
                Ok(decoded) => {
                    if !decoded.is_empty() {
                        if let Err(end) = forward(&tx, &token, Ok(decoded)).await {
                            break end;
                        }
                    }
                }
                Err(e) => {
                    let _ = forward(&tx, &token, Err(e)).await;
                    break BodyEnd::Failed;
                }
            },
            Ok(None) => match decoder.finish() {
                Ok(tail) => {
                    if !tail.is_empty() {
                        if let Err(end) = forward(&tx, &token, Ok(tail)).await {
                            break end;
                        }
                    }
                    break BodyEnd::Complete;
                }
                Err(e) => {
                    let _ = forward(&tx, &token, Err(e)).await;
                    break BodyEnd::Failed;
                }
            },
            Err(e) => {
                let _ = forward(&tx, &token, Err(e)).await;
                break BodyEnd::Failed;
            }
        }
    };

    match end {
        BodyEnd::Complete if reusable => {
            debug!(origin = %inner.origin, "response drained, connection kept for reuse");
            inner.release(Some(conn));
        }
        BodyEnd::Complete => {
            debug!(origin = %inner.origin, "response drained, connection not reusable");
            inner.release(None);
        }
        BodyEnd::Cancelled => {
            let _ = tx.try_send(Err(FetchError::Aborted));
            debug!(origin = %inner.origin, "request cancelled mid-body, connection closed");
            inner.release(None);
        }
        BodyEnd::Abandoned => {
            warn!(origin = %inner.origin, "response dropped unconsumed, connection closed");
            inner.release(None);
        }
        BodyEnd::Failed => {
            inner.release(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn origin(url: &str) -> Origin {
        Origin::from_url(&Url::parse(url).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn new_agent_is_idle() {
        let agent = Agent::new(origin("http://example.com/"), None);
        assert!(agent.is_idle());
        assert_eq!(agent.hostname(), "example.com");
        assert_eq!(agent.port(), 80);
        // Resolves immediately while idle.
        agent.when_idle().await;
    }

    #[tokio::test]
    async fn cross_origin_send_is_rejected() {
        let agent = Agent::new(origin("http://example.com/"), None);
        let request = Request::get("http://other.example/").build().unwrap();
        assert!(matches!(
            agent.send(request).await,
            Err(FetchError::OriginMismatch { .. })
        ));
        assert!(agent.is_idle());
    }

    #[tokio::test]
    async fn closed_agent_rejects_sends() {
        let agent = Agent::new(origin("http://example.com/"), None);
        agent.force_close();
        assert!(agent.is_closed());
        let request = Request::get("http://example.com/").build().unwrap();
        assert!(matches!(
            agent.send(request).await,
            Err(FetchError::ConnectionFailed(_))
        ));
    }
}
