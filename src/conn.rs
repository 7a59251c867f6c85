//! Buffered TCP/TLS connection.
//!
//! One `Conn` backs one agent. Reads accumulate into a byte buffer so line
//! and body framing can be parsed incrementally; the buffer survives across
//! requests on a reused connection.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{FetchError, FetchResult};
use crate::origin::Origin;

/// A plaintext or TLS client stream.
pub(crate) enum MaybeTls {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTls {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTls::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTls {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTls::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTls::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTls::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

fn tls_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

/// A buffered connection to one origin.
///
/// Generic over the stream so unit tests can drive the reader with an
/// in-memory duplex; agents always use [`MaybeTls`].
pub(crate) struct Conn<S = MaybeTls> {
    stream: S,
    buf: BytesMut,
}

impl Conn<MaybeTls> {
    /// Open a TCP connection to `origin`, wrapping it in TLS for secure
    /// origins, subject to the optional connect timeout.
    pub(crate) async fn connect(origin: &Origin, timeout: Option<Duration>) -> FetchResult<Self> {
        let connect = Self::connect_inner(origin);
        let stream = match timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                FetchError::ConnectionFailed(format!("connect to {origin} timed out"))
            })??,
            None => connect.await?,
        };
        debug!(%origin, "connection established");
        Ok(Conn::from_stream(stream))
    }

    async fn connect_inner(origin: &Origin) -> FetchResult<MaybeTls> {
        let tcp = TcpStream::connect((origin.host.as_str(), origin.port))
            .await
            .map_err(|e| FetchError::ConnectionFailed(format!("connect to {origin}: {e}")))?;
        if !origin.is_secure() {
            return Ok(MaybeTls::Plain(tcp));
        }
        let server_name = ServerName::try_from(origin.host.clone())
            .map_err(|e| FetchError::ConnectionFailed(format!("invalid server name: {e}")))?;
        let tls = TlsConnector::from(tls_config())
            .connect(server_name, tcp)
            .await
            .map_err(|e| FetchError::ConnectionFailed(format!("tls handshake with {origin}: {e}")))?;
        Ok(MaybeTls::Tls(Box::new(tls)))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Conn<S> {
    /// Wrap an already-connected stream.
    pub(crate) fn from_stream(stream: S) -> Self {
        Conn {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Read one line, terminated by LF with an optional preceding CR.
    ///
    /// EOF at a line boundary is [`FetchError::ConnectionClosed`]; EOF with
    /// a partial line buffered is [`FetchError::UnexpectedEof`].
    pub(crate) async fn read_line(&mut self) -> FetchResult<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return String::from_utf8(line.to_vec())
                    .map_err(|_| FetchError::MalformedResponse("non-utf8 header data".into()));
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(if self.buf.is_empty() {
                    FetchError::ConnectionClosed
                } else {
                    FetchError::UnexpectedEof("eof inside line".into())
                });
            }
        }
    }

    /// Read up to `max` body bytes, returning `None` on a clean EOF.
    pub(crate) async fn read_data(&mut self, max: usize) -> FetchResult<Option<Bytes>> {
        if self.buf.is_empty() {
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
        }
        let take = self.buf.len().min(max.max(1));
        Ok(Some(self.buf.split_to(take).freeze()))
    }

    /// Write all of `data` to the stream.
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> FetchResult<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// Flush buffered writes.
    pub(crate) async fn flush(&mut self) -> FetchResult<()> {
        self.stream.flush().await?;
        Ok(())
    }
}
