//! Request serialization and body framing.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::codec::chunked::{encode_chunk, encode_final};
use crate::codec::compress::{Compressor, ContentCoding};
use crate::conn::Conn;
use crate::error::{FetchError, FetchResult};
use crate::headers::Headers;
use crate::origin::Origin;
use crate::request::{Body, ByteStream};

/// Body payload ready for the wire, produced by [`encode_request`].
pub(crate) enum EncodedBody {
    /// No body bytes follow the head.
    None,
    /// A fully materialized (and possibly compressed) payload.
    Full(Bytes),
    /// A lazy stream written after the head, chunk-encoded unless the
    /// caller framed it with an explicit `content-length`.
    Stream {
        stream: ByteStream,
        coding: ContentCoding,
        chunked: bool,
    },
}

/// Serialized request head plus its body plan.
pub(crate) struct EncodedRequest {
    pub(crate) head: BytesMut,
    pub(crate) body: EncodedBody,
}

/// Serialize the request line and headers, applying the body framing rules:
/// text and buffer bodies get default `content-type`/`content-length`,
/// unsized streams get `transfer-encoding: chunked`, and a caller-supplied
/// `content-encoding` of gzip/deflate compresses before framing.
pub(crate) fn encode_request(
    method: &str,
    url: &Url,
    headers: &Headers,
    body: Option<Body>,
    origin: &Origin,
) -> FetchResult<EncodedRequest> {
    let mut headers = headers.clone();

    if headers.contains("content-length") && headers.contains_token("transfer-encoding", "chunked")
    {
        return Err(FetchError::InvalidRequest(
            "content-length combined with transfer-encoding: chunked".into(),
        ));
    }

    let coding = ContentCoding::from_headers(&headers);

    let encoded_body = match body {
        None => EncodedBody::None,
        Some(Body::Text(text)) => {
            headers.set_if_absent("content-type", "text/plain; charset=UTF-8");
            let payload = Compressor::encode_all(coding, text.as_bytes())?;
            headers.set_if_absent("content-length", payload.len().to_string());
            EncodedBody::Full(payload)
        }
        Some(Body::Bytes(bytes)) => {
            let payload = Compressor::encode_all(coding, &bytes)?;
            headers.set_if_absent("content-length", payload.len().to_string());
            headers.set_if_absent("content-type", "application/octet-stream");
            EncodedBody::Full(payload)
        }
        Some(Body::Stream(stream)) => {
            let sized = headers.contains("content-length")
                || headers.contains("transfer-encoding");
            if !sized {
                headers.append("transfer-encoding", "chunked");
            }
            let chunked = headers.contains_token("transfer-encoding", "chunked");
            EncodedBody::Stream {
                stream,
                coding,
                chunked,
            }
        }
    };

    headers.set_if_absent("host", origin.host_header());
    headers.set_if_absent(
        "date",
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
    );

    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(method.as_bytes());
    head.extend_from_slice(b" ");
    head.extend_from_slice(url.path().as_bytes());
    if let Some(query) = url.query() {
        head.extend_from_slice(b"?");
        head.extend_from_slice(query.as_bytes());
    }
    head.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");

    Ok(EncodedRequest {
        head,
        body: encoded_body,
    })
}

/// Write the encoded body to the connection.
pub(crate) async fn write_body<S>(conn: &mut Conn<S>, body: EncodedBody) -> FetchResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match body {
        EncodedBody::None => Ok(()),
        EncodedBody::Full(payload) => conn.write_all(&payload).await,
        EncodedBody::Stream {
            mut stream,
            coding,
            chunked,
        } => {
            let mut compressor = Compressor::new(coding);
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if chunk.is_empty() {
                    continue;
                }
                let encoded = compressor.push(chunk)?;
                write_piece(conn, &encoded, chunked).await?;
            }
            let tail = compressor.finish()?;
            write_piece(conn, &tail, chunked).await?;
            if chunked {
                let mut terminator = BytesMut::new();
                encode_final(&mut terminator);
                conn.write_all(&terminator).await?;
            }
            Ok(())
        }
    }
}

async fn write_piece<S>(conn: &mut Conn<S>, data: &[u8], chunked: bool) -> FetchResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    if chunked {
        let mut framed = BytesMut::with_capacity(data.len() + 16);
        encode_chunk(data, &mut framed);
        conn.write_all(&framed).await
    } else {
        conn.write_all(data).await
    }
}
