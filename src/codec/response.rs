//! Response head parsing and body framing decisions.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::conn::Conn;
use crate::error::{FetchError, FetchResult};
use crate::headers::Headers;

/// Parsed status line and header block.
#[derive(Debug, Clone)]
pub(crate) struct ResponseHead {
    pub(crate) version: String,
    pub(crate) status: u16,
    pub(crate) status_text: String,
    pub(crate) headers: Headers,
}

/// How the response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// No body follows the head.
    Empty,
    /// Chunked transfer coding.
    Chunked,
    /// Exactly this many bytes follow.
    Length(u64),
    /// Body runs until the peer closes the connection.
    UntilClose,
}

/// Read and parse a response head from the connection.
///
/// EOF before the status line surfaces as [`FetchError::ConnectionClosed`];
/// EOF inside the header block as [`FetchError::UnexpectedEof`].
pub(crate) async fn read_head<S>(conn: &mut Conn<S>) -> FetchResult<ResponseHead>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let status_line = conn.read_line().await?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FetchError::MalformedResponse("empty status line".into()))?
        .to_string();
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| {
            FetchError::MalformedResponse(format!("invalid status line {status_line:?}"))
        })?;
    let status_text = parts.next().unwrap_or("").to_string();

    let mut headers = Headers::new();
    loop {
        let line = conn.read_line().await.map_err(|e| match e {
            FetchError::ConnectionClosed => {
                FetchError::UnexpectedEof("eof inside header block".into())
            }
            other => other,
        })?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            FetchError::MalformedResponse(format!("header line without colon {line:?}"))
        })?;
        headers.append(name.trim().to_ascii_lowercase(), value.trim());
    }

    Ok(ResponseHead {
        version,
        status,
        status_text,
        headers,
    })
}

/// Connection-reuse rule, applied to the head as parsed (before any
/// framing headers are stripped): the response boundary is unambiguous iff
/// the head carries a `content-length` or a chunked `transfer-encoding`.
pub(crate) fn is_reusable(head: &ResponseHead) -> bool {
    head.headers.contains("content-length")
        || head.headers.contains_token("transfer-encoding", "chunked")
}

/// Decide body framing for a response to `method`.
///
/// HEAD responses and 1xx/204/304 statuses have no body; their framing
/// headers are stripped from the parsed head.
pub(crate) fn body_framing(method: &str, head: &mut ResponseHead) -> FetchResult<BodyFraming> {
    let status = head.status;
    if method.eq_ignore_ascii_case("HEAD") || (100..200).contains(&status) || status == 204 || status == 304
    {
        head.headers.remove("content-length");
        head.headers.remove("transfer-encoding");
        head.headers.remove("content-encoding");
        return Ok(BodyFraming::Empty);
    }
    if head.headers.contains_token("transfer-encoding", "chunked") {
        return Ok(BodyFraming::Chunked);
    }
    if let Some(raw) = head.headers.get("content-length") {
        let length = raw.trim().parse::<u64>().map_err(|_| {
            FetchError::MalformedResponse(format!("invalid content-length {raw:?}"))
        })?;
        return Ok(BodyFraming::Length(length));
    }
    Ok(BodyFraming::UntilClose)
}
