//! Chunked transfer coding (RFC 7230 §4.1).

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::conn::Conn;
use crate::error::{FetchError, FetchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data { remaining: u64 },
    AfterChunk,
    Trailer,
    Done,
}

/// Incremental chunked-body decoder driven against a [`Conn`].
///
/// Size lines must be pure hex after trimming; chunk extensions are
/// rejected. Trailers are read and discarded. Line endings are lenient
/// (CRLF or bare LF).
pub(crate) struct ChunkedDecoder {
    state: State,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> Self {
        ChunkedDecoder { state: State::Size }
    }

    /// Next slice of decoded body data, or `None` once the terminal chunk
    /// and trailers have been consumed.
    pub(crate) async fn next_chunk<S>(&mut self, conn: &mut Conn<S>) -> FetchResult<Option<Bytes>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match self.state {
                State::Size => {
                    let line = read_framing_line(conn).await?;
                    let size_str = line.trim();
                    if size_str.is_empty() || !size_str.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return Err(FetchError::MalformedChunk(format!(
                            "invalid chunk size line {size_str:?}"
                        )));
                    }
                    let size = u64::from_str_radix(size_str, 16).map_err(|_| {
                        FetchError::MalformedChunk(format!("chunk size {size_str:?} overflows"))
                    })?;
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data { remaining: size }
                    };
                }
                State::Data { remaining } => {
                    let max = usize::try_from(remaining).unwrap_or(usize::MAX);
                    let data = conn
                        .read_data(max)
                        .await?
                        .ok_or_else(|| FetchError::UnexpectedEof("eof inside chunk data".into()))?;
                    let left = remaining - data.len() as u64;
                    self.state = if left == 0 {
                        State::AfterChunk
                    } else {
                        State::Data { remaining: left }
                    };
                    return Ok(Some(data));
                }
                State::AfterChunk => {
                    let line = read_framing_line(conn).await?;
                    if !line.is_empty() {
                        return Err(FetchError::MalformedChunk(format!(
                            "expected crlf after chunk data, got {line:?}"
                        )));
                    }
                    self.state = State::Size;
                }
                State::Trailer => {
                    loop {
                        let line = read_framing_line(conn).await?;
                        if line.is_empty() {
                            break;
                        }
                    }
                    self.state = State::Done;
                    return Ok(None);
                }
                State::Done => return Ok(None),
            }
        }
    }

    /// True once the terminal chunk has been consumed.
    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }
}

async fn read_framing_line<S>(conn: &mut Conn<S>) -> FetchResult<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.read_line().await.map_err(|e| match e {
        // Inside a chunked body a closed connection is always premature.
        FetchError::ConnectionClosed => FetchError::UnexpectedEof("eof inside chunked body".into()),
        other => other,
    })
}

/// Append one chunk frame to `out`. Empty input is skipped; encoding it
/// would emit the zero-sized terminal chunk.
pub(crate) fn encode_chunk(data: &[u8], out: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Append the terminal chunk frame to `out`.
pub(crate) fn encode_final(out: &mut BytesMut) {
    out.extend_from_slice(b"0\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    async fn decode_all(wire: &[u8]) -> FetchResult<Vec<u8>> {
        let (client, mut server) = duplex(64);
        let wire = wire.to_vec();
        let writer = tokio::spawn(async move {
            // The reader may drop mid-write on decode errors.
            let _ = server.write_all(&wire).await;
        });
        let mut conn = Conn::from_stream(client);
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        while let Some(chunk) = decoder.next_chunk(&mut conn).await? {
            out.extend_from_slice(&chunk);
        }
        writer.await.unwrap();
        assert!(decoder.is_done());
        Ok(out)
    }

    #[tokio::test]
    async fn decodes_multiple_chunks() {
        let body = decode_all(b"6\r\nchunk1\r\n6\r\nchunk2\r\n6\r\nchunk3\r\n0\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(body, b"chunk1chunk2chunk3");
    }

    #[tokio::test]
    async fn accepts_bare_lf_framing() {
        let body = decode_all(b"5\nhello\n0\n\n").await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn discards_trailers() {
        let body = decode_all(b"2\r\nhi\r\n0\r\nx-trailer: 1\r\nx-other: 2\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(body, b"hi");
    }

    #[tokio::test]
    async fn rejects_chunk_extensions() {
        let err = decode_all(b"5;ext=1\r\nhello\r\n0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedChunk(_)));
    }

    #[tokio::test]
    async fn rejects_missing_chunk_terminator() {
        let err = decode_all(b"5\r\nhelloXX\r\n0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedChunk(_)));
    }

    #[tokio::test]
    async fn eof_mid_body_is_unexpected() {
        let err = decode_all(b"ff\r\nshort").await.unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedEof(_)));
    }

    #[tokio::test]
    async fn encode_then_decode_is_identity() {
        let chunks: [&[u8]; 4] = [b"alpha", b"", b"beta-gamma", b"z"];
        let mut wire = BytesMut::new();
        for chunk in chunks {
            encode_chunk(chunk, &mut wire);
        }
        encode_final(&mut wire);
        let body = decode_all(&wire).await.unwrap();
        assert_eq!(body, b"alphabeta-gammaz");
    }

    #[test]
    fn empty_chunks_are_skipped_on_encode() {
        let mut out = BytesMut::new();
        encode_chunk(b"", &mut out);
        assert!(out.is_empty());
        encode_final(&mut out);
        assert_eq!(&out[..], b"0\r\n\r\n");
    }
}
