//! Content-coding support.
//!
//! `gzip` (and its `x-gzip` alias) and `deflate` are decoded transparently
//! on the receive path and applied on the send path when the caller frames
//! a request body with `content-encoding`. `deflate` is the zlib-wrapped
//! format of RFC 7230.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::error::{FetchError, FetchResult};
use crate::headers::Headers;

/// Content coding named by a `content-encoding` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentCoding {
    /// No transformation.
    Identity,
    /// RFC 1952 gzip.
    Gzip,
    /// RFC 1950 zlib ("deflate" in HTTP).
    Deflate,
}

impl ContentCoding {
    /// Detect the coding from the `content-encoding` header values.
    ///
    /// Unknown codings pass through untransformed.
    pub(crate) fn from_headers(headers: &Headers) -> Self {
        if headers.contains_token("content-encoding", "gzip")
            || headers.contains_token("content-encoding", "x-gzip")
        {
            ContentCoding::Gzip
        } else if headers.contains_token("content-encoding", "deflate") {
            ContentCoding::Deflate
        } else {
            ContentCoding::Identity
        }
    }
}

/// Streaming decoder for a framed response body.
pub(crate) struct Decompressor(DecompressorInner);

enum DecompressorInner {
    Identity,
    Gzip(Option<GzDecoder<Vec<u8>>>),
    Deflate(Option<ZlibDecoder<Vec<u8>>>),
}

impl Decompressor {
    pub(crate) fn new(coding: ContentCoding) -> Self {
        Decompressor(match coding {
            ContentCoding::Identity => DecompressorInner::Identity,
            ContentCoding::Gzip => DecompressorInner::Gzip(Some(GzDecoder::new(Vec::new()))),
            ContentCoding::Deflate => {
                DecompressorInner::Deflate(Some(ZlibDecoder::new(Vec::new())))
            }
        })
    }

    /// Feed one framed chunk, returning whatever decoded bytes are ready.
    pub(crate) fn push(&mut self, chunk: Bytes) -> FetchResult<Bytes> {
        match &mut self.0 {
            DecompressorInner::Identity => Ok(chunk),
            DecompressorInner::Gzip(dec) => drain(dec, &chunk),
            DecompressorInner::Deflate(dec) => drain(dec, &chunk),
        }
    }

    /// Signal end of framed input and flush any remaining decoded bytes.
    pub(crate) fn finish(&mut self) -> FetchResult<Bytes> {
        match &mut self.0 {
            DecompressorInner::Identity => Ok(Bytes::new()),
            DecompressorInner::Gzip(dec) => finish(dec),
            DecompressorInner::Deflate(dec) => finish(dec),
        }
    }
}

trait Sink: Write {
    fn buffer(&mut self) -> &mut Vec<u8>;
    fn complete(self) -> std::io::Result<Vec<u8>>;
}

impl Sink for GzDecoder<Vec<u8>> {
    fn buffer(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }
    fn complete(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl Sink for ZlibDecoder<Vec<u8>> {
    fn buffer(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }
    fn complete(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl Sink for GzEncoder<Vec<u8>> {
    fn buffer(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }
    fn complete(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl Sink for ZlibEncoder<Vec<u8>> {
    fn buffer(&mut self) -> &mut Vec<u8> {
        self.get_mut()
    }
    fn complete(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

fn drain<S: Sink>(slot: &mut Option<S>, input: &[u8]) -> FetchResult<Bytes> {
    let sink = slot
        .as_mut()
        .ok_or_else(|| FetchError::Decode("coder already finished".into()))?;
    sink.write_all(input)
        .map_err(|e| FetchError::Decode(format!("invalid compressed data: {e}")))?;
    Ok(Bytes::from(std::mem::take(sink.buffer())))
}

fn finish<S: Sink>(slot: &mut Option<S>) -> FetchResult<Bytes> {
    let sink = slot
        .take()
        .ok_or_else(|| FetchError::Decode("coder already finished".into()))?;
    let out = sink
        .complete()
        .map_err(|e| FetchError::Decode(format!("truncated compressed data: {e}")))?;
    Ok(Bytes::from(out))
}

/// Streaming encoder for a request body with `content-encoding`.
pub(crate) struct Compressor(CompressorInner);

enum CompressorInner {
    Identity,
    Gzip(Option<GzEncoder<Vec<u8>>>),
    Deflate(Option<ZlibEncoder<Vec<u8>>>),
}

impl Compressor {
    pub(crate) fn new(coding: ContentCoding) -> Self {
        Compressor(match coding {
            ContentCoding::Identity => CompressorInner::Identity,
            ContentCoding::Gzip => {
                CompressorInner::Gzip(Some(GzEncoder::new(Vec::new(), Compression::default())))
            }
            ContentCoding::Deflate => {
                CompressorInner::Deflate(Some(ZlibEncoder::new(Vec::new(), Compression::default())))
            }
        })
    }

    /// Feed plaintext, returning whatever encoded bytes are ready.
    pub(crate) fn push(&mut self, chunk: Bytes) -> FetchResult<Bytes> {
        match &mut self.0 {
            CompressorInner::Identity => Ok(chunk),
            CompressorInner::Gzip(enc) => drain(enc, &chunk),
            CompressorInner::Deflate(enc) => drain(enc, &chunk),
        }
    }

    /// Finish the stream, returning the trailing encoded bytes.
    pub(crate) fn finish(&mut self) -> FetchResult<Bytes> {
        match &mut self.0 {
            CompressorInner::Identity => Ok(Bytes::new()),
            CompressorInner::Gzip(enc) => finish(enc),
            CompressorInner::Deflate(enc) => finish(enc),
        }
    }

    /// Encode a complete payload in one pass.
    pub(crate) fn encode_all(coding: ContentCoding, data: &[u8]) -> FetchResult<Bytes> {
        let mut enc = Compressor::new(coding);
        let mut out = Vec::with_capacity(data.len() / 2 + 16);
        out.extend_from_slice(&enc.push(Bytes::copy_from_slice(data))?);
        out.extend_from_slice(&enc.finish()?);
        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(coding: ContentCoding, data: &[u8]) -> Vec<u8> {
        let encoded = Compressor::encode_all(coding, data).unwrap();
        let mut dec = Decompressor::new(coding);
        let mut out = Vec::new();
        // Feed a byte at a time to exercise streaming boundaries.
        for b in encoded.iter() {
            out.extend_from_slice(&dec.push(Bytes::copy_from_slice(&[*b])).unwrap());
        }
        out.extend_from_slice(&dec.finish().unwrap());
        out
    }

    #[test]
    fn gzip_round_trip() {
        let data = b"This is compressed content!";
        assert_eq!(round_trip(ContentCoding::Gzip, data), data);
    }

    #[test]
    fn deflate_round_trip() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(round_trip(ContentCoding::Deflate, &data), data);
    }

    #[test]
    fn identity_passes_through() {
        let mut dec = Decompressor::new(ContentCoding::Identity);
        let out = dec.push(Bytes::from_static(b"plain")).unwrap();
        assert_eq!(&out[..], b"plain");
        assert!(dec.finish().unwrap().is_empty());
    }

    #[test]
    fn detects_coding_from_headers() {
        let gzip: Headers = [("content-encoding", "gzip")].into_iter().collect();
        assert_eq!(ContentCoding::from_headers(&gzip), ContentCoding::Gzip);
        let alias: Headers = [("content-encoding", "x-gzip")].into_iter().collect();
        assert_eq!(ContentCoding::from_headers(&alias), ContentCoding::Gzip);
        let deflate: Headers = [("content-encoding", "deflate")].into_iter().collect();
        assert_eq!(ContentCoding::from_headers(&deflate), ContentCoding::Deflate);
        let none = Headers::new();
        assert_eq!(ContentCoding::from_headers(&none), ContentCoding::Identity);
        let unknown: Headers = [("content-encoding", "br")].into_iter().collect();
        assert_eq!(ContentCoding::from_headers(&unknown), ContentCoding::Identity);
    }

    #[test]
    fn truncated_gzip_fails_on_finish() {
        let encoded = Compressor::encode_all(ContentCoding::Gzip, b"some payload").unwrap();
        let mut dec = Decompressor::new(ContentCoding::Gzip);
        dec.push(encoded.slice(..encoded.len() - 4)).unwrap();
        assert!(matches!(dec.finish(), Err(FetchError::Decode(_))));
    }
}
