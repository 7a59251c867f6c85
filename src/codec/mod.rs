//! HTTP/1.1 wire codec: request serialization, response head parsing,
//! chunked transfer coding, and content coding.

pub(crate) mod chunked;
pub(crate) mod compress;
pub(crate) mod request;
pub(crate) mod response;
