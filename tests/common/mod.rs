//! Scripted HTTP/1.1 server for integration tests.
//!
//! Serves canned responses by path over real localhost sockets, honoring
//! keep-alive, and counts accepted plus concurrently-open connections so
//! tests can observe reuse and pool bounds.

#![allow(dead_code)] // each test binary uses a subset of the routes

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone, Default)]
struct Counters {
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    peak_open: Arc<AtomicUsize>,
}

pub struct TestServer {
    addr: SocketAddr,
    counters: Counters,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let counters = Counters::default();
        let accept_counters = counters.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_counters.accepted.fetch_add(1, Ordering::SeqCst);
                let open = accept_counters.open.fetch_add(1, Ordering::SeqCst) + 1;
                accept_counters.peak_open.fetch_max(open, Ordering::SeqCst);
                let conn_counters = accept_counters.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream).await;
                    conn_counters.open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        TestServer { addr, counters }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Total connections accepted since spawn.
    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn peak_open(&self) -> usize {
        self.counters.peak_open.load(Ordering::SeqCst)
    }
}

struct Req {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Req {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

async fn handle_connection(mut stream: TcpStream) -> std::io::Result<()> {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let Some(req) = read_request(&mut stream, &mut buf).await? else {
            return Ok(());
        };
        if !respond(&mut stream, &req).await? {
            return Ok(());
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<Option<Req>> {
    let head_end = loop {
        if let Some(pos) = find_subslice(buf, b"\r\n\r\n") {
            break pos;
        }
        let mut tmp = [0u8; 4096];
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&tmp[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    buf.drain(..head_end + 4);

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();
    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let req = Req {
        method,
        path,
        headers,
        body: Vec::new(),
    };
    let body = read_request_body(stream, buf, &req).await?;
    Ok(Some(Req { body, ..req }))
}

async fn read_request_body(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    req: &Req,
) -> std::io::Result<Vec<u8>> {
    if let Some(length) = req.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while buf.len() < length {
            let mut tmp = [0u8; 4096];
            let n = stream.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
        }
        let take = length.min(buf.len());
        let body = buf[..take].to_vec();
        buf.drain(..take);
        return Ok(body);
    }

    if req
        .header("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        let mut body = Vec::new();
        loop {
            let line = read_line(stream, buf).await?;
            let size = usize::from_str_radix(line.trim(), 16).unwrap_or(0);
            if size == 0 {
                loop {
                    if read_line(stream, buf).await?.is_empty() {
                        break;
                    }
                }
                return Ok(body);
            }
            while buf.len() < size + 2 {
                let mut tmp = [0u8; 4096];
                let n = stream.read(&mut tmp).await?;
                if n == 0 {
                    return Ok(body);
                }
                buf.extend_from_slice(&tmp[..n]);
            }
            body.extend_from_slice(&buf[..size]);
            buf.drain(..size + 2);
        }
    }

    Ok(Vec::new())
}

async fn read_line(stream: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<String> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = buf.drain(..pos + 1).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(String::from_utf8_lossy(&line).to_string());
        }
        let mut tmp = [0u8; 4096];
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Ok(String::new());
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(format!("HTTP/1.1 {status} {reason}\r\n").as_bytes());
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    stream.write_all(&out).await
}

/// Serve one response; returns false when the connection must close.
async fn respond(stream: &mut TcpStream, req: &Req) -> std::io::Result<bool> {
    let path = req.path.split('?').next().unwrap_or("");

    if req.method == "HEAD" {
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 13\r\n\r\n")
            .await?;
        return Ok(true);
    }

    match path {
        "/text" => {
            write_response(
                stream,
                200,
                "OK",
                &[("content-type", "text/plain")],
                b"Hello, World!",
            )
            .await?;
        }
        "/json" => {
            write_response(
                stream,
                200,
                "OK",
                &[("content-type", "application/json")],
                br#"{"message":"Hello, JSON!"}"#,
            )
            .await?;
        }
        "/redirect" => {
            write_response(
                stream,
                302,
                "Found",
                &[
                    ("location", "/redirected-target"),
                    ("content-type", "text/plain"),
                ],
                b"Redirecting to /redirected-target",
            )
            .await?;
        }
        "/chunked" => {
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\ncontent-type: text/plain\r\n\r\n\
                      6\r\nchunk1\r\n6\r\nchunk2\r\n6\r\nchunk3\r\n0\r\n\r\n",
                )
                .await?;
        }
        "/gzip" => {
            let body = gzip(b"This is compressed content!");
            write_response(
                stream,
                200,
                "OK",
                &[
                    ("content-type", "text/plain"),
                    ("content-encoding", "gzip"),
                ],
                &body,
            )
            .await?;
        }
        "/deflate" => {
            let body = zlib(b"This is compressed content!");
            write_response(
                stream,
                200,
                "OK",
                &[
                    ("content-type", "text/plain"),
                    ("content-encoding", "deflate"),
                ],
                &body,
            )
            .await?;
        }
        "/echo" => {
            let mut headers: Vec<(&str, &str)> = Vec::new();
            let content_type = req.header("content-type").unwrap_or("text/plain");
            headers.push(("content-type", content_type));
            if let Some(encoding) = req.header("content-encoding") {
                headers.push(("content-encoding", encoding));
            }
            let body = req.body.clone();
            write_response(stream, 200, "OK", &headers, &body).await?;
        }
        "/delay" => {
            tokio::time::sleep(Duration::from_millis(250)).await;
            write_response(stream, 200, "OK", &[("content-type", "text/plain")], b"delayed")
                .await?;
        }
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            write_response(stream, 200, "OK", &[("content-type", "text/plain")], b"finally")
                .await?;
        }
        "/drip" => {
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\ncontent-type: text/plain\r\n\r\n")
                .await?;
            for chunk in [&b"drip1"[..], b"drip2", b"drip3"] {
                stream
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await?;
                stream.write_all(chunk).await?;
                stream.write_all(b"\r\n").await?;
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            stream.write_all(b"0\r\n\r\n").await?;
        }
        "/close" => {
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\n\r\nstreamed until close",
                )
                .await?;
            stream.flush().await?;
            return Ok(false);
        }
        "/empty" => {
            stream.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await?;
        }
        "/lf" => {
            stream
                .write_all(b"HTTP/1.1 200 OK\ncontent-type: text/plain\ncontent-length: 2\n\nhi")
                .await?;
        }
        "/form" => {
            write_response(
                stream,
                200,
                "OK",
                &[(
                    "content-type",
                    "application/x-www-form-urlencoded; charset=utf-8",
                )],
                b"a=1&b=two%20words",
            )
            .await?;
        }
        _ => {
            write_response(stream, 404, "Not Found", &[("content-type", "text/plain")], b"")
                .await?;
        }
    }
    Ok(true)
}
