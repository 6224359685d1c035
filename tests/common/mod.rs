//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use nomad_proxy::config::ProxyConfig;
use nomad_proxy::{HttpServer, Listener, Shutdown};

/// Read a request head off a mock backend socket.
async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Start a mock backend answering every request with `response`. Each
/// request line it receives is sent on the returned channel.
pub async fn start_mock_backend(response: Vec<u8>) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let response = response.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let request_line = head.lines().next().unwrap_or_default().to_string();
                let _ = tx.send(request_line);
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// A backend returning `200 OK` with a fixed body and one custom header.
pub async fn start_text_backend(body: &str) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Camera: lobby\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{}",
        body.len(),
        body
    );
    start_mock_backend(response.into_bytes()).await
}

/// A stream backend: multipart head with a bogus `Content-Length`, then
/// `total` body bytes in 1000 byte pieces, then close.
pub async fn start_stream_backend(total: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let head = b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nContent-Length: 5\r\n\r\n";
                if socket.write_all(head).await.is_err() {
                    return;
                }
                let mut sent = 0;
                while sent < total {
                    let n = (total - sent).min(1000);
                    if socket.write_all(&vec![0xAB; n]).await.is_err() {
                        return;
                    }
                    sent += n;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A stream backend that sends `total` bytes, waits for them to leave the
/// socket, then resets the connection instead of closing it.
pub async fn start_resetting_stream_backend(total: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = socket.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await;
                let _ = socket.write_all(&vec![0x5A; total]).await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                #[allow(deprecated)]
                let _ = socket.set_linger(Some(Duration::ZERO));
                drop(socket);
            });
        }
    });

    addr
}

/// A stream backend that never ends: one small frame every 10 ms.
pub async fn start_endless_stream_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                if socket.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.is_err() {
                    return;
                }
                loop {
                    if socket.write_all(b"--frame\r\n").await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            });
        }
    });

    addr
}

/// A backend that accepts and reads the request but never answers. The
/// socket stays open until the proxy gives up on it.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A running proxy on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

pub async fn start_proxy(mut config: ProxyConfig) -> TestProxy {
    config.listener.bind_address = "127.0.0.1:0".into();

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config).unwrap();
    let shutdown = Shutdown::new();

    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            server.run(listener, shutdown).await.unwrap();
        })
    };

    TestProxy {
        addr,
        shutdown,
        handle,
    }
}

/// A response as seen on the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn parse(raw: &[u8]) -> Self {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|p| p + 4)
            .unwrap_or(raw.len());
        let head = String::from_utf8_lossy(&raw[..split]).into_owned();
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or(0);
        Self {
            status,
            head,
            body: raw[split..].to_vec(),
        }
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    pub fn set_cookies(&self) -> Vec<&str> {
        self.head
            .lines()
            .filter_map(|line| line.strip_prefix("Set-Cookie: "))
            .collect()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Send raw bytes and read until the proxy closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    // A reset after the response (request left partly unread) still counts
    // as the end of the response.
    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut buf))
            .await
            .expect("proxy did not close the connection");
        match read {
            Ok(0) | Err(_) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }
    RawResponse::parse(&raw)
}

/// GET `path`, optionally with a `Cookie` header.
pub async fn get(addr: SocketAddr, path: &str, cookie: Option<&str>) -> RawResponse {
    let cookie = cookie
        .map(|c| format!("Cookie: {}\r\n", c))
        .unwrap_or_default();
    let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\n{}\r\n", path, addr, cookie);
    send_raw(addr, request.as_bytes()).await
}
