//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use rawhttp::{ClientConfig, Handler, Request, Response, Server, ServerConfig, Status};

/// Server settings on an ephemeral port with short timers.
pub fn server_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".into(),
        max_worker_tasks: 16,
        keep_alive_timeout_ms: 5_000,
        keep_alive_check_interval_ms: 50,
        shutdown_timeout_ms: 1_000,
        ..ServerConfig::default()
    }
}

/// Client settings generous enough for slow test handlers.
pub fn client_config() -> ClientConfig {
    ClientConfig {
        keep_alive_timeout_ms: 5_000,
        keep_alive_check_interval_ms: 50,
        read_timeout_ms: 2_000,
        admission_timeout_ms: 2_000,
        ..ClientConfig::default()
    }
}

pub fn url(server: &Server) -> String {
    format!("http://{}", server.local_addr())
}

/// Reply with the request's headers and body.
pub async fn echo(request: Request) -> Response {
    let (_, _, headers, body) = request.into_parts();
    Response::from_parts(Status::Ok, headers, body)
}

pub async fn start_server<H: Handler>(config: ServerConfig, handler: H) -> Server {
    Server::bind(config, handler).await.unwrap()
}

pub async fn start_echo_server() -> Server {
    start_server(server_config(), echo).await
}

/// Server whose handler sleeps before answering 200.
pub async fn start_slow_server(config: ServerConfig, delay: Duration) -> Server {
    start_server(config, move |_request: Request| async move {
        tokio::time::sleep(delay).await;
        Response::new(Status::Ok)
    })
    .await
}

/// Accepts connections, reads whatever arrives, never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
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

/// A listening socket that never accepts, with its backlog filled so the
/// next connect attempt hangs. Keep the returned values alive for the test.
pub async fn start_unresponsive_listener() -> (SocketAddr, TcpListener, Vec<TcpStream>) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut filler = Vec::new();
    for _ in 0..64 {
        match tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => filler.push(stream),
            _ => break,
        }
    }
    (addr, listener, filler)
}

/// Write raw bytes on a fresh connection.
pub async fn raw_connection(addr: SocketAddr, bytes: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream
}

/// Read exactly `len` bytes within a second.
pub async fn read_exact_string(stream: &mut TcpStream, len: usize) -> String {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(1), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8(buf).unwrap()
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
