//! Server behaviour over raw sockets.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use rawhttp::{Request, Response, ServerConfig, Status};

mod common;

#[tokio::test]
async fn echoes_request_over_the_wire() {
    let mut server = common::start_echo_server().await;

    let mut stream = common::raw_connection(
        server.local_addr(),
        b"POST / HTTP/1.1\nx: A\ncontent-length: 2\n\nhi",
    )
    .await;

    let expected = "HTTP/1.1 200 OK\nx: A\ncontent-length: 2\n\nhi";
    assert_eq!(common::read_exact_string(&mut stream, expected.len()).await, expected);
    server.close().await;
}

#[tokio::test]
async fn serves_several_requests_on_one_connection() {
    let mut server = common::start_echo_server().await;
    let mut stream = common::raw_connection(server.local_addr(), b"GET /a HTTP/1.1\r\n\r\n").await;

    let expected = "HTTP/1.1 200 OK\n\n";
    assert_eq!(common::read_exact_string(&mut stream, expected.len()).await, expected);

    stream.write_all(b"GET /b HTTP/1.1\n\n").await.unwrap();
    assert_eq!(common::read_exact_string(&mut stream, expected.len()).await, expected);

    assert_eq!(server.connections_established(), 1);
    server.close().await;
}

#[tokio::test]
async fn malformed_request_gets_400_then_close() {
    let mut server = common::start_echo_server().await;
    let mut stream = common::raw_connection(server.local_addr(), b"XXXX\n").await;

    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(1), stream.read_to_string(&mut reply))
        .await
        .unwrap()
        .unwrap();

    assert!(reply.starts_with("HTTP/1.1 400 Bad Request\n"), "{reply:?}");
    server.close().await;
}

#[tokio::test]
async fn malformed_request_keeps_connection_when_configured() {
    let config = ServerConfig {
        close_on_malformed: false,
        ..common::server_config()
    };
    let mut server = common::start_server(config, common::echo).await;
    let mut stream = common::raw_connection(server.local_addr(), b"GET / HTTP/1.0\n").await;

    let mut reply = Vec::new();
    let mut buf = [0u8; 256];
    while !String::from_utf8_lossy(&reply).ends_with("only HTTP/1.1 is supported") {
        let n = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed early");
        reply.extend_from_slice(&buf[..n]);
    }
    assert!(String::from_utf8_lossy(&reply).starts_with("HTTP/1.1 400 Bad Request\n"));

    stream.write_all(b"GET / HTTP/1.1\n\n").await.unwrap();
    let expected = "HTTP/1.1 200 OK\n\n";
    assert_eq!(common::read_exact_string(&mut stream, expected.len()).await, expected);
    server.close().await;
}

#[tokio::test]
async fn peer_close_ends_connection_without_response() {
    let mut server = common::start_echo_server().await;
    let mut stream = common::raw_connection(server.local_addr(), b"").await;
    stream.shutdown().await.unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());
    assert!(common::eventually(|| server.open_connections() == 0).await);
    server.close().await;
}

#[tokio::test]
async fn idle_connections_are_closed() {
    let config = ServerConfig {
        keep_alive_timeout_ms: 100,
        keep_alive_check_interval_ms: 20,
        ..common::server_config()
    };
    let mut server = common::start_server(config, common::echo).await;
    let mut stream = common::raw_connection(server.local_addr(), b"GET / HTTP/1.1\n\n").await;
    let expected = "HTTP/1.1 200 OK\n\n";
    assert_eq!(common::read_exact_string(&mut stream, expected.len()).await, expected);

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(common::eventually(|| server.open_connections() == 0).await);
    server.close().await;
}

#[tokio::test]
async fn worker_limit_defers_extra_connections() {
    let config = ServerConfig {
        max_worker_tasks: 1,
        ..common::server_config()
    };
    let mut server = common::start_server(config, common::echo).await;
    let expected = "HTTP/1.1 200 OK\n\n";

    let mut first = common::raw_connection(server.local_addr(), b"GET / HTTP/1.1\n\n").await;
    assert_eq!(common::read_exact_string(&mut first, expected.len()).await, expected);

    let mut second = common::raw_connection(server.local_addr(), b"GET / HTTP/1.1\n\n").await;
    let mut buf = [0u8; 1];
    assert!(tokio::time::timeout(Duration::from_millis(200), second.read(&mut buf))
        .await
        .is_err());

    drop(first);
    assert_eq!(common::read_exact_string(&mut second, expected.len()).await, expected);
    assert_eq!(server.connections_established(), 2);
    server.close().await;
}

#[tokio::test]
async fn close_waits_for_in_flight_handler() {
    let mut server =
        common::start_slow_server(common::server_config(), Duration::from_millis(200)).await;
    let mut stream = common::raw_connection(server.local_addr(), b"GET / HTTP/1.1\n\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.close().await;

    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();
    assert_eq!(reply, "HTTP/1.1 200 OK\ncontent-length: 0\n\n");
}

#[tokio::test]
async fn handler_sees_parsed_request() {
    let mut server = common::start_server(common::server_config(), |request: Request| async move {
        let body = format!(
            "{} {} {}",
            request.method(),
            request.path(),
            request.headers().get("accept").join("|")
        );
        Response::new(Status::Ok).with_body(body, "text/plain")
    })
    .await;

    let mut stream = common::raw_connection(
        server.local_addr(),
        b"GET /books?id=1 HTTP/1.1\nAccept: a, b\nACCEPT: c\nconnection: close\n\n",
    )
    .await;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();

    assert!(reply.ends_with("\n\nGET /books?id=1 a|b|c"), "{reply:?}");
    server.close().await;
}
