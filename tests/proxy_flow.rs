//! End-to-end selection and buffered forwarding through a running proxy.

use nomad_proxy::config::ProxyConfig;
use nomad_proxy::session::cookies::encode_value;

mod common;

use common::{get, send_raw};

fn session_cookie(target: &str) -> String {
    format!("ProxyTarget={}", encode_value(target))
}

#[tokio::test]
async fn post_selection_redirects_then_forwards() {
    let (backend, mut requests) = common::start_text_backend("frame-data").await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let target = format!("http://{}/base", backend);

    let body = format!("target={}", encode_value(&target));
    let post = format!(
        "POST / HTTP/1.1\r\nHost: proxy\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send_raw(proxy.addr, post.as_bytes()).await;

    assert_eq!(response.status, 303);
    assert_eq!(response.header("Location"), Some("/"));
    let cookies = response.set_cookies();
    assert_eq!(cookies.len(), 2);
    assert!(cookies[0].starts_with("ProxyTarget="));
    assert!(cookies[1].starts_with("LastTarget="));

    let response = get(proxy.addr, "/snapshot.jpg?size=large", Some(&session_cookie(&target))).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "frame-data");
    assert_eq!(response.header("Content-Length"), Some("10"));
    assert_eq!(response.header("Connection"), Some("close"));
    assert_eq!(response.header("X-Camera"), Some("lobby"));
    assert!(!response.head.contains("keep-alive"));
    assert!(response.set_cookies().is_empty());

    let request_line = requests.recv().await.unwrap();
    assert_eq!(request_line, "GET /base/snapshot.jpg?size=large HTTP/1.1");
}

#[tokio::test]
async fn query_selection_forwards_to_target_path() {
    let (backend, mut requests) = common::start_text_backend("ok").await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let target = format!("http://{}/cam?res=hd", backend);

    let path = format!("/ignored?target={}&fps=2", encode_value(&target));
    let response = get(proxy.addr, &path, None).await;

    assert_eq!(response.status, 200);
    let cookies = response.set_cookies();
    assert_eq!(cookies.len(), 2);
    assert!(cookies[0].starts_with(&format!("ProxyTarget={};", encode_value(&target))));
    assert!(cookies[1].starts_with(&format!("LastTarget={};", encode_value(&target))));

    let request_line = requests.recv().await.unwrap();
    assert_eq!(request_line, "GET /cam?res=hd&fps=2 HTTP/1.1");
}

#[tokio::test]
async fn upstream_status_is_relayed() {
    let (backend, _requests) = common::start_mock_backend(
        b"HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\n\r\nmissing".to_vec(),
    )
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let cookie = session_cookie(&format!("http://{}", backend));
    let response = get(proxy.addr, "/nope", Some(&cookie)).await;

    assert_eq!(response.status, 404);
    assert_eq!(response.body_text(), "missing");
}

#[tokio::test]
async fn custom_reason_phrase_is_relayed() {
    let (backend, _requests) = common::start_mock_backend(
        b"HTTP/1.1 599 Camera Busy\r\nContent-Length: 4\r\n\r\nbusy".to_vec(),
    )
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let cookie = session_cookie(&format!("http://{}", backend));
    let response = get(proxy.addr, "/", Some(&cookie)).await;

    assert_eq!(response.status, 599);
    assert!(response.head.starts_with("HTTP/1.1 599 Camera Busy\r\n"));
    assert_eq!(response.body_text(), "busy");
}

#[tokio::test]
async fn chunked_upstream_gets_content_length() {
    let (backend, _requests) = common::start_mock_backend(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nX-Camera: porch\r\n\r\n5\r\nhello\r\n0\r\n\r\n"
            .to_vec(),
    )
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let cookie = session_cookie(&format!("http://{}", backend));
    let response = get(proxy.addr, "/snap.jpg", Some(&cookie)).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-length"), Some("5"));
    assert_eq!(response.header("transfer-encoding"), None);
    assert_eq!(response.header("x-camera"), Some("porch"));
    assert_eq!(response.body_text(), "hello");
}

#[tokio::test]
async fn silent_upstream_times_out() {
    let silent = common::start_silent_backend().await;
    let mut config = ProxyConfig::default();
    config.upstream.timeout_secs = 1;
    let proxy = common::start_proxy(config).await;

    let cookie = session_cookie(&format!("http://{}", silent));
    let started = std::time::Instant::now();
    let response = get(proxy.addr, "/snap.jpg", Some(&cookie)).await;

    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(response.status, 502);
    assert!(response.body_text().starts_with("Remote fetch failed:"));
    assert!(response.body_text().contains("did not respond within 1s"));
    let set = response.set_cookies();
    assert_eq!(set.len(), 1);
    assert!(set[0].starts_with("ProxyTarget=deleted;"));
}

#[tokio::test]
async fn unreachable_upstream_clears_target() {
    let dead = common::closed_port().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let target = format!("http://{}", dead);
    let cookies = format!("{}; LastTarget={}", session_cookie(&target), encode_value(&target));

    let response = get(proxy.addr, "/", Some(&cookies)).await;

    assert_eq!(response.status, 502);
    assert!(response.body_text().starts_with("Remote fetch failed:"));
    let set = response.set_cookies();
    assert_eq!(set.len(), 1);
    assert!(set[0].starts_with("ProxyTarget=deleted;"));

    // Browser drops ProxyTarget, keeps LastTarget: the form comes back prefilled.
    let response = get(proxy.addr, "/", Some(&format!("LastTarget={}", encode_value(&target)))).await;
    assert_eq!(response.status, 200);
    assert!(response.body_text().contains(&format!("value=\"{}\"", target)));
}

#[tokio::test]
async fn corrupted_cookie_heals() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let response = get(proxy.addr, "/live", Some("ProxyTarget=not%20a%20url")).await;

    assert_eq!(response.status, 200);
    assert!(response.body_text().contains("<form"));
    let set = response.set_cookies();
    assert_eq!(set.len(), 1);
    assert!(set[0].starts_with("ProxyTarget=deleted;"));
}

#[tokio::test]
async fn reset_keeps_last_target() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let target = "http://10.0.0.5:8080";
    let cookies = format!("{}; LastTarget={}", session_cookie(target), encode_value(target));

    let response = get(proxy.addr, "/reset", Some(&cookies)).await;

    assert_eq!(response.status, 200);
    let set = response.set_cookies();
    assert_eq!(set.len(), 1);
    assert!(set[0].starts_with("ProxyTarget=deleted;"));
    assert!(response.body_text().contains("value=\"http://10.0.0.5:8080\""));
}

#[tokio::test]
async fn invalid_submission_is_rejected() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let body = "target=javascript%3Aalert(1)";
    let post = format!(
        "POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );

    let response = send_raw(proxy.addr, post.as_bytes()).await;

    assert_eq!(response.status, 400);
    assert_eq!(response.body_text(), "Invalid target URL");
    assert!(response.set_cookies().is_empty());
}

#[tokio::test]
async fn protocol_errors() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let response = send_raw(proxy.addr, b"PUT / HTTP/1.1\r\n\r\n").await;
    assert_eq!(response.status, 405);
    assert_eq!(response.header("Allow"), Some("GET, HEAD, POST"));

    let response = send_raw(
        proxy.addr,
        b"POST / HTTP/1.1\r\nContent-Length: 5000\r\n\r\n",
    )
    .await;
    assert_eq!(response.status, 413);

    let response = send_raw(proxy.addr, b"GET / HTTP/1.1 extra\r\n\r\n").await;
    assert_eq!(response.status, 400);

    let huge = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(40 * 1024));
    let response = send_raw(proxy.addr, huge.as_bytes()).await;
    assert_eq!(response.status, 400);
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    assert_eq!(get(proxy.addr, "/", None).await.status, 200);

    proxy.shutdown.trigger();
    tokio::time::timeout(std::time::Duration::from_secs(5), proxy.handle)
        .await
        .unwrap()
        .unwrap();

    assert!(tokio::net::TcpStream::connect(proxy.addr).await.is_err());
}
