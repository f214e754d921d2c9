use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crosspost_core::cms::{CmsPoster, PostError, PostOutcome, PostPayload};
use crosspost_core::config::Credentials;

/// Answers one request with `status` and `body`, handing the raw request back.
async fn respond_once(
    status: &'static str,
    content_type: &'static str,
    body: &'static str,
    delay: Duration,
) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let read = socket.read(&mut buf).await.unwrap();
            if read == 0 {
                break;
            }
            request.extend_from_slice(&buf[..read]);
            if request_complete(&request) {
                break;
            }
        }
        let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
        tokio::time::sleep(delay).await;
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.flush().await;
    });
    (format!("http://{addr}/wp-json/wp/v2/posts"), rx)
}

fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some(split) = text.find("\r\n\r\n") else {
        return false;
    };
    let length = text[..split]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    request.len() >= split + 4 + length
}

fn payload() -> PostPayload {
    PostPayload {
        title: "Weekly roundup".into(),
        content: "<p>Hello</p>".into(),
        status: "draft".into(),
        excerpt: None,
    }
}

fn credentials() -> Credentials {
    Credentials::new("editor", "app-password")
}

#[tokio::test]
async fn created_post_is_published() {
    let (endpoint, request) = respond_once(
        "201 Created",
        "application/json",
        r#"{"id":42,"link":"https://blog.example.com/?p=42","status":"draft"}"#,
        Duration::ZERO,
    )
    .await;
    let poster = CmsPoster::new(Duration::from_secs(5)).unwrap();

    let outcome = poster.post(&endpoint, &credentials(), &payload()).await.unwrap();
    assert_eq!(
        outcome,
        PostOutcome::Published {
            id: 42,
            link: "https://blog.example.com/?p=42".into()
        }
    );

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /wp-json/wp/v2/posts"));
    let lowered = request.to_ascii_lowercase();
    assert!(lowered.contains("authorization: basic "));
    assert!(lowered.contains("content-type: application/json"));
    assert!(request.contains(r#""title":"Weekly roundup""#));
}

#[tokio::test]
async fn success_without_json_is_ambiguous() {
    let (endpoint, _request) = respond_once(
        "200 OK",
        "text/html",
        "<html>Saved</html>",
        Duration::ZERO,
    )
    .await;
    let poster = CmsPoster::new(Duration::from_secs(5)).unwrap();

    let outcome = poster.post(&endpoint, &credentials(), &payload()).await.unwrap();
    assert_eq!(
        outcome,
        PostOutcome::AmbiguousSuccess {
            status: 200,
            body: "<html>Saved</html>".into()
        }
    );
}

#[tokio::test]
async fn rejected_credentials_surface_status_and_body() {
    let (endpoint, _request) = respond_once(
        "401 Unauthorized",
        "application/json",
        r#"{"code":"rest_not_logged_in"}"#,
        Duration::ZERO,
    )
    .await;
    let poster = CmsPoster::new(Duration::from_secs(5)).unwrap();

    let err = poster
        .post(&endpoint, &credentials(), &payload())
        .await
        .unwrap_err();
    match err {
        PostError::HttpStatus { code, body } => {
            assert_eq!(code, 401);
            assert!(body.contains("rest_not_logged_in"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn slow_server_times_out() {
    let (endpoint, _request) = respond_once(
        "201 Created",
        "application/json",
        r#"{"id":1,"link":"x"}"#,
        Duration::from_secs(5),
    )
    .await;
    let poster = CmsPoster::new(Duration::from_millis(200)).unwrap();

    let err = poster
        .post(&endpoint, &credentials(), &payload())
        .await
        .unwrap_err();
    assert!(matches!(err, PostError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let poster = CmsPoster::new(Duration::from_secs(2)).unwrap();

    let err = poster
        .post(&format!("http://{addr}/posts"), &credentials(), &payload())
        .await
        .unwrap_err();
    assert!(matches!(err, PostError::Network(_)), "got {err:?}");
}
