use cwp_backup::contract::AccountSource;
use cwp_backup::error::PanelError;
use cwp_backup::panel::{self, PanelClient, ACCOUNT_ENDPOINT};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accepts one connection, replies with `status` and `body`, and yields the
/// raw request it received.
async fn one_shot_panel(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if request_complete(&raw) {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).into_owned()
    });

    (base_url, handle)
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    raw.len() >= header_end + 4 + content_length
}

fn form_body(raw: &str) -> &str {
    raw.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

#[tokio::test]
async fn list_accounts_posts_list_action_with_key() {
    let (base_url, server) = one_shot_panel(
        "200 OK",
        r#"{"status":"OK","msj":[{"username":"macnated","package_name":"Starter","status":"suspended"},{"username":"alice"}]}"#,
    )
    .await;

    let client = PanelClient::new(&base_url, "v1", "s3cr3t").unwrap();
    let usernames = panel::list_accounts(&client).await.expect("list should succeed");
    assert_eq!(usernames, vec!["macnated", "alice"]);

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /v1/account HTTP/1.1"), "got: {raw}");
    let body = form_body(&raw);
    assert!(body.contains("action=list"), "body: {body}");
    assert!(body.contains("key=s3cr3t"), "body: {body}");
}

#[tokio::test]
async fn account_source_trait_delegates_to_list_action() {
    let (base_url, server) =
        one_shot_panel("200 OK", r#"{"status":"OK","msj":[{"username":"bob"}]}"#).await;

    let client = PanelClient::new(&base_url, "v1", "k").unwrap();
    let source: &dyn AccountSource = &client;
    assert_eq!(source.list_accounts().await.unwrap(), vec!["bob"]);
    server.await.unwrap();
}

#[tokio::test]
async fn zero_accounts_is_empty_list() {
    let (base_url, server) = one_shot_panel("200 OK", r#"{"status":"OK","msj":[]}"#).await;

    let client = PanelClient::new(&base_url, "v1", "k").unwrap();
    assert!(panel::list_accounts(&client).await.unwrap().is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn missing_msj_is_malformed_response() {
    let (base_url, server) = one_shot_panel("200 OK", r#"{"status":"OK"}"#).await;

    let client = PanelClient::new(&base_url, "v1", "k").unwrap();
    let err = panel::list_accounts(&client).await.unwrap_err();
    assert!(matches!(err, PanelError::MalformedResponse { .. }), "got {err:?}");
    server.await.unwrap();
}

#[tokio::test]
async fn non_json_body_is_malformed_response() {
    let (base_url, server) = one_shot_panel("200 OK", "<html>maintenance</html>").await;

    let client = PanelClient::new(&base_url, "v1", "k").unwrap();
    let err = panel::list_accounts(&client).await.unwrap_err();
    assert!(matches!(err, PanelError::MalformedResponse { .. }), "got {err:?}");
    server.await.unwrap();
}

#[tokio::test]
async fn unauthorized_is_auth_error() {
    let (base_url, server) = one_shot_panel("401 Unauthorized", r#"{"status":"Error"}"#).await;

    let client = PanelClient::new(&base_url, "v1", "wrong").unwrap();
    let err = panel::list_accounts(&client).await.unwrap_err();
    assert!(matches!(err, PanelError::Auth { status: 401 }), "got {err:?}");
    server.await.unwrap();
}

#[tokio::test]
async fn server_error_is_status_error() {
    let (base_url, server) = one_shot_panel("500 Internal Server Error", "boom").await;

    let client = PanelClient::new(&base_url, "v1", "k").unwrap();
    let err = panel::list_accounts(&client).await.unwrap_err();
    match err {
        PanelError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn connection_refused_is_network_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = PanelClient::with_timeout(
        &format!("http://{addr}"),
        "v1",
        "k",
        Duration::from_secs(5),
    )
    .unwrap();
    let err = panel::list_accounts(&client).await.unwrap_err();
    assert!(matches!(err, PanelError::Network { .. }), "got {err:?}");
}

#[tokio::test]
async fn suspend_sends_user_and_surfaces_panel_error() {
    let (base_url, server) = one_shot_panel(
        "200 OK",
        r#"{"status":"Error","msj":"User does not exist"}"#,
    )
    .await;

    let client = PanelClient::new(&base_url, "v1", "k").unwrap();
    let err = panel::suspend_account(&client, "ghost").await.unwrap_err();
    match err {
        PanelError::Rejected { message } => assert_eq!(message, panel::ERR_USER_DOES_NOT_EXIST),
        other => panic!("unexpected error: {other:?}"),
    }

    let raw = server.await.unwrap();
    let body = form_body(&raw);
    assert!(body.contains("action=susp"), "body: {body}");
    assert!(body.contains("user=ghost"), "body: {body}");
}

#[tokio::test]
async fn caller_cannot_override_credential() {
    let (base_url, server) = one_shot_panel("200 OK", r#"{"status":"OK","msj":"done"}"#).await;

    let client = PanelClient::new(&base_url, "v1", "real-key").unwrap();
    client
        .put(ACCOUNT_ENDPOINT, &[("key", "forged"), ("action", "udp")])
        .await
        .unwrap();

    let raw = server.await.unwrap();
    assert!(raw.starts_with("PUT /v1/account HTTP/1.1"), "got: {raw}");
    let body = form_body(&raw);
    assert!(body.contains("key=real-key"), "body: {body}");
    assert!(!body.contains("forged"), "body: {body}");
    assert_eq!(body.matches("key=").count(), 1, "body: {body}");
}
