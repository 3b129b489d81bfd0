use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use wsgate_common::{GatewayConfigPatch, IngressMode};
use wsgate_core::account::{Account, CredentialKind};
use wsgate_core::state::GatewayState;
use wsgate_core::AccountSnapshot;
use wsgate_router::{ClientAuth, ClientKeyEntry, ClientKeySnapshot, gateway_router};

const WAIT: Duration = Duration::from_secs(5);

/// Fake Responses upstream: answers every create with created + completed.
async fn spawn_upstream() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (tcp, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                let mut turn = 0usize;
                while let Some(Ok(Message::Text(_))) = ws.next().await {
                    turn += 1;
                    let id = format!("r{turn}");
                    let completed = serde_json::json!({
                        "type": "response.completed",
                        "response": { "id": id, "object": "response", "output": [] }
                    });
                    ws.send(Message::Text(completed.to_string().into()))
                        .await
                        .unwrap();
                }
            });
        }
    });
    addr
}

async fn spawn_gateway(upstream: SocketAddr) -> SocketAddr {
    let config = GatewayConfigPatch {
        upstream_url: Some(format!("ws://{upstream}")),
        ingress_mode_default: Some(IngressMode::CtxPool),
        ..Default::default()
    }
    .into_config()
    .unwrap();
    let state = GatewayState::new(
        config,
        AccountSnapshot::new(vec![Account {
            account_id: "acct-1".to_string(),
            group_id: "group-1".to_string(),
            credential_kind: CredentialKind::ApiKey,
            bearer: "sk-upstream".to_string(),
            concurrency: 2,
            apikey_ws_mode: None,
            oauth_ws_mode: None,
            codex_user_agent: None,
            beta_header: None,
        }]),
    );
    let auth = Arc::new(ClientAuth::new(ClientKeySnapshot::new([(
        "ck-live".to_string(),
        ClientKeyEntry {
            key_id: "k1".to_string(),
            group_id: "group-1".to_string(),
            enabled: true,
        },
    )])));

    let app = gateway_router(state, auth);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn bearer_upgrade_and_turn_round_trip() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_gateway(upstream).await;

    let mut request = format!("ws://{gateway}/openai/v1/responses/ws")
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "authorization",
        "Bearer ck-live".parse().unwrap(),
    );
    request.headers_mut().insert(
        "user-agent",
        "codex_cli_rs/0.99.0".parse().unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    ws.send(Message::Text(
        r#"{"model":"gpt-5.2","input":"hi"}"#.to_string().into(),
    ))
    .await
    .unwrap();

    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    let event: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["type"], "response.completed");
    assert_eq!(event["response"]["id"], "r1");

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn query_key_works_on_key_prefixed_path() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_gateway(upstream).await;

    let url = format!("ws://{gateway}/key/openai/v1/responses/ws?key=ck-live");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws.send(Message::Text(
        r#"{"model":"gpt-5.2","input":"hi"}"#.to_string().into(),
    ))
    .await
    .unwrap();
    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    assert!(text.contains("response.completed"));
}

#[tokio::test]
async fn legacy_api_key_param_rejected_with_400() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_gateway(upstream).await;

    let url = format!("ws://{gateway}/key/openai/v1/responses/ws?api_key=legacy");
    let err = tokio_tungstenite::connect_async(url).await.unwrap_err();
    let WsError::Http(response) = err else {
        panic!("expected http rejection, got {err:?}");
    };
    assert_eq!(response.status(), 400);
    let body = String::from_utf8(response.into_body().unwrap_or_default()).unwrap();
    assert_eq!(
        body,
        r#"{"error":{"code":400,"message":"Query parameter api_key is deprecated. Use Authorization header or key instead.","status":"INVALID_ARGUMENT"}}"#
    );
}

#[tokio::test]
async fn missing_key_rejected_with_401() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_gateway(upstream).await;

    let url = format!("ws://{gateway}/openai/v1/responses/ws");
    let err = tokio_tungstenite::connect_async(url).await.unwrap_err();
    let WsError::Http(response) = err else {
        panic!("expected http rejection, got {err:?}");
    };
    assert_eq!(response.status(), 401);
}
