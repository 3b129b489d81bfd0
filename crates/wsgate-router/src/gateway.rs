use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, Uri, header::USER_AGENT};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use wsgate_core::sched::health_risk;
use wsgate_core::{
    Account, ClientConn, ClientOutbound, GatewayState, RequestMeta, TransportDecision,
    resolve_transport, serve_client,
};
use wsgate_common::ClientConnId;
use wsgate_protocol::ErrorEnvelope;

use crate::auth::ClientAuth;

/// Socket-to-engine channel depth. Mirrors the relay channel so a slow
/// client backpressures all the way to the upstream reader.
const SOCKET_CHANNEL_CAP: usize = 16;

pub struct GatewayRouterState {
    pub state: Arc<GatewayState>,
    pub auth: Arc<ClientAuth>,
}

pub fn gateway_router(state: Arc<GatewayState>, auth: Arc<ClientAuth>) -> Router {
    let router_state = Arc::new(GatewayRouterState { state, auth });
    Router::new()
        .route("/openai/v1/responses/ws", get(responses_ws))
        .route("/key/openai/v1/responses/ws", get(responses_ws_keyed))
        .with_state(router_state)
}

async fn responses_ws(
    ws: WebSocketUpgrade,
    State(router): State<Arc<GatewayRouterState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    upgrade(ws, router, headers, uri, false)
}

/// Key-prefixed variant: `?key=` is accepted here and only here.
async fn responses_ws_keyed(
    ws: WebSocketUpgrade,
    State(router): State<Arc<GatewayRouterState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    upgrade(ws, router, headers, uri, true)
}

fn upgrade(
    ws: WebSocketUpgrade,
    router: Arc<GatewayRouterState>,
    headers: HeaderMap,
    uri: Uri,
    key_in_query_allowed: bool,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();

    let entry = match router
        .auth
        .authenticate(&headers, uri.query(), key_in_query_allowed)
    {
        Ok(entry) => entry,
        Err(err) => return envelope_response(err.status, &err.envelope),
    };

    let Some(account) = select_account(&router.state, &entry.group_id) else {
        return envelope_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &ErrorEnvelope::unavailable("no account available for this key"),
        );
    };

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let meta = RequestMeta {
        user_agent: user_agent.as_deref(),
        codex_cli: headers.contains_key("x-codex-cli"),
    };
    let config = router.state.config.load();
    let resolution = resolve_transport(&config.openai_ws, &account, &meta);
    let mode = match resolution.decision {
        TransportDecision::WsV2(mode) => mode,
        TransportDecision::HttpFallback => {
            return envelope_response(
                StatusCode::BAD_REQUEST,
                &ErrorEnvelope::invalid_argument(
                    "websocket transport is not enabled for this account; use the HTTP endpoint",
                ),
            );
        }
    };

    info!(
        event = "client_upgrading",
        trace_id = %trace_id,
        key_id = %entry.key_id,
        account_id = %account.account_id,
        ingress_mode = %mode,
    );

    let state = router.state.clone();
    let client = ClientConn {
        conn_id: ClientConnId::new(),
        trace_id,
        account,
        mode,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, client))
}

/// Lowest current health risk wins. Richer selection policy (billing,
/// quotas) belongs to the surrounding proxy, not the gateway.
fn select_account(state: &Arc<GatewayState>, group_id: &str) -> Option<Arc<Account>> {
    let tunables = state.scheduler.tunables();
    state
        .accounts
        .group(group_id)
        .into_iter()
        .min_by_key(|account| {
            let signals = state.health.signals(&account.account_id);
            health_risk(&signals, false, tunables)
        })
}

/// Own the socket: pump inbound text frames to the engine and engine output
/// back out. The engine never touches axum types.
async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, client: ClientConn) {
    let trace_id = client.trace_id.clone();
    let (engine_in_tx, engine_in_rx) = mpsc::channel::<String>(SOCKET_CHANNEL_CAP);
    let (engine_out_tx, mut engine_out_rx) = mpsc::channel::<ClientOutbound>(SOCKET_CHANNEL_CAP);
    let engine = tokio::spawn(serve_client(state, client, engine_in_rx, engine_out_tx));

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outbound = engine_out_rx.recv() => {
                let Some(outbound) = outbound else { break };
                let finished = matches!(outbound, ClientOutbound::Close { .. });
                let message = match outbound {
                    ClientOutbound::Event(text) => Message::Text(text.into()),
                    ClientOutbound::Envelope(envelope) => Message::Text(envelope.to_json().into()),
                    ClientOutbound::Close { code, reason } => Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                };
                if sink.send(message).await.is_err() || finished {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if engine_in_tx.send(text.to_string()).await.is_err() {
                            break;
                        }
                    }
                    // axum answers pings at the protocol level.
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        debug!(event = "client_binary_ignored", trace_id = %trace_id);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
        }
    }

    // Closing both channels tells the engine the client is gone; its own
    // cleanup releases any held context.
    drop(engine_in_tx);
    engine_out_rx.close();
    while engine_out_rx.recv().await.is_some() {}
    let _ = engine.await;
    debug!(event = "client_socket_closed", trace_id = %trace_id);
}

fn envelope_response(status: StatusCode, envelope: &ErrorEnvelope) -> Response {
    let mut response = Response::new(Body::from(envelope.to_json()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}
