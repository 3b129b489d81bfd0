use std::time::{Duration, Instant};

use http::HeaderValue;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, http as ws_http};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use wsgate_common::UpstreamConnId;

use crate::account::Account;
use crate::error::DialError;

/// Stream type returned by `tokio_tungstenite::connect_async`.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OPENAI_WS_BETA: &str = "responses_websockets=2026-02-06";
/// Upstream rejects context-takeover compression; the gateway never offers it.
const WS_EXTENSIONS: &str =
    "permessage-deflate; client_no_context_takeover; server_no_context_takeover";

/// A live upstream WebSocket plus the bookkeeping the pool and the
/// continuation coordinator need.
pub struct UpstreamConn {
    pub conn_id: UpstreamConnId,
    pub stream: WsStream,
    pub created_at: Instant,
    pub last_used: Instant,
}

impl UpstreamConn {
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub async fn close(mut self) {
        // Best-effort close; the peer may already be gone.
        let _ = futures_util::SinkExt::close(&mut self.stream).await;
    }
}

impl std::fmt::Debug for UpstreamConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConn")
            .field("conn_id", &self.conn_id)
            .field("age_secs", &self.age().as_secs())
            .finish()
    }
}

/// Opens upstream Responses sockets with the handshake the upstream accepts.
#[derive(Debug, Clone)]
pub struct Dialer {
    url: String,
    timeout: Duration,
}

impl Dialer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn dial(&self, account: &Account) -> Result<UpstreamConn, DialError> {
        let request = build_handshake_request(&self.url, account)?;
        let connect = tokio_tungstenite::connect_async(request);
        let (stream, _response) = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| DialError::Network(format!("dial timed out after {:?}", self.timeout)))?
            .map_err(classify_ws_error)?;

        let conn = UpstreamConn {
            conn_id: UpstreamConnId::new(),
            stream,
            created_at: Instant::now(),
            last_used: Instant::now(),
        };
        debug!(event = "upstream_dialed", conn_id = %conn.conn_id, account_id = %account.account_id);
        Ok(conn)
    }
}

fn build_handshake_request(
    url: &str,
    account: &Account,
) -> Result<ws_http::Request<()>, DialError> {
    let mut request = url
        .into_client_request()
        .map_err(|err| DialError::Network(format!("invalid upstream url: {err}")))?;

    let headers = request.headers_mut();
    headers.insert(
        "sec-websocket-extensions",
        HeaderValue::from_static(WS_EXTENSIONS),
    );
    let bearer = format!("Bearer {}", account.bearer);
    headers.insert(
        "authorization",
        HeaderValue::from_str(&bearer)
            .map_err(|_| DialError::Auth("credential is not a valid header value".to_string()))?,
    );

    // `user-agent` and `originator` must stay semantically consistent: the
    // originator is always the product name in front of the UA's slash.
    let user_agent = account
        .codex_user_agent
        .clone()
        .unwrap_or_else(|| format!("wsgate/{}", env!("CARGO_PKG_VERSION")));
    let originator = user_agent
        .split('/')
        .next()
        .unwrap_or(user_agent.as_str())
        .to_string();
    headers.insert(
        "user-agent",
        HeaderValue::from_str(&user_agent)
            .map_err(|_| DialError::Policy("invalid user-agent".to_string()))?,
    );
    headers.insert(
        "originator",
        HeaderValue::from_str(&originator)
            .map_err(|_| DialError::Policy("invalid originator".to_string()))?,
    );

    let beta = account.beta_header.as_deref().unwrap_or(OPENAI_WS_BETA);
    headers.insert(
        "openai-beta",
        HeaderValue::from_str(beta)
            .map_err(|_| DialError::Policy("invalid openai-beta header".to_string()))?,
    );

    Ok(request)
}

fn classify_ws_error(err: WsError) -> DialError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_deref()
                .map(|bytes| String::from_utf8_lossy(bytes).to_string())
                .unwrap_or_default();
            match status.as_u16() {
                401 | 403 => DialError::Auth(format!("{status}: {body}")),
                429 => DialError::RateLimited(format!("{status}: {body}")),
                _ => DialError::Policy(format!("{status}: {body}")),
            }
        }
        WsError::Io(err) => DialError::Network(err.to_string()),
        WsError::Tls(err) => DialError::Network(err.to_string()),
        other => DialError::Network(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::CredentialKind;

    fn account(codex_ua: Option<&str>) -> Account {
        Account {
            account_id: "a1".to_string(),
            group_id: "g1".to_string(),
            credential_kind: CredentialKind::ApiKey,
            bearer: "sk-test".to_string(),
            concurrency: 1,
            apikey_ws_mode: None,
            oauth_ws_mode: None,
            codex_user_agent: codex_ua.map(|ua| ua.to_string()),
            beta_header: None,
        }
    }

    #[test]
    fn handshake_carries_required_headers() {
        let request =
            build_handshake_request("wss://api.openai.com/v1/responses", &account(None)).unwrap();
        let headers = request.headers();
        assert_eq!(
            headers.get("sec-websocket-extensions").unwrap(),
            WS_EXTENSIONS
        );
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-test");
        assert_eq!(headers.get("openai-beta").unwrap(), OPENAI_WS_BETA);
    }

    #[test]
    fn codex_flow_forces_matching_originator() {
        let request = build_handshake_request(
            "wss://api.openai.com/v1/responses",
            &account(Some("codex_cli_rs/0.99.0")),
        )
        .unwrap();
        let headers = request.headers();
        assert_eq!(headers.get("user-agent").unwrap(), "codex_cli_rs/0.99.0");
        assert_eq!(headers.get("originator").unwrap(), "codex_cli_rs");
    }

    #[tokio::test]
    async fn refused_connection_classifies_as_network() {
        let dialer = Dialer::new("ws://127.0.0.1:9", Duration::from_secs(2));
        let err = dialer.dial(&account(None)).await.unwrap_err();
        assert!(matches!(err, DialError::Network(_)));
    }
}
