use tracing::info;

use wsgate_common::{IngressMode, OpenAiWsConfig};

use crate::account::Account;

const CODEX_UA_MARKER: &str = "codex_cli_rs";

/// What the resolver needs to know about an upgrade request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMeta<'a> {
    pub user_agent: Option<&'a str>,
    /// Explicit client opt-in, independent of the UA string.
    pub codex_cli: bool,
}

impl RequestMeta<'_> {
    fn is_codex_cli(&self) -> bool {
        self.codex_cli
            || self
                .user_agent
                .is_some_and(|ua| ua.contains(CODEX_UA_MARKER))
    }
}

/// Per-request transport decision. Invalid mode combinations are rejected at
/// config load, never here; client rejection (auth, busy) is the router's
/// job. The resolver only picks a transport for an authenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDecision {
    HttpFallback,
    WsV2(IngressMode),
}

#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub decision: TransportDecision,
    /// Set when the request wanted `ctx_pool` but fell through.
    pub ctx_pool_reject_reason: Option<&'static str>,
}

pub fn resolve_transport(
    config: &OpenAiWsConfig,
    account: &Account,
    meta: &RequestMeta<'_>,
) -> Resolution {
    let resolution = decide(config, account, meta);
    let (transport, ingress_mode) = match resolution.decision {
        TransportDecision::HttpFallback => ("http_sse", None),
        TransportDecision::WsV2(mode) => ("responses_websockets_v2", Some(mode)),
    };
    info!(
        event = "transport_resolved",
        account_id = %account.account_id,
        transport,
        ingress_mode = ingress_mode.map(|mode| mode.as_str()).unwrap_or("-"),
        ctx_pool_mode = matches!(ingress_mode, Some(IngressMode::CtxPool)),
        ctx_pool_reject_reason = resolution.ctx_pool_reject_reason.unwrap_or("-"),
    );
    resolution
}

fn decide(config: &OpenAiWsConfig, account: &Account, meta: &RequestMeta<'_>) -> Resolution {
    if config.force_http {
        return Resolution {
            decision: TransportDecision::HttpFallback,
            ctx_pool_reject_reason: None,
        };
    }

    let mode = account.ws_mode(config.ingress_mode_default);
    if mode == IngressMode::Off
        || !config.mode_router_v2_enabled
        || !config.responses_websockets_v2
    {
        return Resolution {
            decision: TransportDecision::HttpFallback,
            ctx_pool_reject_reason: None,
        };
    }

    match mode {
        IngressMode::CtxPool if meta.is_codex_cli() => Resolution {
            decision: TransportDecision::WsV2(IngressMode::CtxPool),
            ctx_pool_reject_reason: None,
        },
        // Non-Codex clients fall through to the per-session sticky mode.
        IngressMode::CtxPool => Resolution {
            decision: TransportDecision::WsV2(IngressMode::Dedicated),
            ctx_pool_reject_reason: Some("not_codex_cli"),
        },
        mode => Resolution {
            decision: TransportDecision::WsV2(mode),
            ctx_pool_reject_reason: None,
        },
    }
}
