use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("missing required gateway config field: {0}")]
    MissingField(&'static str),
    #[error("invalid gateway config: {0}")]
    Invalid(&'static str),
}

/// How a client WebSocket is attached to upstream connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressMode {
    Off,
    Shared,
    Dedicated,
    CtxPool,
}

impl IngressMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngressMode::Off => "off",
            IngressMode::Shared => "shared",
            IngressMode::Dedicated => "dedicated",
            IngressMode::CtxPool => "ctx_pool",
        }
    }
}

impl std::fmt::Display for IngressMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adaptive scheduler tunables. The weights are proposal-grade in the source
/// system; only the level boundaries are contractual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedTunables {
    pub weight_previous_response_id: u8,
    pub weight_continuation_input: u8,
    pub weight_store_false: u8,
    pub weight_short_gap: u8,
    pub short_gap_seconds: u64,
    pub weight_ws_failure_rate: u8,
    pub ws_failure_rate_threshold: f64,
    pub weight_policy_rate: u8,
    pub policy_rate_threshold: f64,
    pub weight_slow_ttft: u8,
    pub ttft_baseline_factor: f64,
    pub weight_pool_at_capacity: u8,
    pub hard_level_min_risk: u8,
    pub soft_level_max_risk: u8,
    pub migration_min_health_delta: u8,
    pub migration_cooldown_seconds: u64,
    pub post_migration_lock_turns: u32,
    pub hard_dwell_turns: u32,
}

impl Default for SchedTunables {
    fn default() -> Self {
        Self {
            weight_previous_response_id: 4,
            weight_continuation_input: 3,
            weight_store_false: 2,
            weight_short_gap: 1,
            short_gap_seconds: 15,
            weight_ws_failure_rate: 3,
            ws_failure_rate_threshold: 0.15,
            weight_policy_rate: 3,
            policy_rate_threshold: 0.10,
            weight_slow_ttft: 2,
            ttft_baseline_factor: 2.0,
            weight_pool_at_capacity: 2,
            hard_level_min_risk: 6,
            soft_level_max_risk: 2,
            migration_min_health_delta: 3,
            migration_cooldown_seconds: 60,
            post_migration_lock_turns: 3,
            hard_dwell_turns: 2,
        }
    }
}

/// Gateway-scoped settings for the OpenAI Responses WebSocket path.
/// Evaluated at boot; request handling trusts a validated config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiWsConfig {
    pub upstream_url: String,
    pub force_http: bool,
    pub mode_router_v2_enabled: bool,
    pub ingress_mode_default: IngressMode,
    /// Legacy v1 flag kept only so invalid combinations are rejected at load.
    pub responses_websockets: bool,
    pub responses_websockets_v2: bool,
    pub ctx_pool_idle_ttl_seconds: u64,
    pub ctx_pool_sweep_interval_seconds: u64,
    pub ctx_pool_rebuild_max_per_turn: u32,
    pub ctx_pool_owner_stale_seconds: u64,
    pub ctx_pool_idle_ping_enabled: bool,
    pub dial_timeout_seconds: u64,
    pub client_read_timeout_seconds: u64,
    pub upstream_read_timeout_seconds: u64,
    /// Safety margin against the upstream's 60-minute connection TTL.
    pub upstream_rotate_after_seconds: u64,
    pub continuation_ttl_seconds: u64,
    pub sched: SchedTunables,
}

/// Final, merged gateway configuration used by the running process.
///
/// Merge order: CLI > ENV > file, then validated once via `into_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub openai_ws: OpenAiWsConfig,
}

/// Optional layer used for merging gateway config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upstream_url: Option<String>,
    pub force_http: Option<bool>,
    pub mode_router_v2_enabled: Option<bool>,
    pub ingress_mode_default: Option<IngressMode>,
    pub responses_websockets: Option<bool>,
    pub responses_websockets_v2: Option<bool>,
    pub ctx_pool_idle_ttl_seconds: Option<u64>,
    pub ctx_pool_sweep_interval_seconds: Option<u64>,
    pub ctx_pool_rebuild_max_per_turn: Option<u32>,
    pub ctx_pool_owner_stale_seconds: Option<u64>,
    pub ctx_pool_idle_ping_enabled: Option<bool>,
    pub dial_timeout_seconds: Option<u64>,
    pub client_read_timeout_seconds: Option<u64>,
    pub upstream_read_timeout_seconds: Option<u64>,
    pub upstream_rotate_after_seconds: Option<u64>,
    pub continuation_ttl_seconds: Option<u64>,
    pub sched: Option<SchedTunables>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(host);
        take!(port);
        take!(upstream_url);
        take!(force_http);
        take!(mode_router_v2_enabled);
        take!(ingress_mode_default);
        take!(responses_websockets);
        take!(responses_websockets_v2);
        take!(ctx_pool_idle_ttl_seconds);
        take!(ctx_pool_sweep_interval_seconds);
        take!(ctx_pool_rebuild_max_per_turn);
        take!(ctx_pool_owner_stale_seconds);
        take!(ctx_pool_idle_ping_enabled);
        take!(dial_timeout_seconds);
        take!(client_read_timeout_seconds);
        take!(upstream_read_timeout_seconds);
        take!(upstream_rotate_after_seconds);
        take!(continuation_ttl_seconds);
        take!(sched);
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayConfigError> {
        let responses_websockets = self.responses_websockets.unwrap_or(false);
        let responses_websockets_v2 = self.responses_websockets_v2.unwrap_or(true);
        if responses_websockets && !responses_websockets_v2 {
            return Err(GatewayConfigError::Invalid(
                "responses_websockets requires responses_websockets_v2",
            ));
        }

        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8788),
            openai_ws: OpenAiWsConfig {
                upstream_url: self
                    .upstream_url
                    .unwrap_or_else(|| "wss://api.openai.com/v1/responses".to_string()),
                force_http: self.force_http.unwrap_or(false),
                mode_router_v2_enabled: self.mode_router_v2_enabled.unwrap_or(true),
                ingress_mode_default: self
                    .ingress_mode_default
                    .unwrap_or(IngressMode::Dedicated),
                responses_websockets,
                responses_websockets_v2,
                ctx_pool_idle_ttl_seconds: self.ctx_pool_idle_ttl_seconds.unwrap_or(600),
                ctx_pool_sweep_interval_seconds: self
                    .ctx_pool_sweep_interval_seconds
                    .unwrap_or(30),
                ctx_pool_rebuild_max_per_turn: self.ctx_pool_rebuild_max_per_turn.unwrap_or(1),
                ctx_pool_owner_stale_seconds: self.ctx_pool_owner_stale_seconds.unwrap_or(120),
                ctx_pool_idle_ping_enabled: self.ctx_pool_idle_ping_enabled.unwrap_or(true),
                dial_timeout_seconds: self.dial_timeout_seconds.unwrap_or(10),
                client_read_timeout_seconds: self.client_read_timeout_seconds.unwrap_or(180),
                upstream_read_timeout_seconds: self.upstream_read_timeout_seconds.unwrap_or(180),
                upstream_rotate_after_seconds: self
                    .upstream_rotate_after_seconds
                    .unwrap_or(55 * 60),
                continuation_ttl_seconds: self.continuation_ttl_seconds.unwrap_or(600),
                sched: self.sched.unwrap_or_default(),
            },
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        let ws = value.openai_ws;
        Self {
            host: Some(value.host),
            port: Some(value.port),
            upstream_url: Some(ws.upstream_url),
            force_http: Some(ws.force_http),
            mode_router_v2_enabled: Some(ws.mode_router_v2_enabled),
            ingress_mode_default: Some(ws.ingress_mode_default),
            responses_websockets: Some(ws.responses_websockets),
            responses_websockets_v2: Some(ws.responses_websockets_v2),
            ctx_pool_idle_ttl_seconds: Some(ws.ctx_pool_idle_ttl_seconds),
            ctx_pool_sweep_interval_seconds: Some(ws.ctx_pool_sweep_interval_seconds),
            ctx_pool_rebuild_max_per_turn: Some(ws.ctx_pool_rebuild_max_per_turn),
            ctx_pool_owner_stale_seconds: Some(ws.ctx_pool_owner_stale_seconds),
            ctx_pool_idle_ping_enabled: Some(ws.ctx_pool_idle_ping_enabled),
            dial_timeout_seconds: Some(ws.dial_timeout_seconds),
            client_read_timeout_seconds: Some(ws.client_read_timeout_seconds),
            upstream_read_timeout_seconds: Some(ws.upstream_read_timeout_seconds),
            upstream_rotate_after_seconds: Some(ws.upstream_rotate_after_seconds),
            continuation_ttl_seconds: Some(ws.continuation_ttl_seconds),
            sched: Some(ws.sched),
        }
    }
}
