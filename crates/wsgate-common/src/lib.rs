pub mod config;
pub mod ids;

pub use config::{
    GatewayConfig, GatewayConfigError, GatewayConfigPatch, IngressMode, OpenAiWsConfig,
    SchedTunables,
};
pub use ids::{ClientConnId, UpstreamConnId, owner_from_slot, owner_slot_value};
