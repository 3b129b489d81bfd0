use clap::Parser;

use wsgate_common::{GatewayConfigPatch, IngressMode};

#[derive(Parser)]
#[command(name = "wsgate")]
pub(crate) struct Cli {
    #[arg(long, env = "WSGATE_HOST", default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, env = "WSGATE_PORT", default_value_t = 8788)]
    pub(crate) port: u16,
    /// JSON file with the upstream account records.
    #[arg(long, env = "WSGATE_ACCOUNTS_FILE")]
    pub(crate) accounts_file: String,
    /// JSON file with the client API key table.
    #[arg(long, env = "WSGATE_CLIENT_KEYS_FILE")]
    pub(crate) client_keys_file: String,
    #[arg(long, env = "WSGATE_UPSTREAM_URL")]
    pub(crate) upstream_url: Option<String>,
    #[arg(long, env = "WSGATE_FORCE_HTTP")]
    pub(crate) force_http: Option<bool>,
    #[arg(long, env = "WSGATE_INGRESS_MODE")]
    pub(crate) ingress_mode_default: Option<String>,
    /// Optional JSON config file merged under CLI/env values.
    #[arg(long, env = "WSGATE_CONFIG")]
    pub(crate) config: Option<String>,
}

impl Cli {
    pub(crate) fn as_patch(&self) -> anyhow::Result<GatewayConfigPatch> {
        let ingress_mode_default = match self.ingress_mode_default.as_deref() {
            None => None,
            Some("off") => Some(IngressMode::Off),
            Some("shared") => Some(IngressMode::Shared),
            Some("dedicated") => Some(IngressMode::Dedicated),
            Some("ctx_pool") => Some(IngressMode::CtxPool),
            Some(other) => anyhow::bail!("unknown ingress mode: {other}"),
        };
        Ok(GatewayConfigPatch {
            host: Some(self.host.clone()),
            port: Some(self.port),
            upstream_url: self.upstream_url.clone(),
            force_http: self.force_http,
            ingress_mode_default,
            ..Default::default()
        })
    }
}
