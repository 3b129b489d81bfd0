use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use wsgate_common::GatewayConfigPatch;
use wsgate_core::{Account, AccountSnapshot, GatewayState};
use wsgate_router::{ClientAuth, ClientKeyEntry, ClientKeySnapshot, gateway_router};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wsgate=info,wsgate_core=info,wsgate_router=info".into()),
        )
        .init();

    let cli = cli::Cli::parse();

    // Merge order: CLI/env over file over defaults; validated once here.
    let mut patch = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read config file {path}"))?;
            serde_json::from_str::<GatewayConfigPatch>(&raw)
                .with_context(|| format!("parse config file {path}"))?
        }
        None => GatewayConfigPatch::default(),
    };
    patch.overlay(cli.as_patch()?);
    let config = patch.into_config().context("invalid gateway config")?;

    let accounts_raw = std::fs::read_to_string(&cli.accounts_file)
        .with_context(|| format!("read accounts file {}", cli.accounts_file))?;
    let accounts: Vec<Account> =
        serde_json::from_str(&accounts_raw).context("parse accounts file")?;
    info!(event = "accounts_loaded", count = accounts.len());

    let keys_raw = std::fs::read_to_string(&cli.client_keys_file)
        .with_context(|| format!("read client keys file {}", cli.client_keys_file))?;
    let keys: std::collections::HashMap<String, ClientKeyEntry> =
        serde_json::from_str(&keys_raw).context("parse client keys file")?;
    info!(event = "client_keys_loaded", count = keys.len());

    let bind = format!("{}:{}", config.host, config.port);
    let state = GatewayState::new(config, AccountSnapshot::new(accounts));
    let auth = Arc::new(ClientAuth::new(ClientKeySnapshot::new(keys)));

    let app = gateway_router(state.clone(), auth);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(event = "listening", bind = %bind);

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_state.shutdown();
            info!(event = "shutdown_requested");
        })
        .await?;
    Ok(())
}
