use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::info;

use wsgate_common::GatewayConfig;

use crate::account::{AccountRegistry, AccountSnapshot};
use crate::continuation::ContinuationMap;
use crate::dial::Dialer;
use crate::events::EventHub;
use crate::health::HealthRegistry;
use crate::lease::SharedConnPool;
use crate::pool::PoolManager;
use crate::pool::account_pool::PoolTuning;
use crate::sched::Scheduler;

/// Process-wide gateway state. Constructed once at startup; config changes go
/// through [`apply_config`], which rebuilds the affected pools atomically.
pub struct GatewayState {
    pub config: ArcSwap<GatewayConfig>,
    pub accounts: AccountRegistry,
    pub pools: PoolManager,
    pub shared_conns: Arc<SharedConnPool>,
    pub continuation: ContinuationMap,
    pub scheduler: Scheduler,
    pub health: HealthRegistry,
    pub events: EventHub,
    shutdown: watch::Sender<bool>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, accounts: AccountSnapshot) -> Arc<Self> {
        let ws = &config.openai_ws;
        let tuning = PoolTuning::from_config(ws);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            accounts: AccountRegistry::new(accounts),
            pools: PoolManager::new(tuning),
            shared_conns: Arc::new(SharedConnPool::new(
                4,
                Duration::from_secs(ws.ctx_pool_idle_ttl_seconds),
                Duration::from_secs(ws.upstream_rotate_after_seconds),
            )),
            continuation: ContinuationMap::new(Duration::from_secs(ws.continuation_ttl_seconds)),
            scheduler: Scheduler::new(ws.sched.clone()),
            health: HealthRegistry::new(),
            events: EventHub::new(64),
            config: ArcSwap::from_pointee(config),
            shutdown,
        })
    }

    pub fn dialer(&self) -> Dialer {
        let ws = &self.config.load().openai_ws;
        Dialer::new(
            ws.upstream_url.clone(),
            Duration::from_secs(ws.dial_timeout_seconds),
        )
    }

    /// Reload: swap the config and rebuild every context pool against the new
    /// tuning. Live turns finish against the shells they already hold.
    pub fn apply_config(&self, config: GatewayConfig) {
        let tuning = PoolTuning::from_config(&config.openai_ws);
        self.config.store(Arc::new(config));
        self.pools.reconfigure(tuning);
        info!(event = "gateway_config_applied");
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.pools.shutdown();
    }
}
