pub mod account_pool;
pub mod context;
pub mod sweeper;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::info;

use wsgate_common::{ClientConnId, OpenAiWsConfig, UpstreamConnId};

use crate::account::Account;
use crate::dial::Dialer;
use crate::error::{DialError, ErrorKind, TurnError};
use crate::pool::account_pool::{AccountPool, PoolTuning};
use crate::pool::context::{IngressContext, UpstreamState};
use crate::pool::sweeper::spawn_sweeper;

pub use account_pool::{Acquire, ReleaseReason, SweepReport};
pub use context::UpstreamState as CtxUpstreamState;

impl PoolTuning {
    pub fn from_config(config: &OpenAiWsConfig) -> Self {
        Self {
            idle_ttl: Duration::from_secs(config.ctx_pool_idle_ttl_seconds),
            owner_stale: Duration::from_secs(config.ctx_pool_owner_stale_seconds),
            rotate_after: Duration::from_secs(config.upstream_rotate_after_seconds),
            sweep_interval: Duration::from_secs(config.ctx_pool_sweep_interval_seconds),
            idle_ping_enabled: config.ctx_pool_idle_ping_enabled,
        }
    }
}

/// Holds every account's context pool. The manager itself only guards a
/// read-mostly map of pools; all per-context locking lives in the pools.
pub struct PoolManager {
    tuning: RwLock<PoolTuning>,
    pools: RwLock<HashMap<String, Arc<AccountPool>>>,
}

impl PoolManager {
    pub fn new(tuning: PoolTuning) -> Self {
        Self {
            tuning: RwLock::new(tuning),
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Get or lazily create the pool for an account. Creation also starts the
    /// pool's sweeper task, so this must run inside the runtime.
    pub fn pool_for(&self, account: &Arc<Account>) -> Arc<AccountPool> {
        if let Ok(pools) = self.pools.read()
            && let Some(pool) = pools.get(&account.account_id)
        {
            return pool.clone();
        }

        let tuning = self
            .tuning
            .read()
            .map(|tuning| tuning.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        let Ok(mut pools) = self.pools.write() else {
            // Poisoned manager lock: serve a detached pool rather than fail
            // the turn; it simply will not be shared.
            return Arc::new(AccountPool::new(account.clone(), tuning));
        };
        pools
            .entry(account.account_id.clone())
            .or_insert_with(|| {
                let pool = Arc::new(AccountPool::new(account.clone(), tuning));
                spawn_sweeper(pool.clone());
                info!(event = "ctx_pool_created", account_id = %account.account_id);
                pool
            })
            .clone()
    }

    pub fn existing_pool(&self, account_id: &str) -> Option<Arc<AccountPool>> {
        self.pools.read().ok()?.get(account_id).cloned()
    }

    /// Config reload: swap tuning and rebuild every pool atomically. Old
    /// pools are closed (their sweepers exit); live turns finish against the
    /// shells they already hold.
    pub fn reconfigure(&self, tuning: PoolTuning) {
        if let Ok(mut current) = self.tuning.write() {
            *current = tuning;
        }
        let Ok(mut pools) = self.pools.write() else {
            return;
        };
        for pool in pools.values() {
            pool.close();
        }
        pools.clear();
    }

    pub fn shutdown(&self) {
        let Ok(pools) = self.pools.read() else {
            return;
        };
        for pool in pools.values() {
            pool.close();
        }
    }
}

/// Rebuild a context's upstream in place. Only the current owner may call;
/// the dial happens with no pool lock held.
pub async fn rebuild_upstream(
    ctx: &Arc<IngressContext>,
    owner: ClientConnId,
    dialer: &Dialer,
    account: &Account,
) -> Result<UpstreamConnId, TurnError> {
    if ctx.owner() != Some(owner) {
        return Err(TurnError::new(
            ErrorKind::Internal,
            "rebuild requested by a non-owner",
        ));
    }

    ctx.discard_conn().await;
    let conn = dialer.dial(account).await.map_err(|err: DialError| {
        ctx.mark_broken();
        TurnError::from(err)
    })?;
    let conn_id = conn.conn_id;
    ctx.store_conn(conn).await;
    ctx.set_upstream_state(UpstreamState::Connected);
    let rebuilds = ctx.record_rebuild();
    info!(
        event = "ctx_upstream_rebuilt",
        account_id = %account.account_id,
        session_hash = %ctx.session_hash,
        conn_id = %conn_id,
        rebuilds,
    );
    Ok(conn_id)
}
