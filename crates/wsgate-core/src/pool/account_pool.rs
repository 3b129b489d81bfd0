use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use wsgate_common::ClientConnId;
use wsgate_protocol::SessionHash;

use crate::account::Account;
use crate::pool::context::{IngressContext, UpstreamState};

/// Pool behavior knobs, snapshotted from gateway config at pool build time.
#[derive(Debug, Clone)]
pub struct PoolTuning {
    pub idle_ttl: Duration,
    pub owner_stale: Duration,
    pub rotate_after: Duration,
    pub sweep_interval: Duration,
    pub idle_ping_enabled: bool,
}

#[derive(Debug)]
pub enum Acquire {
    New(Arc<IngressContext>),
    Reuse(Arc<IngressContext>),
    Busy,
    Conflict,
}

impl Acquire {
    pub fn reason(&self) -> &'static str {
        match self {
            Acquire::New(_) => "new",
            Acquire::Reuse(_) => "reuse",
            Acquire::Busy => "busy",
            Acquire::Conflict => "conflict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Done,
    Broken,
    ClientGone,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Done => "done",
            ReleaseReason::Broken => "broken",
            ReleaseReason::ClientGone => "client_gone",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub evicted: usize,
    pub rotated: usize,
    pub ping_failures: usize,
}

/// Per-account context pool: `session_hash -> context`, capacity bound by the
/// account's concurrency. One mutex per pool; never held across network I/O.
pub struct AccountPool {
    account: Arc<Account>,
    tuning: PoolTuning,
    contexts: Mutex<HashMap<SessionHash, Arc<IngressContext>>>,
    shutdown: watch::Sender<bool>,
}

impl AccountPool {
    pub fn new(account: Arc<Account>, tuning: PoolTuning) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            account,
            tuning,
            contexts: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    pub fn tuning(&self) -> &PoolTuning {
        &self.tuning
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn len(&self) -> usize {
        self.contexts.lock().await.len()
    }

    pub async fn at_capacity(&self) -> bool {
        self.len().await >= self.account.concurrency
    }

    pub async fn acquire(
        &self,
        group_id: &str,
        session_hash: &SessionHash,
        owner: ClientConnId,
    ) -> Acquire {
        let mut retired: Vec<Arc<IngressContext>> = Vec::new();
        let outcome = {
            let mut contexts = self.contexts.lock().await;

            if let Some(ctx) = contexts.get(session_hash).cloned() {
                if ctx.group_id != group_id || ctx.account_id != self.account.account_id {
                    return Acquire::Conflict;
                }
                if ctx.try_bind_owner(owner) {
                    ctx.touch();
                    return Acquire::Reuse(ctx);
                }
                if ctx.owner_held_longer_than(self.tuning.owner_stale) {
                    // Stale owner: the previous client never released. Reclaim
                    // the shell, drop its upstream, and hand it over.
                    warn!(
                        event = "ctx_owner_reclaimed",
                        account_id = %self.account.account_id,
                        session_hash = %session_hash,
                        previous_owner = %ctx.owner().map(|o| o.to_string()).unwrap_or_default(),
                    );
                    ctx.force_clear_owner();
                    ctx.mark_broken();
                    if ctx.try_bind_owner(owner) {
                        ctx.touch();
                        retired.push(ctx.clone());
                        Acquire::Reuse(ctx)
                    } else {
                        Acquire::Busy
                    }
                } else {
                    Acquire::Busy
                }
            } else if contexts.len() < self.account.concurrency {
                let ctx = self.insert_new(&mut contexts, group_id, session_hash, owner);
                Acquire::New(ctx)
            } else {
                // At capacity: reclaim one idle-expired context, else busy.
                let expired = contexts
                    .iter()
                    .find(|(_, ctx)| ctx.is_idle() && ctx.idle_for() >= self.tuning.idle_ttl)
                    .map(|(hash, _)| hash.clone());
                match expired {
                    Some(hash) => {
                        if let Some(evicted) = contexts.remove(&hash) {
                            retired.push(evicted);
                        }
                        let ctx = self.insert_new(&mut contexts, group_id, session_hash, owner);
                        Acquire::New(ctx)
                    }
                    None => Acquire::Busy,
                }
            }
        };

        // Close retired upstreams only after the pool mutex is gone.
        for ctx in retired {
            ctx.discard_conn().await;
        }
        outcome
    }

    fn insert_new(
        &self,
        contexts: &mut HashMap<SessionHash, Arc<IngressContext>>,
        group_id: &str,
        session_hash: &SessionHash,
        owner: ClientConnId,
    ) -> Arc<IngressContext> {
        let ctx = Arc::new(IngressContext::new(
            group_id,
            &self.account.account_id,
            session_hash.clone(),
        ));
        // A freshly created context is always bindable.
        let bound = ctx.try_bind_owner(owner);
        debug_assert!(bound);
        contexts.insert(session_hash.clone(), ctx.clone());
        ctx
    }

    pub async fn release(&self, ctx: &Arc<IngressContext>, owner: ClientConnId, reason: ReleaseReason) {
        match reason {
            ReleaseReason::Done => {}
            ReleaseReason::Broken | ReleaseReason::ClientGone => {
                ctx.mark_broken();
                ctx.discard_conn().await;
            }
        }
        let released = ctx.release_owner(owner);
        ctx.touch();
        debug!(
            event = "ctx_released",
            account_id = %self.account.account_id,
            session_hash = %ctx.session_hash,
            reason = reason.as_str(),
            released,
        );
    }

    /// One sweeper pass: evict idle-expired shells, rotate aging upstreams
    /// before the upstream's 60-minute hard TTL, probe idle sockets.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut retired: Vec<Arc<IngressContext>> = Vec::new();
        let survivors: Vec<Arc<IngressContext>> = {
            let mut contexts = self.contexts.lock().await;
            let expired: Vec<SessionHash> = contexts
                .iter()
                .filter(|(_, ctx)| ctx.is_idle() && ctx.idle_for() >= self.tuning.idle_ttl)
                .map(|(hash, _)| hash.clone())
                .collect();
            for hash in expired {
                if let Some(ctx) = contexts.remove(&hash) {
                    retired.push(ctx);
                    report.evicted += 1;
                }
            }
            contexts.values().cloned().collect()
        };

        for ctx in retired {
            info!(
                event = "ctx_evicted",
                account_id = %self.account.account_id,
                session_hash = %ctx.session_hash,
                idle_secs = ctx.idle_for().as_secs(),
            );
            ctx.discard_conn().await;
        }

        for ctx in survivors {
            let age = ctx.upstream_age().await;
            if age.is_some_and(|age| age >= self.tuning.rotate_after) {
                ctx.mark_broken();
                ctx.discard_conn().await;
                report.rotated += 1;
                info!(
                    event = "ctx_upstream_rotated",
                    account_id = %self.account.account_id,
                    session_hash = %ctx.session_hash,
                );
                continue;
            }

            if self.tuning.idle_ping_enabled
                && ctx.is_idle()
                && ctx.upstream_state() == UpstreamState::Connected
                && ctx.ping().await == Some(false)
            {
                ctx.mark_broken();
                ctx.discard_conn().await;
                report.ping_failures += 1;
            }
        }

        report
    }
}

impl std::fmt::Debug for AccountPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountPool")
            .field("account_id", &self.account.account_id)
            .field("concurrency", &self.account.concurrency)
            .finish()
    }
}
