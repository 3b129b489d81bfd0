use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use wsgate_common::{ClientConnId, SchedTunables};
use wsgate_protocol::SessionHash;

use crate::account::Account;
use crate::continuation::ContinuationMap;
use crate::dial::Dialer;
use crate::error::{ErrorKind, TurnError};
use crate::health::{HealthRegistry, HealthSignals};
use crate::pool::account_pool::{Acquire, ReleaseReason};
use crate::pool::context::IngressContext;
use crate::pool::PoolManager;

/// How tightly a session must stay on its current account/context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StickLevel {
    L1Soft,
    L2Prefer,
    L3Hard,
}

impl StickLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StickLevel::L1Soft => "L1",
            StickLevel::L2Prefer => "L2",
            StickLevel::L3Hard => "L3",
        }
    }
}

/// Per-turn facts about the request itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnSignals {
    pub has_previous_response_id: bool,
    pub has_continuation_input: bool,
    pub store_disabled: bool,
    pub inter_turn_gap: Option<Duration>,
}

pub fn continuation_risk(signals: &TurnSignals, tunables: &SchedTunables) -> u8 {
    let mut risk = 0u8;
    if signals.has_previous_response_id {
        risk += tunables.weight_previous_response_id;
    }
    if signals.has_continuation_input {
        risk += tunables.weight_continuation_input;
    }
    if signals.store_disabled {
        risk += tunables.weight_store_false;
    }
    if signals
        .inter_turn_gap
        .is_some_and(|gap| gap < Duration::from_secs(tunables.short_gap_seconds))
    {
        risk += tunables.weight_short_gap;
    }
    risk.min(10)
}

pub fn health_risk(
    signals: &HealthSignals,
    pool_at_capacity: bool,
    tunables: &SchedTunables,
) -> u8 {
    let mut risk = 0u8;
    if signals.ws_failure_rate > tunables.ws_failure_rate_threshold {
        risk += tunables.weight_ws_failure_rate;
    }
    if signals.policy_rate > tunables.policy_rate_threshold {
        risk += tunables.weight_policy_rate;
    }
    if let (Some(p95), Some(baseline)) = (signals.p95_ttft, signals.baseline_ttft)
        && p95.as_secs_f64() > baseline.as_secs_f64() * tunables.ttft_baseline_factor
    {
        risk += tunables.weight_slow_ttft;
    }
    if pool_at_capacity {
        risk += tunables.weight_pool_at_capacity;
    }
    risk.min(10)
}

pub fn level_for(continuation_risk: u8, tunables: &SchedTunables) -> StickLevel {
    if continuation_risk >= tunables.hard_level_min_risk {
        StickLevel::L3Hard
    } else if continuation_risk > tunables.soft_level_max_risk {
        StickLevel::L2Prefer
    } else {
        StickLevel::L1Soft
    }
}

#[derive(Debug, Default)]
struct SessionState {
    hard_dwell_remaining: u32,
    migration_lock_remaining: u32,
    cooldown_until: Option<Instant>,
}

/// The plan the turn engine executes for one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnPlan {
    pub level: StickLevel,
    pub continuation_risk: u8,
    pub health_risk: u8,
    /// All scheduler-side migration preconditions hold; the engine still
    /// checks target quality and mid-rebuild state.
    pub migration_candidate: bool,
}

/// Scores every turn and damps oscillation with dwell/lock counters.
pub struct Scheduler {
    tunables: SchedTunables,
    sessions: Mutex<HashMap<SessionHash, SessionState>>,
}

impl Scheduler {
    pub fn new(tunables: SchedTunables) -> Self {
        Self {
            tunables,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn tunables(&self) -> &SchedTunables {
        &self.tunables
    }

    pub fn plan_turn(
        &self,
        session_hash: &SessionHash,
        turn: &TurnSignals,
        health: &HealthSignals,
        pool_at_capacity: bool,
    ) -> TurnPlan {
        let continuation_risk = continuation_risk(turn, &self.tunables);
        let health_risk = health_risk(health, pool_at_capacity, &self.tunables);
        let mut level = level_for(continuation_risk, &self.tunables);

        let Ok(mut sessions) = self.sessions.lock() else {
            return TurnPlan {
                level,
                continuation_risk,
                health_risk,
                migration_candidate: false,
            };
        };
        let state = sessions.entry(session_hash.clone()).or_default();

        // L3 carries a minimum dwell; L1 is raised to L2 while the
        // post-migration lock runs down.
        if level == StickLevel::L3Hard {
            state.hard_dwell_remaining = self.tunables.hard_dwell_turns;
        } else if state.hard_dwell_remaining > 0 {
            state.hard_dwell_remaining -= 1;
            level = StickLevel::L3Hard;
        } else if level == StickLevel::L1Soft && state.migration_lock_remaining > 0 {
            state.migration_lock_remaining -= 1;
            level = StickLevel::L2Prefer;
        }

        let cooling = state
            .cooldown_until
            .is_some_and(|until| Instant::now() < until);
        let migration_candidate = level == StickLevel::L1Soft
            && !turn.has_previous_response_id
            && !turn.has_continuation_input
            && !cooling
            && health_risk >= self.tunables.migration_min_health_delta;

        TurnPlan {
            level,
            continuation_risk,
            health_risk,
            migration_candidate,
        }
    }

    pub fn note_migration_committed(&self, session_hash: &SessionHash) {
        if let Ok(mut sessions) = self.sessions.lock() {
            let state = sessions.entry(session_hash.clone()).or_default();
            state.migration_lock_remaining = self.tunables.post_migration_lock_turns;
            state.cooldown_until = None;
        }
    }

    pub fn note_migration_failed(&self, session_hash: &SessionHash) {
        if let Ok(mut sessions) = self.sessions.lock() {
            let state = sessions.entry(session_hash.clone()).or_default();
            state.cooldown_until =
                Some(Instant::now() + Duration::from_secs(self.tunables.migration_cooldown_seconds));
        }
    }

    /// Pick the healthiest other account in the group, requiring a material
    /// improvement over the current account's score.
    pub fn pick_migration_target(
        &self,
        current: &Account,
        current_health_risk: u8,
        candidates: &[Arc<Account>],
        health: &HealthRegistry,
    ) -> Option<Arc<Account>> {
        candidates
            .iter()
            .filter(|candidate| candidate.account_id != current.account_id)
            .map(|candidate| {
                let signals = health.signals(&candidate.account_id);
                let risk = health_risk(&signals, false, &self.tunables);
                (candidate.clone(), risk)
            })
            .filter(|(_, risk)| {
                current_health_risk.saturating_sub(*risk) >= self.tunables.migration_min_health_delta
            })
            .min_by_key(|(_, risk)| *risk)
            .map(|(candidate, _)| candidate)
    }
}

/// Two-phase migration: warm and validate the target, then atomically repin
/// the session and drain the source. Any failure rolls back and starts the
/// migration cooldown.
#[allow(clippy::too_many_arguments)]
pub async fn two_phase_migrate(
    scheduler: &Scheduler,
    continuation: &ContinuationMap,
    pools: &PoolManager,
    dialer: &Dialer,
    session_hash: &SessionHash,
    owner: ClientConnId,
    source: Option<(&Arc<IngressContext>, Arc<Account>)>,
    target_account: Arc<Account>,
) -> Result<Arc<IngressContext>, TurnError> {
    // Phase A: warm the target context and validate its upstream.
    let target_pool = pools.pool_for(&target_account);
    let target_ctx = match target_pool
        .acquire(&target_account.group_id, session_hash, owner)
        .await
    {
        Acquire::New(ctx) | Acquire::Reuse(ctx) => ctx,
        Acquire::Busy | Acquire::Conflict => {
            scheduler.note_migration_failed(session_hash);
            return Err(TurnError::new(
                ErrorKind::PoolBusy,
                "migration target pool unavailable",
            ));
        }
    };

    let warmed = async {
        let conn = dialer.dial(&target_account).await?;
        target_ctx.store_conn(conn).await;
        match target_ctx.ping().await {
            Some(true) => Ok(()),
            _ => Err(crate::error::DialError::Network(
                "migration target failed validation ping".to_string(),
            )),
        }
    }
    .await;

    if let Err(err) = warmed {
        target_pool
            .release(&target_ctx, owner, ReleaseReason::Broken)
            .await;
        scheduler.note_migration_failed(session_hash);
        warn!(
            event = "migration_rolled_back",
            session_hash = %session_hash,
            to_account = %target_account.account_id,
            error = %err,
        );
        return Err(TurnError::from(err));
    }

    // Phase B: freeze the source, repin the session, drain the source shell.
    let from_account_id = source
        .as_ref()
        .map(|(ctx, _)| ctx.account_id.clone())
        .unwrap_or_default();
    continuation.repin_session(session_hash, &target_account.account_id);
    if let Some((source_ctx, source_account)) = source {
        if let Some(source_pool) = pools.existing_pool(&source_account.account_id) {
            source_pool
                .release(source_ctx, owner, ReleaseReason::Done)
                .await;
        } else {
            source_ctx.release_owner(owner);
        }
    }
    scheduler.note_migration_committed(session_hash);
    info!(
        event = "session_migrated",
        session_hash = %session_hash,
        from_account = %from_account_id,
        to_account = %target_account.account_id,
    );
    Ok(target_ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsgate_protocol::ResponsesRequest;

    fn session(text: &str) -> SessionHash {
        let raw = format!(r#"{{"model":"gpt-5.2","input":"{text}"}}"#);
        SessionHash::from_first_turn(&ResponsesRequest::parse(&raw).unwrap())
    }

    #[test]
    fn continuation_risk_weights() {
        let tunables = SchedTunables::default();
        let signals = TurnSignals {
            has_previous_response_id: true,
            has_continuation_input: true,
            store_disabled: true,
            inter_turn_gap: Some(Duration::from_secs(5)),
        };
        assert_eq!(continuation_risk(&signals, &tunables), 10);

        let pristine = TurnSignals::default();
        assert_eq!(continuation_risk(&pristine, &tunables), 0);
    }

    #[test]
    fn level_boundaries() {
        let tunables = SchedTunables::default();
        assert_eq!(level_for(6, &tunables), StickLevel::L3Hard);
        assert_eq!(level_for(5, &tunables), StickLevel::L2Prefer);
        assert_eq!(level_for(3, &tunables), StickLevel::L2Prefer);
        assert_eq!(level_for(2, &tunables), StickLevel::L1Soft);
    }

    #[test]
    fn hard_level_dwells_two_turns() {
        let scheduler = Scheduler::new(SchedTunables::default());
        let hash = session("dwell");
        let healthy = HealthSignals::default();

        let continuation_turn = TurnSignals {
            has_previous_response_id: true,
            has_continuation_input: true,
            ..Default::default()
        };
        let plan = scheduler.plan_turn(&hash, &continuation_turn, &healthy, false);
        assert_eq!(plan.level, StickLevel::L3Hard);

        // The next two pristine turns stay pinned hard.
        let pristine = TurnSignals::default();
        let plan = scheduler.plan_turn(&hash, &pristine, &healthy, false);
        assert_eq!(plan.level, StickLevel::L3Hard);
        let plan = scheduler.plan_turn(&hash, &pristine, &healthy, false);
        assert_eq!(plan.level, StickLevel::L3Hard);
        let plan = scheduler.plan_turn(&hash, &pristine, &healthy, false);
        assert_eq!(plan.level, StickLevel::L1Soft);
    }

    #[test]
    fn migration_lock_raises_to_l2() {
        let scheduler = Scheduler::new(SchedTunables::default());
        let hash = session("lock");
        scheduler.note_migration_committed(&hash);

        let pristine = TurnSignals::default();
        let healthy = HealthSignals::default();
        for _ in 0..3 {
            let plan = scheduler.plan_turn(&hash, &pristine, &healthy, false);
            assert_eq!(plan.level, StickLevel::L2Prefer);
            assert!(!plan.migration_candidate);
        }
        let plan = scheduler.plan_turn(&hash, &pristine, &healthy, false);
        assert_eq!(plan.level, StickLevel::L1Soft);
    }

    #[test]
    fn cooldown_suppresses_candidates() {
        let scheduler = Scheduler::new(SchedTunables::default());
        let hash = session("cooldown");
        let unhealthy = HealthSignals {
            ws_failure_rate: 1.0,
            policy_rate: 1.0,
            ..Default::default()
        };

        let plan = scheduler.plan_turn(&hash, &TurnSignals::default(), &unhealthy, true);
        assert!(plan.migration_candidate);

        scheduler.note_migration_failed(&hash);
        let plan = scheduler.plan_turn(&hash, &TurnSignals::default(), &unhealthy, true);
        assert!(!plan.migration_candidate);
    }

    #[test]
    fn target_requires_material_improvement() {
        let scheduler = Scheduler::new(SchedTunables::default());
        let health = HealthRegistry::new();
        let current = Account {
            account_id: "a1".to_string(),
            group_id: "g1".to_string(),
            credential_kind: crate::account::CredentialKind::ApiKey,
            bearer: "k".to_string(),
            concurrency: 1,
            apikey_ws_mode: None,
            oauth_ws_mode: None,
            codex_user_agent: None,
            beta_header: None,
        };
        let target = Arc::new(Account {
            account_id: "a2".to_string(),
            ..current.clone()
        });

        // Current risk 8 vs a clean target: delta is material.
        let picked = scheduler.pick_migration_target(&current, 8, &[target.clone()], &health);
        assert_eq!(picked.unwrap().account_id, "a2");

        // Current risk 2: not enough improvement to bother.
        let picked = scheduler.pick_migration_target(&current, 2, &[target], &health);
        assert!(picked.is_none());
    }
}
