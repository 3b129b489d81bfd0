pub mod relay;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use futures_util::SinkExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use wsgate_common::{ClientConnId, IngressMode};
use wsgate_protocol::{ErrorEnvelope, EventKind, ResponsesRequest, SessionHash};

use crate::account::Account;
use crate::error::{ErrorKind, TurnError};
use crate::events::{Event, TurnEvent, TurnOutcome};
use crate::lease::Lease;
use crate::pool::account_pool::{Acquire, ReleaseReason};
use crate::sched::{TurnSignals, two_phase_migrate};
use crate::state::GatewayState;
use crate::turn::relay::{RelayEnd, relay_turn};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY: u16 = 1008;
pub const CLOSE_INTERNAL: u16 = 1011;
/// Custom: pool exhausted, retry later with backoff.
pub const CLOSE_BUSY: u16 = 4290;

/// Frames the engine hands to the socket layer, in order.
#[derive(Debug)]
pub enum ClientOutbound {
    /// Upstream event relayed verbatim.
    Event(String),
    /// Gateway-authored error envelope.
    Envelope(ErrorEnvelope),
    /// Close the client socket. Terminal.
    Close { code: u16, reason: String },
}

/// One authenticated client WebSocket as the engine sees it.
#[derive(Debug, Clone)]
pub struct ClientConn {
    pub conn_id: ClientConnId,
    pub trace_id: String,
    pub account: Arc<Account>,
    pub mode: IngressMode,
}

enum TurnEnd {
    /// Turn over; the client socket stays open for the next turn.
    Continue,
    /// Engine decided to close (envelope already queued when applicable).
    Close { code: u16, reason: String },
    /// The client vanished; nothing left to send.
    ClientGone,
}

/// Drive one client WebSocket until it closes. Turns are strictly
/// serialized; contexts are always released on the way out.
pub async fn serve_client(
    state: Arc<GatewayState>,
    client: ClientConn,
    mut client_rx: mpsc::Receiver<String>,
    client_tx: mpsc::Sender<ClientOutbound>,
) {
    let mut session: Option<SessionHash> = None;
    let mut sticky_lease: Option<Lease> = None;
    let mut pending: VecDeque<String> = VecDeque::new();
    let mut last_turn_at: Option<Instant> = None;
    let mut turn_index = 0u64;
    let mut shutdown = state.shutdown_rx();

    loop {
        let frame = match pending.pop_front() {
            Some(frame) => Some(frame),
            None => {
                let read_timeout = Duration::from_secs(
                    state.config.load().openai_ws.client_read_timeout_seconds,
                );
                tokio::select! {
                    received = tokio::time::timeout(read_timeout, client_rx.recv()) => {
                        match received {
                            Ok(frame) => frame,
                            Err(_) => {
                                let _ = client_tx
                                    .send(ClientOutbound::Close {
                                        code: CLOSE_NORMAL,
                                        reason: "idle timeout".to_string(),
                                    })
                                    .await;
                                None
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        let _ = client_tx
                            .send(ClientOutbound::Close {
                                code: CLOSE_NORMAL,
                                reason: "server shutting down".to_string(),
                            })
                            .await;
                        None
                    }
                }
            }
        };
        let Some(frame) = frame else { break };

        turn_index += 1;
        let end = run_turn(
            &state,
            &client,
            frame,
            &mut session,
            &mut sticky_lease,
            &mut client_rx,
            &client_tx,
            &mut pending,
            last_turn_at,
            turn_index,
        )
        .await;
        last_turn_at = Some(Instant::now());

        match end {
            TurnEnd::Continue => {}
            TurnEnd::Close { code, reason } => {
                let _ = client_tx.send(ClientOutbound::Close { code, reason }).await;
                break;
            }
            TurnEnd::ClientGone => break,
        }
    }

    if let Some(lease) = sticky_lease.take() {
        lease.release(ReleaseReason::Done).await;
    }
    info!(
        event = "client_closed",
        trace_id = %client.trace_id,
        turns = turn_index,
    );
}

#[allow(clippy::too_many_arguments)]
async fn run_turn(
    state: &Arc<GatewayState>,
    client: &ClientConn,
    raw: String,
    session: &mut Option<SessionHash>,
    sticky_lease: &mut Option<Lease>,
    client_rx: &mut mpsc::Receiver<String>,
    client_tx: &mpsc::Sender<ClientOutbound>,
    pending: &mut VecDeque<String>,
    last_turn_at: Option<Instant>,
    turn_index: u64,
) -> TurnEnd {
    let started = Instant::now();
    let config = state.config.load();
    let ws = &config.openai_ws;

    // Phase A: validate the frame.
    let mut request = match ResponsesRequest::parse(&raw) {
        Ok(request) => request,
        Err(err) => {
            let _ = client_tx
                .send(ClientOutbound::Envelope(ErrorEnvelope::invalid_argument(
                    format!("invalid responses request: {err}"),
                )))
                .await;
            return TurnEnd::Close {
                code: CLOSE_POLICY,
                reason: "invalid request".to_string(),
            };
        }
    };

    let session_hash = session
        .get_or_insert_with(|| SessionHash::from_first_turn(&request))
        .clone();

    let signals = TurnSignals {
        has_previous_response_id: request.previous_response_id.is_some(),
        has_continuation_input: request.has_continuation_input(),
        store_disabled: request.store == Some(false),
        inter_turn_gap: last_turn_at.map(|at| at.elapsed()),
    };

    // `previous_response_id` is authoritative over session affinity. A
    // binding on an account that no longer exists degrades to a full create
    // up front; accounts never change mid-turn.
    let mut account = client.account.clone();
    let binding = request
        .previous_response_id
        .as_deref()
        .and_then(|id| state.continuation.lookup_by_response_id(id));
    if let Some(binding) = &binding {
        if binding.account_id != account.account_id {
            match state.accounts.get(&binding.account_id) {
                Some(owner) => account = owner,
                None => {
                    request = request.degrade_to_full_create();
                }
            }
        }
    } else if request.previous_response_id.is_none()
        && let Some(pinned) = state.continuation.lookup_by_session_hash(&session_hash)
        && pinned != account.account_id
        && client.mode == IngressMode::CtxPool
        && let Some(pinned_account) = state.accounts.get(&pinned)
    {
        account = pinned_account;
    }

    let health = state.health.signals(&account.account_id);
    let pool_at_capacity = match state.pools.existing_pool(&account.account_id) {
        Some(pool) => pool.at_capacity().await,
        None => false,
    };
    let plan = state
        .scheduler
        .plan_turn(&session_hash, &signals, &health, pool_at_capacity);
    info!(
        event = "turn_planned",
        trace_id = %client.trace_id,
        turn = turn_index,
        level = plan.level.as_str(),
        continuation_risk = plan.continuation_risk,
        health_risk = plan.health_risk,
        account_id = %account.account_id,
    );

    let dialer = state.dialer();

    // Phase B: acquire or prepare the upstream lease.
    let mut lease = match client.mode {
        IngressMode::CtxPool => {
            let mut migrated = None;
            if plan.migration_candidate {
                let candidates = state.accounts.group(&account.group_id);
                if let Some(target) = state.scheduler.pick_migration_target(
                    &account,
                    plan.health_risk,
                    &candidates,
                    &state.health,
                ) {
                    match two_phase_migrate(
                        &state.scheduler,
                        &state.continuation,
                        &state.pools,
                        &dialer,
                        &session_hash,
                        client.conn_id,
                        None,
                        target.clone(),
                    )
                    .await
                    {
                        Ok(ctx) => {
                            state.events.emit(Event::Migration(crate::events::MigrationEvent {
                                at: SystemTime::now(),
                                session_hash: session_hash.to_string(),
                                from_account: account.account_id.clone(),
                                to_account: target.account_id.clone(),
                                committed: true,
                            }))
                            .await;
                            let pool = state.pools.pool_for(&target);
                            account = target;
                            migrated = Some(Lease::CtxPool {
                                account: account.clone(),
                                pool,
                                ctx,
                                owner: client.conn_id,
                            });
                        }
                        Err(err) => {
                            warn!(
                                event = "migration_skipped",
                                trace_id = %client.trace_id,
                                error = %err,
                            );
                        }
                    }
                }
            }

            match migrated {
                Some(lease) => lease,
                None => {
                    let pool = state.pools.pool_for(&account);
                    let mut acquired = pool
                        .acquire(&account.group_id, &session_hash, client.conn_id)
                        .await;
                    if matches!(acquired, Acquire::Busy) {
                        // One retry after a jittered backoff; no queueing.
                        let backoff = rand::rng().random_range(50..150);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                        acquired = pool
                            .acquire(&account.group_id, &session_hash, client.conn_id)
                            .await;
                    }
                    let reason = acquired.reason();
                    match acquired {
                        Acquire::New(ctx) | Acquire::Reuse(ctx) => {
                            info!(
                                event = "ctx_acquired",
                                trace_id = %client.trace_id,
                                session_hash = %session_hash,
                                account_id = %account.account_id,
                                ctx_id = %ctx.ctx_id,
                                reason,
                            );
                            state
                                .events
                                .emit(Event::Pool(crate::events::PoolEvent::Acquired {
                                    at: SystemTime::now(),
                                    account_id: account.account_id.clone(),
                                    session_hash: session_hash.to_string(),
                                    reason: reason.to_string(),
                                }))
                                .await;
                            Lease::CtxPool {
                                account: account.clone(),
                                pool,
                                ctx,
                                owner: client.conn_id,
                            }
                        }
                        Acquire::Busy | Acquire::Conflict => {
                            let _ = client_tx
                                .send(ClientOutbound::Envelope(ErrorEnvelope::pool_busy()))
                                .await;
                            return TurnEnd::Close {
                                code: CLOSE_BUSY,
                                reason: "pool busy".to_string(),
                            };
                        }
                    }
                }
            }
        }
        IngressMode::Shared | IngressMode::Dedicated | IngressMode::Off => {
            match sticky_lease.take() {
                Some(lease) => lease,
                None if client.mode == IngressMode::Shared => Lease::Shared {
                    account: account.clone(),
                    pool: state.shared_conns.clone(),
                },
                None => Lease::Dedicated {
                    account: account.clone(),
                    pool: state.shared_conns.clone(),
                    conn: None,
                },
            }
        }
    };

    let per_turn = drive_turn(
        state,
        client,
        &mut request,
        &session_hash,
        &account,
        &mut lease,
        &dialer,
        client_rx,
        client_tx,
        pending,
        ws.upstream_read_timeout_seconds,
        ws.ctx_pool_rebuild_max_per_turn,
    )
    .await;

    // Guaranteed cleanup: per-turn leases are always released; sticky leases
    // go back in the slot unless the client is gone.
    let (end, outcome, error_kind, forwarded) = per_turn;
    match client.mode {
        IngressMode::CtxPool => {
            let reason = match (&end, outcome) {
                (TurnEnd::ClientGone, _) => ReleaseReason::ClientGone,
                (_, TurnOutcome::Errored) | (_, TurnOutcome::Failed) => ReleaseReason::Broken,
                _ => ReleaseReason::Done,
            };
            lease.release(reason).await;
            state
                .events
                .emit(Event::Pool(crate::events::PoolEvent::Released {
                    at: SystemTime::now(),
                    account_id: account.account_id.clone(),
                    session_hash: session_hash.to_string(),
                    reason: reason.as_str().to_string(),
                }))
                .await;
        }
        _ => match end {
            TurnEnd::ClientGone => lease.release(ReleaseReason::ClientGone).await,
            _ => *sticky_lease = Some(lease),
        },
    }

    state
        .events
        .emit(Event::Turn(TurnEvent {
            at: SystemTime::now(),
            trace_id: client.trace_id.clone(),
            account_id: account.account_id.clone(),
            session_hash: session_hash.to_string(),
            turn_index,
            outcome,
            error_kind,
            elapsed_ms: started.elapsed().as_millis(),
            events_forwarded: forwarded,
        }))
        .await;

    end
}

/// Phases B(dial)/C/D for one turn, including the continuation recovery
/// ladder. Returns the end state, the observable outcome, the error kind (if
/// any), and how many events reached the client.
#[allow(clippy::too_many_arguments)]
async fn drive_turn(
    state: &Arc<GatewayState>,
    client: &ClientConn,
    request: &mut ResponsesRequest,
    session_hash: &SessionHash,
    account: &Arc<Account>,
    lease: &mut Lease,
    dialer: &crate::dial::Dialer,
    client_rx: &mut mpsc::Receiver<String>,
    client_tx: &mpsc::Sender<ClientOutbound>,
    pending: &mut VecDeque<String>,
    upstream_read_timeout_seconds: u64,
    rebuild_max_per_turn: u32,
) -> (TurnEnd, TurnOutcome, Option<ErrorKind>, usize) {
    let read_timeout = Duration::from_secs(upstream_read_timeout_seconds);
    let mut transient_rebuilds = 0u32;
    let mut replayed = false;
    let mut degraded = false;
    let mut total_forwarded = 0usize;
    let mut recovered = false;

    // Phase B continued: first checkout, with one dial retry on transient
    // failure.
    let mut conn = match lease.checkout(dialer).await {
        Ok(conn) => {
            state.health.record_ws_result(&account.account_id, true);
            conn
        }
        Err(first_err) if first_err.kind == ErrorKind::UpstreamTransient => {
            state.health.record_ws_result(&account.account_id, false);
            match lease.checkout(dialer).await {
                Ok(conn) => conn,
                Err(err) => {
                    return surface_dial_failure(client_tx, err, total_forwarded).await;
                }
            }
        }
        Err(err) => {
            state.health.record_ws_result(&account.account_id, false);
            return surface_dial_failure(client_tx, err, total_forwarded).await;
        }
    };

    loop {
        let message = match request.to_upstream_message() {
            Ok(message) => message,
            Err(err) => {
                lease.checkin(conn, false).await;
                let _ = client_tx
                    .send(ClientOutbound::Envelope(ErrorEnvelope::internal(format!(
                        "request serialization failed: {err}"
                    ))))
                    .await;
                return (
                    TurnEnd::Close {
                        code: CLOSE_INTERNAL,
                        reason: "internal error".to_string(),
                    },
                    TurnOutcome::Errored,
                    Some(ErrorKind::Internal),
                    total_forwarded,
                );
            }
        };

        if let Err(err) = conn.stream.send(Message::Text(message.into())).await {
            state.health.record_ws_result(&account.account_id, false);
            lease.checkin(conn, false).await;
            if transient_rebuilds < rebuild_max_per_turn {
                transient_rebuilds += 1;
                match lease.rebuild(dialer).await {
                    Ok(fresh) => {
                        conn = fresh;
                        continue;
                    }
                    Err(rebuild_err) => {
                        return surface_turn_error(
                            client_tx,
                            client.mode,
                            rebuild_err,
                            total_forwarded,
                        )
                        .await;
                    }
                }
            }
            return surface_transient(client_tx, client.mode, err.to_string(), total_forwarded)
                .await;
        }

        let conn_id = conn.conn_id;
        let (conn_back, outcome) = relay_turn(
            conn,
            client_tx,
            client_rx,
            read_timeout,
            state.shutdown_rx(),
        )
        .await;
        total_forwarded += outcome.forwarded;
        pending.extend(outcome.pending_client_frames);
        if let Some(ttft) = outcome.ttft {
            state.health.record_ttft(&account.account_id, ttft);
        }

        match outcome.end {
            RelayEnd::Terminal(meta) => match meta.kind {
                Some(EventKind::Completed) => {
                    state.health.record_ws_result(&account.account_id, true);
                    if let Some(response_id) = &meta.response_id {
                        state.continuation.bind_response(
                            response_id,
                            conn_id,
                            session_hash,
                            &account.account_id,
                        );
                        if let Some(ctx) = lease.ctx() {
                            ctx.note_response(response_id);
                            ctx.note_prompt_cache_key(request.prompt_cache_key.as_deref());
                        }
                    }
                    state.continuation.touch_session(session_hash);
                    match conn_back {
                        Some(conn) => lease.checkin(conn, true).await,
                        None => {
                            if let Some(ctx) = lease.ctx() {
                                ctx.mark_broken();
                            }
                        }
                    }
                    let outcome = if recovered {
                        TurnOutcome::Recovered
                    } else {
                        TurnOutcome::Completed
                    };
                    return (TurnEnd::Continue, outcome, None, total_forwarded);
                }
                Some(EventKind::Failed) => {
                    // Business-level failure: the stream terminated cleanly,
                    // the connection is still good.
                    state.health.record_ws_result(&account.account_id, true);
                    match conn_back {
                        Some(conn) => lease.checkin(conn, true).await,
                        None => {
                            if let Some(ctx) = lease.ctx() {
                                ctx.mark_broken();
                            }
                        }
                    }
                    return (
                        TurnEnd::Continue,
                        TurnOutcome::Completed,
                        None,
                        total_forwarded,
                    );
                }
                Some(EventKind::ContinuationUnavailable) => {
                    state.health.record_policy_error(&account.account_id);
                    state.continuation.evict_connection(conn_id);
                    if let Some(conn) = conn_back {
                        lease.checkin(conn, false).await;
                    } else if let Some(ctx) = lease.ctx() {
                        ctx.mark_broken();
                    }

                    // Recovery ladder: replay once on a rebuilt upstream,
                    // then degrade to a full create, then give up.
                    if !replayed {
                        replayed = true;
                        recovered = true;
                    } else if !degraded {
                        degraded = true;
                        *request = request.degrade_to_full_create();
                    } else {
                        let _ = client_tx
                            .send(ClientOutbound::Envelope(ErrorEnvelope::new(
                                CLOSE_POLICY,
                                wsgate_protocol::ErrorStatus::PermissionDenied,
                                "continuation unavailable and full-create replay failed",
                            )))
                            .await;
                        return (
                            TurnEnd::Close {
                                code: CLOSE_POLICY,
                                reason: "continuation unrecoverable".to_string(),
                            },
                            TurnOutcome::Failed,
                            Some(ErrorKind::ContinuationUnavailable),
                            total_forwarded,
                        );
                    }
                    match lease.rebuild(dialer).await {
                        Ok(fresh) => {
                            conn = fresh;
                            continue;
                        }
                        Err(err) => {
                            let _ = client_tx
                                .send(ClientOutbound::Envelope(ErrorEnvelope::unavailable(
                                    err.to_string(),
                                )))
                                .await;
                            return (
                                TurnEnd::Close {
                                    code: CLOSE_POLICY,
                                    reason: "continuation rebuild failed".to_string(),
                                },
                                TurnOutcome::Failed,
                                Some(ErrorKind::ContinuationUnavailable),
                                total_forwarded,
                            );
                        }
                    }
                }
                Some(EventKind::Error) => {
                    // The error event is already on its way to the client.
                    // Mark the upstream broken immediately; do not wait for a
                    // read timeout. The client socket stays open and the next
                    // turn rebuilds.
                    state.health.record_ws_result(&account.account_id, false);
                    state.continuation.evict_connection(conn_id);
                    if let Some(conn) = conn_back {
                        lease.checkin(conn, false).await;
                    } else if let Some(ctx) = lease.ctx() {
                        ctx.mark_broken();
                    }
                    return (
                        TurnEnd::Continue,
                        TurnOutcome::Errored,
                        Some(ErrorKind::UpstreamErrorEvent),
                        total_forwarded,
                    );
                }
                Some(EventKind::Progress) | None => {
                    // Terminal relays always carry a classified kind.
                    return (
                        TurnEnd::Close {
                            code: CLOSE_INTERNAL,
                            reason: "unclassified terminal event".to_string(),
                        },
                        TurnOutcome::Errored,
                        Some(ErrorKind::Internal),
                        total_forwarded,
                    );
                }
            },
            RelayEnd::ClientGone => {
                if let Some(conn) = conn_back {
                    // Mid-response state is unrecoverable; drop the socket.
                    conn.close().await;
                }
                state.continuation.evict_connection(conn_id);
                return (
                    TurnEnd::ClientGone,
                    TurnOutcome::ClientGone,
                    None,
                    total_forwarded,
                );
            }
            RelayEnd::UpstreamTimeout | RelayEnd::UpstreamLost(_) => {
                let detail = match outcome.end {
                    RelayEnd::UpstreamLost(ref message) => message.clone(),
                    _ => "upstream read timeout".to_string(),
                };
                state.health.record_ws_result(&account.account_id, false);
                state.continuation.evict_connection(conn_id);
                if let Some(conn) = conn_back {
                    lease.checkin(conn, false).await;
                } else if let Some(ctx) = lease.ctx() {
                    ctx.mark_broken();
                }

                // Retry only when nothing reached the client yet; a partial
                // stream cannot be replayed without duplicating events.
                if outcome.forwarded == 0 && transient_rebuilds < rebuild_max_per_turn {
                    transient_rebuilds += 1;
                    match lease.rebuild(dialer).await {
                        Ok(fresh) => {
                            recovered = true;
                            conn = fresh;
                            continue;
                        }
                        Err(err) => {
                            return surface_turn_error(
                                client_tx,
                                client.mode,
                                err,
                                total_forwarded,
                            )
                            .await;
                        }
                    }
                }
                return surface_transient(client_tx, client.mode, detail, total_forwarded).await;
            }
            RelayEnd::Shutdown => {
                if let Some(conn) = conn_back {
                    conn.close().await;
                }
                return (
                    TurnEnd::Close {
                        code: CLOSE_NORMAL,
                        reason: "server shutting down".to_string(),
                    },
                    TurnOutcome::ClientGone,
                    None,
                    total_forwarded,
                );
            }
        }
    }
}

async fn surface_dial_failure(
    client_tx: &mpsc::Sender<ClientOutbound>,
    err: TurnError,
    forwarded: usize,
) -> (TurnEnd, TurnOutcome, Option<ErrorKind>, usize) {
    let (envelope, end) = match err.kind {
        ErrorKind::Auth => (
            ErrorEnvelope::unauthenticated(err.message.clone()),
            TurnEnd::Close {
                code: CLOSE_POLICY,
                reason: "upstream auth failed".to_string(),
            },
        ),
        ErrorKind::RateLimited => (
            ErrorEnvelope::resource_exhausted(429, err.message.clone()),
            TurnEnd::Close {
                code: CLOSE_NORMAL,
                reason: "upstream rate limited".to_string(),
            },
        ),
        _ => (
            ErrorEnvelope::unavailable(err.message.clone()),
            TurnEnd::Close {
                code: CLOSE_NORMAL,
                reason: "upstream unavailable".to_string(),
            },
        ),
    };
    let _ = client_tx.send(ClientOutbound::Envelope(envelope)).await;
    (end, TurnOutcome::Failed, Some(err.kind), forwarded)
}

/// Map a classified mid-turn failure to its user-visible shape. Invariant
/// violations close 1011; credential failures close 1008; everything else
/// follows the transient policy.
async fn surface_turn_error(
    client_tx: &mpsc::Sender<ClientOutbound>,
    mode: IngressMode,
    err: TurnError,
    forwarded: usize,
) -> (TurnEnd, TurnOutcome, Option<ErrorKind>, usize) {
    match err.kind {
        ErrorKind::Internal => {
            let _ = client_tx
                .send(ClientOutbound::Envelope(ErrorEnvelope::internal(
                    err.message.clone(),
                )))
                .await;
            (
                TurnEnd::Close {
                    code: CLOSE_INTERNAL,
                    reason: "internal error".to_string(),
                },
                TurnOutcome::Errored,
                Some(ErrorKind::Internal),
                forwarded,
            )
        }
        ErrorKind::Auth | ErrorKind::RateLimited => {
            surface_dial_failure(client_tx, err, forwarded).await
        }
        _ => surface_transient(client_tx, mode, err.message, forwarded).await,
    }
}

/// `upstream_transient` once retries are spent: in `ctx_pool` the client
/// socket survives and the next turn rebuilds; elsewhere close and let the
/// client reconnect.
async fn surface_transient(
    client_tx: &mpsc::Sender<ClientOutbound>,
    mode: IngressMode,
    detail: String,
    forwarded: usize,
) -> (TurnEnd, TurnOutcome, Option<ErrorKind>, usize) {
    let _ = client_tx
        .send(ClientOutbound::Envelope(ErrorEnvelope::unavailable(detail)))
        .await;
    let end = if mode == IngressMode::CtxPool {
        TurnEnd::Continue
    } else {
        TurnEnd::Close {
            code: CLOSE_NORMAL,
            reason: "upstream unavailable".to_string(),
        }
    };
    (
        end,
        TurnOutcome::Failed,
        Some(ErrorKind::UpstreamTransient),
        forwarded,
    )
}
