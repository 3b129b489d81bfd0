use std::sync::Arc;
use std::time::{Duration, Instant};

use wsgate_common::{ClientConnId, UpstreamConnId};
use wsgate_core::account::{Account, CredentialKind};
use wsgate_core::dial::UpstreamConn;
use wsgate_core::pool::account_pool::{AccountPool, Acquire, PoolTuning, ReleaseReason};
use wsgate_core::pool::context::UpstreamState;
use wsgate_protocol::{ResponsesRequest, SessionHash};

fn account(concurrency: usize) -> Arc<Account> {
    Arc::new(Account {
        account_id: "acct-1".to_string(),
        group_id: "group-1".to_string(),
        credential_kind: CredentialKind::ApiKey,
        bearer: "sk-test".to_string(),
        concurrency,
        apikey_ws_mode: None,
        oauth_ws_mode: None,
        codex_user_agent: None,
        beta_header: None,
    })
}

fn tuning() -> PoolTuning {
    PoolTuning {
        idle_ttl: Duration::from_secs(600),
        owner_stale: Duration::from_secs(120),
        rotate_after: Duration::from_secs(55 * 60),
        sweep_interval: Duration::from_secs(30),
        idle_ping_enabled: false,
    }
}

fn session(text: &str) -> SessionHash {
    let raw = format!(r#"{{"model":"gpt-5.2","input":"{text}"}}"#);
    SessionHash::from_first_turn(&ResponsesRequest::parse(&raw).unwrap())
}

async fn live_conn() -> UpstreamConn {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(tcp).await.unwrap()
    });
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    // Keep the server half alive long enough for the test body.
    tokio::spawn(async move {
        let ws = server.await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(ws);
    });
    UpstreamConn {
        conn_id: UpstreamConnId::new(),
        stream,
        created_at: Instant::now(),
        last_used: Instant::now(),
    }
}

#[tokio::test]
async fn acquire_release_acquire_reuses() {
    let pool = AccountPool::new(account(4), tuning());
    let hash = session("s1");
    let owner = ClientConnId::new();

    let Acquire::New(ctx) = pool.acquire("group-1", &hash, owner).await else {
        panic!("expected new context");
    };
    pool.release(&ctx, owner, ReleaseReason::Done).await;

    let next_owner = ClientConnId::new();
    match pool.acquire("group-1", &hash, next_owner).await {
        Acquire::Reuse(reused) => assert_eq!(reused.ctx_id, ctx.ctx_id),
        other => panic!("expected reuse, got {}", other.reason()),
    }
}

#[tokio::test]
async fn capacity_is_a_hard_bound() {
    let pool = AccountPool::new(account(2), tuning());
    let owner = ClientConnId::new();

    assert!(matches!(
        pool.acquire("group-1", &session("s1"), ClientConnId::new()).await,
        Acquire::New(_)
    ));
    assert!(matches!(
        pool.acquire("group-1", &session("s2"), ClientConnId::new()).await,
        Acquire::New(_)
    ));
    assert_eq!(pool.len().await, 2);

    // The (C+1)-th distinct session gets busy, not a third context.
    assert!(matches!(
        pool.acquire("group-1", &session("s3"), owner).await,
        Acquire::Busy
    ));
    assert_eq!(pool.len().await, 2);
}

#[tokio::test]
async fn capacity_frees_after_idle_expiry() {
    let mut tuning = tuning();
    tuning.idle_ttl = Duration::from_millis(30);
    let pool = AccountPool::new(account(1), tuning);

    let owner = ClientConnId::new();
    let Acquire::New(ctx) = pool.acquire("group-1", &session("s1"), owner).await else {
        panic!("expected new context");
    };
    pool.release(&ctx, owner, ReleaseReason::Done).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    // Over-capacity acquire reclaims the idle-expired shell.
    match pool.acquire("group-1", &session("s2"), ClientConnId::new()).await {
        Acquire::New(_) => {}
        other => panic!("expected new after expiry, got {}", other.reason()),
    }
    assert_eq!(pool.len().await, 1);
}

#[tokio::test]
async fn second_owner_of_live_session_is_busy() {
    let pool = AccountPool::new(account(4), tuning());
    let hash = session("s1");

    let Acquire::New(_ctx) = pool.acquire("group-1", &hash, ClientConnId::new()).await else {
        panic!("expected new context");
    };
    assert!(matches!(
        pool.acquire("group-1", &hash, ClientConnId::new()).await,
        Acquire::Busy
    ));
}

#[tokio::test]
async fn stale_owner_is_reclaimed() {
    let mut tuning = tuning();
    tuning.owner_stale = Duration::from_millis(20);
    let pool = AccountPool::new(account(4), tuning);
    let hash = session("s1");

    let Acquire::New(ctx) = pool.acquire("group-1", &hash, ClientConnId::new()).await else {
        panic!("expected new context");
    };
    tokio::time::sleep(Duration::from_millis(40)).await;

    let rescuer = ClientConnId::new();
    match pool.acquire("group-1", &hash, rescuer).await {
        Acquire::Reuse(reclaimed) => {
            assert_eq!(reclaimed.ctx_id, ctx.ctx_id);
            assert_eq!(reclaimed.owner(), Some(rescuer));
            assert_eq!(reclaimed.upstream_state(), UpstreamState::Broken);
        }
        other => panic!("expected reclaim as reuse, got {}", other.reason()),
    }
}

#[tokio::test]
async fn group_mismatch_is_a_conflict() {
    let pool = AccountPool::new(account(4), tuning());
    let hash = session("s1");

    let Acquire::New(_ctx) = pool.acquire("group-1", &hash, ClientConnId::new()).await else {
        panic!("expected new context");
    };
    assert!(matches!(
        pool.acquire("group-2", &hash, ClientConnId::new()).await,
        Acquire::Conflict
    ));
}

#[tokio::test]
async fn account_id_is_immutable_for_context_lifetime() {
    let pool = AccountPool::new(account(4), tuning());
    let owner = ClientConnId::new();
    let hash = session("s1");

    let Acquire::New(ctx) = pool.acquire("group-1", &hash, owner).await else {
        panic!("expected new context");
    };
    let before = ctx.account_id.clone();
    pool.release(&ctx, owner, ReleaseReason::Broken).await;
    let next_owner = ClientConnId::new();
    let Acquire::Reuse(again) = pool.acquire("group-1", &hash, next_owner).await else {
        panic!("expected reuse");
    };
    assert_eq!(again.account_id, before);
}

#[tokio::test]
async fn sweep_evicts_idle_expired_shells() {
    let mut tuning = tuning();
    tuning.idle_ttl = Duration::from_millis(20);
    let pool = AccountPool::new(account(4), tuning);

    let owner = ClientConnId::new();
    let Acquire::New(ctx) = pool.acquire("group-1", &session("s1"), owner).await else {
        panic!("expected new context");
    };
    pool.release(&ctx, owner, ReleaseReason::Done).await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    let report = pool.sweep().await;
    assert_eq!(report.evicted, 1);
    assert_eq!(pool.len().await, 0);
}

#[tokio::test]
async fn sweep_does_not_evict_owned_contexts() {
    let mut tuning = tuning();
    tuning.idle_ttl = Duration::from_millis(20);
    let pool = AccountPool::new(account(4), tuning);

    let Acquire::New(_ctx) = pool
        .acquire("group-1", &session("s1"), ClientConnId::new())
        .await
    else {
        panic!("expected new context");
    };
    tokio::time::sleep(Duration::from_millis(40)).await;

    let report = pool.sweep().await;
    assert_eq!(report.evicted, 0);
    assert_eq!(pool.len().await, 1);
}

#[tokio::test]
async fn sweep_rotates_aging_upstreams() {
    let mut tuning = tuning();
    tuning.rotate_after = Duration::from_secs(55 * 60);
    let pool = AccountPool::new(account(4), tuning);

    let owner = ClientConnId::new();
    let Acquire::New(ctx) = pool.acquire("group-1", &session("s1"), owner).await else {
        panic!("expected new context");
    };
    let mut conn = live_conn().await;
    // 56 minutes old: past the rotation margin, still inside the upstream's
    // 60-minute hard limit.
    conn.created_at = Instant::now() - Duration::from_secs(56 * 60);
    ctx.store_conn(conn).await;
    pool.release(&ctx, owner, ReleaseReason::Done).await;

    let report = pool.sweep().await;
    assert_eq!(report.rotated, 1);
    assert_eq!(ctx.upstream_state(), UpstreamState::Broken);
    assert!(ctx.upstream_age().await.is_none());

    // The shell survives for the next turn to rebuild.
    assert_eq!(pool.len().await, 1);
}
