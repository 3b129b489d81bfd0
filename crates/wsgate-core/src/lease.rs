use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use wsgate_common::{ClientConnId, IngressMode};

use crate::account::Account;
use crate::dial::{Dialer, UpstreamConn};
use crate::error::TurnError;
use crate::pool::account_pool::{AccountPool, ReleaseReason};
use crate::pool::context::IngressContext;
use crate::pool::rebuild_upstream;

/// Bounded pool of idle upstream connections, bucketed per account. Serves
/// `shared` mode turns and receives `dedicated` connections back on healthy
/// client close. Stale entries are lazily evicted on checkout.
pub struct SharedConnPool {
    idle: Mutex<HashMap<String, Vec<UpstreamConn>>>,
    max_idle_per_account: usize,
    idle_ttl: Duration,
    max_lifetime: Duration,
}

impl SharedConnPool {
    pub fn new(max_idle_per_account: usize, idle_ttl: Duration, max_lifetime: Duration) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_idle_per_account,
            idle_ttl,
            max_lifetime,
        }
    }

    pub async fn checkout(&self, account_id: &str) -> Option<UpstreamConn> {
        let mut idle = self.idle.lock().await;
        let bucket = idle.get_mut(account_id)?;
        while let Some(conn) = bucket.pop() {
            if conn.last_used.elapsed() >= self.idle_ttl || conn.age() >= self.max_lifetime {
                debug!(event = "shared_conn_dropped_stale", account_id);
                continue;
            }
            if bucket.is_empty() {
                idle.remove(account_id);
            }
            return Some(conn);
        }
        idle.remove(account_id);
        None
    }

    pub async fn checkin(&self, account_id: &str, mut conn: UpstreamConn) {
        if conn.age() >= self.max_lifetime {
            return;
        }
        conn.touch();
        let mut idle = self.idle.lock().await;
        let bucket = idle.entry(account_id.to_string()).or_default();
        if bucket.len() >= self.max_idle_per_account {
            bucket.remove(0);
        }
        bucket.push(conn);
    }

    pub async fn idle_len(&self, account_id: &str) -> usize {
        self.idle
            .lock()
            .await
            .get(account_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// What the turn engine holds while it drives one client connection. The
/// variant is fixed at construction; the hot path is a plain match.
pub enum Lease {
    /// Borrow from the global pool; no affinity beyond the current turn.
    Shared {
        account: Arc<Account>,
        pool: Arc<SharedConnPool>,
    },
    /// Per-client sticky connection, returned to the shared pool on healthy
    /// client close.
    Dedicated {
        account: Arc<Account>,
        pool: Arc<SharedConnPool>,
        conn: Option<UpstreamConn>,
    },
    /// A context-pool shell owned for as long as this client drives the
    /// session.
    CtxPool {
        account: Arc<Account>,
        pool: Arc<AccountPool>,
        ctx: Arc<IngressContext>,
        owner: ClientConnId,
    },
}

impl Lease {
    pub fn mode(&self) -> IngressMode {
        match self {
            Lease::Shared { .. } => IngressMode::Shared,
            Lease::Dedicated { .. } => IngressMode::Dedicated,
            Lease::CtxPool { .. } => IngressMode::CtxPool,
        }
    }

    pub fn account(&self) -> &Arc<Account> {
        match self {
            Lease::Shared { account, .. }
            | Lease::Dedicated { account, .. }
            | Lease::CtxPool { account, .. } => account,
        }
    }

    pub fn ctx(&self) -> Option<&Arc<IngressContext>> {
        match self {
            Lease::CtxPool { ctx, .. } => Some(ctx),
            _ => None,
        }
    }

    /// Hand out the upstream connection for one turn, dialing when the lease
    /// has none (or only a broken one).
    pub async fn checkout(&mut self, dialer: &Dialer) -> Result<UpstreamConn, TurnError> {
        match self {
            Lease::Shared { account, pool } => {
                if let Some(conn) = pool.checkout(&account.account_id).await {
                    return Ok(conn);
                }
                Ok(dialer.dial(account).await?)
            }
            Lease::Dedicated {
                account,
                pool,
                conn,
            } => {
                if let Some(conn) = conn.take() {
                    return Ok(conn);
                }
                if let Some(conn) = pool.checkout(&account.account_id).await {
                    return Ok(conn);
                }
                Ok(dialer.dial(account).await?)
            }
            Lease::CtxPool {
                account,
                pool,
                ctx,
                ..
            } => {
                use crate::pool::context::UpstreamState;
                if ctx.upstream_state() == UpstreamState::Connected
                    && let Some(conn) = ctx.take_conn().await
                {
                    // Refuse connections past the rotation margin even if the
                    // sweeper has not caught them yet.
                    if conn.age() < pool.tuning().rotate_after {
                        return Ok(conn);
                    }
                    conn.close().await;
                }
                ctx.discard_conn().await;
                let conn = dialer.dial(account).await?;
                ctx.set_upstream_state(UpstreamState::Connected);
                Ok(conn)
            }
        }
    }

    /// Return the turn's connection. Broken connections are closed and the
    /// lease is left ready to rebuild.
    pub async fn checkin(&mut self, turn_conn: UpstreamConn, healthy: bool) {
        if !healthy {
            if let Lease::CtxPool { ctx, .. } = self {
                ctx.mark_broken();
            }
            turn_conn.close().await;
            return;
        }
        match self {
            Lease::Shared { account, pool } => {
                pool.checkin(&account.account_id, turn_conn).await;
            }
            Lease::Dedicated { conn, .. } => {
                *conn = Some(turn_conn);
            }
            Lease::CtxPool { ctx, .. } => {
                ctx.store_conn(turn_conn).await;
            }
        }
    }

    /// Replace a broken upstream with a fresh one. In `ctx_pool` the rebuild
    /// happens inside the context so the rebuild counter and owner check
    /// apply; elsewhere it is simply a fresh dial.
    pub async fn rebuild(&mut self, dialer: &Dialer) -> Result<UpstreamConn, TurnError> {
        match self {
            Lease::Shared { account, .. } | Lease::Dedicated { account, .. } => {
                Ok(dialer.dial(account).await?)
            }
            Lease::CtxPool {
                account,
                ctx,
                owner,
                ..
            } => {
                rebuild_upstream(ctx, *owner, dialer, account).await?;
                ctx.take_conn().await.ok_or_else(|| {
                    TurnError::internal("rebuilt upstream vanished before checkout")
                })
            }
        }
    }

    /// End-of-connection cleanup. Idempotent with respect to the owner slot.
    pub async fn release(self, reason: ReleaseReason) {
        match self {
            Lease::Shared { .. } => {}
            Lease::Dedicated {
                account,
                pool,
                conn,
            } => {
                if reason == ReleaseReason::Done
                    && let Some(conn) = conn
                {
                    pool.checkin(&account.account_id, conn).await;
                }
            }
            Lease::CtxPool {
                pool, ctx, owner, ..
            } => {
                pool.release(&ctx, owner, reason).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wsgate_common::UpstreamConnId;

    async fn ws_pair() -> crate::dial::WsStream {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(tcp).await.unwrap()
        });
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let _server = server.await.unwrap();
        client
    }

    fn conn(stream: crate::dial::WsStream) -> UpstreamConn {
        UpstreamConn {
            conn_id: UpstreamConnId::new(),
            stream,
            created_at: Instant::now(),
            last_used: Instant::now(),
        }
    }

    #[tokio::test]
    async fn checkout_empty_returns_none() {
        let pool = SharedConnPool::new(4, Duration::from_secs(60), Duration::from_secs(3300));
        assert!(pool.checkout("a1").await.is_none());
    }

    #[tokio::test]
    async fn checkin_then_checkout_same_account_only() {
        let pool = SharedConnPool::new(4, Duration::from_secs(60), Duration::from_secs(3300));
        pool.checkin("a1", conn(ws_pair().await)).await;

        assert!(pool.checkout("a2").await.is_none());
        assert!(pool.checkout("a1").await.is_some());
        assert!(pool.checkout("a1").await.is_none());
    }

    #[tokio::test]
    async fn lifetime_expired_conn_not_stored() {
        let pool = SharedConnPool::new(4, Duration::from_secs(60), Duration::from_secs(3300));
        let mut old = conn(ws_pair().await);
        old.created_at = Instant::now() - Duration::from_secs(3301);
        pool.checkin("a1", old).await;
        assert_eq!(pool.idle_len("a1").await, 0);
    }

    #[tokio::test]
    async fn per_account_cap_drops_oldest() {
        let pool = SharedConnPool::new(2, Duration::from_secs(60), Duration::from_secs(3300));
        for _ in 0..4 {
            pool.checkin("a1", conn(ws_pair().await)).await;
        }
        assert_eq!(pool.idle_len("a1").await, 2);
    }
}
