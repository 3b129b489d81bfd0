use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use wsgate_common::{ClientConnId, owner_from_slot};
use wsgate_protocol::SessionHash;

use crate::dial::UpstreamConn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    Disconnected,
    Connected,
    Broken,
}

impl UpstreamState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => UpstreamState::Connected,
            2 => UpstreamState::Broken,
            _ => UpstreamState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            UpstreamState::Disconnected => 0,
            UpstreamState::Connected => 1,
            UpstreamState::Broken => 2,
        }
    }
}

/// A per-session shell owning one upstream connection.
///
/// Invariants: at most one owner at any moment (CAS on the owner slot);
/// `account_id` never changes after creation; the upstream may only be
/// rebuilt while an owner holds the context.
pub struct IngressContext {
    pub ctx_id: Uuid,
    pub group_id: String,
    pub account_id: String,
    pub session_hash: SessionHash,
    /// 0 = no owner; otherwise the owning client conn id.
    owner: AtomicU64,
    owner_since: Mutex<Option<Instant>>,
    conn: AsyncMutex<Option<UpstreamConn>>,
    upstream_state: AtomicU8,
    last_response_id: Mutex<Option<String>>,
    prompt_cache_key: Mutex<Option<String>>,
    rebuilds: AtomicU32,
    pub created_at: Instant,
    last_used: Mutex<Instant>,
}

impl IngressContext {
    pub fn new(group_id: &str, account_id: &str, session_hash: SessionHash) -> Self {
        Self {
            ctx_id: Uuid::new_v4(),
            group_id: group_id.to_string(),
            account_id: account_id.to_string(),
            session_hash,
            owner: AtomicU64::new(0),
            owner_since: Mutex::new(None),
            conn: AsyncMutex::new(None),
            upstream_state: AtomicU8::new(UpstreamState::Disconnected.as_u8()),
            last_response_id: Mutex::new(None),
            prompt_cache_key: Mutex::new(None),
            rebuilds: AtomicU32::new(0),
            created_at: Instant::now(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn try_bind_owner(&self, owner: ClientConnId) -> bool {
        let bound = self
            .owner
            .compare_exchange(0, owner.as_u64(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if bound
            && let Ok(mut since) = self.owner_since.lock()
        {
            *since = Some(Instant::now());
        }
        bound
    }

    /// Clear the owner slot iff it is still held by `owner`. Idempotent: a
    /// second release by the same owner is a no-op.
    pub fn release_owner(&self, owner: ClientConnId) -> bool {
        let released = self
            .owner
            .compare_exchange(owner.as_u64(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released
            && let Ok(mut since) = self.owner_since.lock()
        {
            *since = None;
        }
        released
    }

    /// Unconditional owner reset, used when reclaiming from a stale owner.
    pub fn force_clear_owner(&self) {
        self.owner.store(0, Ordering::Release);
        if let Ok(mut since) = self.owner_since.lock() {
            *since = None;
        }
    }

    pub fn owner(&self) -> Option<ClientConnId> {
        owner_from_slot(self.owner.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.owner.load(Ordering::Acquire) == 0
    }

    pub fn owner_held_longer_than(&self, stale_after: Duration) -> bool {
        let Ok(since) = self.owner_since.lock() else {
            return false;
        };
        since.is_some_and(|at| at.elapsed() >= stale_after)
    }

    pub fn upstream_state(&self) -> UpstreamState {
        UpstreamState::from_u8(self.upstream_state.load(Ordering::Acquire))
    }

    pub fn set_upstream_state(&self, state: UpstreamState) {
        self.upstream_state.store(state.as_u8(), Ordering::Release);
    }

    pub fn mark_broken(&self) {
        self.set_upstream_state(UpstreamState::Broken);
    }

    /// Borrow the upstream for one turn. The caller must put it back with
    /// [`store_conn`] (healthy) or drop it after [`mark_broken`].
    pub async fn take_conn(&self) -> Option<UpstreamConn> {
        self.conn.lock().await.take()
    }

    pub async fn store_conn(&self, mut conn: UpstreamConn) {
        conn.touch();
        *self.conn.lock().await = Some(conn);
        self.set_upstream_state(UpstreamState::Connected);
    }

    /// Close and drop the upstream, leaving the shell for repopulation.
    pub async fn discard_conn(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
        }
        if self.upstream_state() == UpstreamState::Connected {
            self.set_upstream_state(UpstreamState::Disconnected);
        }
    }

    pub async fn upstream_age(&self) -> Option<Duration> {
        self.conn.lock().await.as_ref().map(|conn| conn.age())
    }

    pub async fn upstream_conn_id(&self) -> Option<wsgate_common::UpstreamConnId> {
        self.conn.lock().await.as_ref().map(|conn| conn.conn_id)
    }

    /// Sweeper-side liveness probe; skips (returns None) while a turn holds
    /// the connection out of the slot.
    pub(crate) async fn ping(&self) -> Option<bool> {
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut()?;
        Some(conn.stream.send(Message::Ping(Vec::new().into())).await.is_ok())
    }

    pub fn note_response(&self, response_id: &str) {
        if let Ok(mut last) = self.last_response_id.lock() {
            *last = Some(response_id.to_string());
        }
    }

    pub fn last_response_id(&self) -> Option<String> {
        self.last_response_id.lock().ok().and_then(|last| last.clone())
    }

    pub fn note_prompt_cache_key(&self, key: Option<&str>) {
        if let Ok(mut cache_key) = self.prompt_cache_key.lock() {
            *cache_key = key.map(|k| k.to_string());
        }
    }

    pub fn prompt_cache_key(&self) -> Option<String> {
        self.prompt_cache_key.lock().ok().and_then(|key| key.clone())
    }

    pub fn record_rebuild(&self) -> u32 {
        self.rebuilds.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn rebuild_count(&self) -> u32 {
        self.rebuilds.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        if let Ok(mut last) = self.last_used.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for IngressContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressContext")
            .field("ctx_id", &self.ctx_id)
            .field("account_id", &self.account_id)
            .field("session_hash", &self.session_hash.as_str())
            .field("owner", &self.owner())
            .field("upstream_state", &self.upstream_state())
            .field("rebuilds", &self.rebuild_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsgate_protocol::ResponsesRequest;

    fn ctx() -> IngressContext {
        let request = ResponsesRequest::parse(r#"{"model":"gpt-5.2","input":"hi"}"#).unwrap();
        IngressContext::new("g1", "a1", SessionHash::from_first_turn(&request))
    }

    #[test]
    fn single_owner_cas() {
        let ctx = ctx();
        let first = ClientConnId::new();
        let second = ClientConnId::new();

        assert!(ctx.try_bind_owner(first));
        assert!(!ctx.try_bind_owner(second));
        assert_eq!(ctx.owner(), Some(first));

        // Releasing with the wrong owner must not clear the slot.
        assert!(!ctx.release_owner(second));
        assert_eq!(ctx.owner(), Some(first));

        assert!(ctx.release_owner(first));
        assert!(ctx.is_idle());
        assert!(ctx.try_bind_owner(second));
    }

    #[test]
    fn release_is_idempotent() {
        let ctx = ctx();
        let owner = ClientConnId::new();
        assert!(ctx.try_bind_owner(owner));
        assert!(ctx.release_owner(owner));
        assert!(!ctx.release_owner(owner));
        assert!(ctx.is_idle());
    }

    #[test]
    fn state_transitions() {
        let ctx = ctx();
        assert_eq!(ctx.upstream_state(), UpstreamState::Disconnected);
        ctx.set_upstream_state(UpstreamState::Connected);
        ctx.mark_broken();
        assert_eq!(ctx.upstream_state(), UpstreamState::Broken);
    }
}
