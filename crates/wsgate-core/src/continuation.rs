use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use wsgate_common::UpstreamConnId;
use wsgate_protocol::SessionHash;

/// Where a completed `response_id` lives.
#[derive(Debug, Clone)]
pub struct ResponseBinding {
    pub conn_id: UpstreamConnId,
    pub account_id: String,
    pub session_hash: SessionHash,
}

#[derive(Debug, Clone)]
struct TimedResponse {
    binding: ResponseBinding,
    touched: Instant,
}

#[derive(Debug, Clone)]
struct TimedSession {
    account_id: String,
    touched: Instant,
}

#[derive(Default)]
struct Inner {
    by_response: HashMap<String, TimedResponse>,
    by_session: HashMap<SessionHash, TimedSession>,
}

/// The two short-TTL mappings behind session affinity:
/// `response_id -> conn` and `session_hash -> account`.
///
/// Writer-wins; readers tolerate stale entries via the rebuild path, so
/// entries expire lazily on access and are pruned opportunistically on write.
pub struct ContinuationMap {
    ttl: Duration,
    inner: RwLock<Inner>,
}

impl ContinuationMap {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Called at each turn's successful completion.
    pub fn bind_response(
        &self,
        response_id: &str,
        conn_id: UpstreamConnId,
        session_hash: &SessionHash,
        account_id: &str,
    ) {
        let now = Instant::now();
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        prune(&mut inner, now, self.ttl);
        inner.by_response.insert(
            response_id.to_string(),
            TimedResponse {
                binding: ResponseBinding {
                    conn_id,
                    account_id: account_id.to_string(),
                    session_hash: session_hash.clone(),
                },
                touched: now,
            },
        );
        inner.by_session.insert(
            session_hash.clone(),
            TimedSession {
                account_id: account_id.to_string(),
                touched: now,
            },
        );
    }

    pub fn lookup_by_response_id(&self, response_id: &str) -> Option<ResponseBinding> {
        let now = Instant::now();
        let inner = self.inner.read().ok()?;
        let entry = inner.by_response.get(response_id)?;
        if now.duration_since(entry.touched) >= self.ttl {
            return None;
        }
        Some(entry.binding.clone())
    }

    pub fn lookup_by_session_hash(&self, session_hash: &SessionHash) -> Option<String> {
        let now = Instant::now();
        let inner = self.inner.read().ok()?;
        let entry = inner.by_session.get(session_hash)?;
        if now.duration_since(entry.touched) >= self.ttl {
            return None;
        }
        Some(entry.account_id.clone())
    }

    /// Refresh the idle clock on a session that produced traffic.
    pub fn touch_session(&self, session_hash: &SessionHash) {
        let now = Instant::now();
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        if let Some(entry) = inner.by_session.get_mut(session_hash) {
            entry.touched = now;
        }
    }

    /// Repin a session to another account (migration commit). The short
    /// probation TTL lets an immediately-failing target fall back naturally.
    pub fn repin_session(&self, session_hash: &SessionHash, account_id: &str) {
        let now = Instant::now();
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        inner.by_session.insert(
            session_hash.clone(),
            TimedSession {
                account_id: account_id.to_string(),
                touched: now,
            },
        );
    }

    /// Drop every response binding that pointed at a connection that is now
    /// known broken.
    pub fn evict_connection(&self, conn_id: UpstreamConnId) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        inner
            .by_response
            .retain(|_, entry| entry.binding.conn_id != conn_id);
    }

    pub fn response_entries(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.by_response.len())
            .unwrap_or(0)
    }
}

fn prune(inner: &mut Inner, now: Instant, ttl: Duration) {
    inner
        .by_response
        .retain(|_, entry| now.duration_since(entry.touched) < ttl);
    inner
        .by_session
        .retain(|_, entry| now.duration_since(entry.touched) < ttl);
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
    fn bind_then_lookup_round_trips() {
        let map = ContinuationMap::new(Duration::from_secs(600));
        let conn = UpstreamConnId::new();
        let hash = session("hi");

        map.bind_response("resp_1", conn, &hash, "a1");

        let binding = map.lookup_by_response_id("resp_1").unwrap();
        assert_eq!(binding.conn_id, conn);
        assert_eq!(binding.account_id, "a1");
        assert_eq!(map.lookup_by_session_hash(&hash).as_deref(), Some("a1"));
    }

    #[test]
    fn expired_entries_miss() {
        let map = ContinuationMap::new(Duration::from_millis(0));
        let hash = session("hi");
        map.bind_response("resp_1", UpstreamConnId::new(), &hash, "a1");
        assert!(map.lookup_by_response_id("resp_1").is_none());
        assert!(map.lookup_by_session_hash(&hash).is_none());
    }

    #[test]
    fn broken_connection_evicts_its_bindings() {
        let map = ContinuationMap::new(Duration::from_secs(600));
        let broken = UpstreamConnId::new();
        let alive = UpstreamConnId::new();
        map.bind_response("resp_1", broken, &session("a"), "a1");
        map.bind_response("resp_2", alive, &session("b"), "a1");

        map.evict_connection(broken);
        assert!(map.lookup_by_response_id("resp_1").is_none());
        assert!(map.lookup_by_response_id("resp_2").is_some());
    }

    #[test]
    fn writer_wins_on_rebind() {
        let map = ContinuationMap::new(Duration::from_secs(600));
        let first = UpstreamConnId::new();
        let second = UpstreamConnId::new();
        let hash = session("hi");
        map.bind_response("resp_1", first, &hash, "a1");
        map.bind_response("resp_1", second, &hash, "a2");

        let binding = map.lookup_by_response_id("resp_1").unwrap();
        assert_eq!(binding.conn_id, second);
        assert_eq!(binding.account_id, "a2");
    }
}
