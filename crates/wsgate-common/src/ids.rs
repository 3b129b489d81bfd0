use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one client WebSocket connection.
///
/// Contexts store the current owner as a bare `u64` so ownership changes are
/// a single compare-and-swap; `0` is reserved for "no owner".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientConnId(u64);

impl ClientConnId {
    pub fn new() -> Self {
        loop {
            let (hi, _) = Uuid::new_v4().as_u64_pair();
            if hi != 0 {
                return Self(hi);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }
}

impl Default for ClientConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity of one upstream WebSocket connection.
///
/// The continuation coordinator holds these as plain values, never handles,
/// so TTL eviction cannot dangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpstreamConnId(Uuid);

impl UpstreamConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UpstreamConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UpstreamConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Raw owner slot value used by the context CAS. Exposed for the pool crate.
pub fn owner_slot_value(owner: Option<ClientConnId>) -> u64 {
    owner.map(|id| id.as_u64()).unwrap_or(0)
}

/// Inverse of [`owner_slot_value`].
pub fn owner_from_slot(raw: u64) -> Option<ClientConnId> {
    ClientConnId::from_raw(raw)
}
