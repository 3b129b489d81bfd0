use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorKind;

/// Durable event consumer (log shipper, usage ledger adapter). Sinks take
/// the event by value and return a detachable future; a slow sink delays
/// later sinks, never the emitting turn.
pub trait EventSink: Send + Sync {
    fn write(&self, event: Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Turn(TurnEvent),
    Pool(PoolEvent),
    Migration(MigrationEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub at: SystemTime,
    pub trace_id: String,
    pub account_id: String,
    pub session_hash: String,
    pub turn_index: u64,
    pub outcome: TurnOutcome,
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: u128,
    pub events_forwarded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Failed,
    Recovered,
    ClientGone,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PoolEvent {
    Acquired {
        at: SystemTime,
        account_id: String,
        session_hash: String,
        reason: String,
    },
    Released {
        at: SystemTime,
        account_id: String,
        session_hash: String,
        reason: String,
    },
    Evicted {
        at: SystemTime,
        account_id: String,
        session_hash: String,
    },
    Rebuilt {
        at: SystemTime,
        account_id: String,
        session_hash: String,
        rebuild_count: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub at: SystemTime,
    pub session_hash: String,
    pub from_account: String,
    pub to_account: String,
    pub committed: bool,
}

/// Fan-out point for gateway events. Live subscribers (admin streams) get a
/// lossy broadcast; registered sinks get every event, written in
/// registration order by one detached task per emit.
#[derive(Clone)]
pub struct EventHub {
    live: broadcast::Sender<Event>,
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (live, _) = broadcast::channel(buffer);
        Self {
            live,
            sinks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.live.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.push(sink);
        }
    }

    pub async fn emit(&self, event: Event) {
        let _ = self.live.send(event.clone());

        let sinks: Vec<Arc<dyn EventSink>> = match self.sinks.read() {
            Ok(sinks) if !sinks.is_empty() => sinks.clone(),
            _ => return,
        };
        tokio::spawn(async move {
            for sink in sinks {
                sink.write(event.clone()).await;
            }
        });
    }
}
