//! Core components of the Responses WebSocket gateway.
//!
//! This crate intentionally does **not** depend on axum. The router layer
//! owns client sockets and feeds the turn engine through channels; everything
//! upstream-facing (dialing, pooling, continuation, scheduling) lives here.

pub mod account;
pub mod continuation;
pub mod dial;
pub mod error;
pub mod events;
pub mod health;
pub mod lease;
pub mod pool;
pub mod resolve;
pub mod sched;
pub mod state;
pub mod turn;

pub use account::{Account, AccountRegistry, AccountSnapshot, CredentialKind};
pub use continuation::{ContinuationMap, ResponseBinding};
pub use dial::{Dialer, UpstreamConn, WsStream};
pub use error::{DialError, ErrorKind, TurnError};
pub use events::{Event, EventHub, EventSink, MigrationEvent, PoolEvent, TurnEvent, TurnOutcome};
pub use health::{HealthRegistry, HealthSignals};
pub use lease::{Lease, SharedConnPool};
pub use pool::{Acquire, PoolManager, ReleaseReason};
pub use resolve::{RequestMeta, Resolution, TransportDecision, resolve_transport};
pub use sched::{Scheduler, StickLevel, TurnPlan, TurnSignals};
pub use state::GatewayState;
pub use turn::{
    CLOSE_BUSY, CLOSE_INTERNAL, CLOSE_NORMAL, CLOSE_POLICY, ClientConn, ClientOutbound,
    serve_client,
};
