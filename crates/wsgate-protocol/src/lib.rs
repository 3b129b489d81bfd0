//! Wire types for the OpenAI Responses WebSocket v2 path.
//!
//! This crate intentionally does **not** depend on axum or any WebSocket
//! implementation. It parses the slice of the Responses schema the gateway
//! inspects, preserves everything else verbatim, and classifies upstream
//! events; a higher layer performs IO.

pub mod envelope;
pub mod responses;
pub mod session;

pub use envelope::{ErrorEnvelope, ErrorStatus};
pub use responses::event::{EventKind, UpstreamEventMeta, inspect_event};
pub use responses::request::{InputItem, InputParam, ResponsesRequest};
pub use session::SessionHash;
