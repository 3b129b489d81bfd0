pub mod auth;
pub mod gateway;

pub use auth::{AuthError, ClientAuth, ClientKeyEntry, ClientKeySnapshot};
pub use gateway::{GatewayRouterState, gateway_router};
