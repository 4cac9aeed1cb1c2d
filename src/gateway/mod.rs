//! Proxy server implementation

pub mod forward;
mod router;
pub mod routes;
mod server;

pub use forward::{Forwarder, UpstreamResponse};
pub use router::{AppState, create_router};
pub use routes::{RouteMatch, RouteRule, RouteTable, cromwell_routes};
pub use server::Gateway;
