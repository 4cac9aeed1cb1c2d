//! Bearer-token authentication and permission checks

pub mod gate;
pub mod jwks;
pub mod permissions;
pub mod token;

pub use gate::{AuthDecision, AuthGate, bearer_token};
pub use jwks::{JwksResolver, KeyError, KeyResolver};
pub use permissions::authorize;
pub use token::{Claims, TokenValidator};
