pub mod auth;
pub mod connection_limit;

pub use auth::{AuthContext, auth_middleware};
pub use connection_limit::{ClientIp, connection_limit_middleware};
