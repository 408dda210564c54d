//! HTTP API for Bastion Core.

mod handlers;
mod routes;
mod types;

pub use routes::build_router;
pub use types::*;
