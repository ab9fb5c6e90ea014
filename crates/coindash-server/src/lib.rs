//! HTTP surface for coindash: current coins, history capture and per-asset
//! history, plus a couple of unauthenticated diagnostics.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
