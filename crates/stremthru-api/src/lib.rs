//! HTTP gateway.
//!
//! Resolves the target store from the request, pulls the backend credential
//! (explicit or via the server-side mapping for proxy-authorized users),
//! dispatches to the adapter, wraps returned links into proxy-link tokens,
//! and mediates playback through the paced proxy.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod router;
pub mod state;
pub mod video;

pub use router::build_router;
pub use state::AppState;
