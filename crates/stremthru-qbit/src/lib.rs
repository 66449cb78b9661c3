//! qBittorrent store adapter.
//!
//! Unlike the hosted debrid services, qBittorrent is a self-hosted pair of a
//! WebUI and an HTTP file server. The adapter manages WebUI cookie sessions,
//! exposes the standard store operations, and additionally answers the two
//! questions the paced proxy needs for streaming-while-downloading: the
//! safe-byte frontier and piece-level range availability.

mod engine;
mod error;
mod link;
mod session;
mod store;
mod token;
mod webui;

pub use engine::{
    FileProgressInfo, PIECE_STATE_DOWNLOADED, compute_safe_bytes, is_range_available,
};
pub use error::translate_status_code;
pub use link::{create_locked_link, parse_locked_link};
pub use token::{PathMapping, QbitToken, parse_token};

use session::SessionTable;

/// qBittorrent store client. One instance serves every user; per-user state
/// lives in the session table keyed by `(webui_url, username)`.
pub struct StoreClient {
    sessions: SessionTable,
}

impl StoreClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: SessionTable::new(),
        }
    }
}

impl Default for StoreClient {
    fn default() -> Self {
        Self::new()
    }
}
