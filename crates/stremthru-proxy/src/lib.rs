//! Proxy-link tokens and the paced streaming proxy.
//!
//! Every playback is mediated here: the gateway wraps upstream URLs into
//! opaque bearer tokens, and the proxy endpoint unwraps them and streams the
//! upstream response — pacing reads against the qBittorrent download
//! frontier when the token targets a torrent file.

pub mod paced;
pub mod token;
pub mod tunnel;

pub use paced::{Pacing, StreamProgress, parse_byte_range, proxy_response};
pub use token::{ProxyLinkCodec, ProxyLinkInfo, QbitTarget, create_proxy_link};
pub use tunnel::TunnelClientPool;
