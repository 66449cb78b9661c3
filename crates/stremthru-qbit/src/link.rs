//! Locked file links for qBittorrent content.
//!
//! `stremthru://store/qbittorrent/<base64(hash:fileIndex)>` — opaque to
//! clients, decoding yields exactly the tuple `generate_link` needs.

use stremthru_core::util::{base64_decode, base64_encode};
use stremthru_core::{StoreError, StoreResult};
use stremthru_store::StoreName;

pub const LOCKED_LINK_PREFIX: &str = "stremthru://store/qbittorrent/";

#[must_use]
pub fn create_locked_link(hash: &str, file_index: i32) -> String {
    format!(
        "{LOCKED_LINK_PREFIX}{}",
        base64_encode(&format!("{hash}:{file_index}"))
    )
}

/// # Errors
///
/// `bad_request` for malformed base64, a missing `:` separator, or a
/// non-integer file index.
pub fn parse_locked_link(link: &str) -> StoreResult<(String, i32)> {
    let encoded = link.strip_prefix(LOCKED_LINK_PREFIX).unwrap_or(link);
    let decoded = base64_decode(encoded)
        .map_err(|err| err.with_store(StoreName::Qbittorrent.as_str()))?;
    let (hash, index) = decoded
        .split_once(':')
        .ok_or_else(|| invalid_link("missing separator"))?;
    let file_index = index
        .parse::<i32>()
        .map_err(|_| invalid_link("file index is not an integer"))?;
    Ok((hash.to_string(), file_index))
}

fn invalid_link(reason: &str) -> StoreError {
    StoreError::bad_request(format!("invalid locked file link: {reason}"))
        .with_store(StoreName::Qbittorrent.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let hash = "abcdef1234567890abcdef1234567890abcdef12";
        let link = create_locked_link(hash, 3);
        assert!(link.starts_with(LOCKED_LINK_PREFIX));
        let (parsed_hash, parsed_index) = parse_locked_link(&link).unwrap();
        assert_eq!(parsed_hash, hash);
        assert_eq!(parsed_index, 3);
    }

    #[test]
    fn zero_and_large_indices_round_trip() {
        let (_, index) = parse_locked_link(&create_locked_link("abc123", 0)).unwrap();
        assert_eq!(index, 0);
        let (_, index) = parse_locked_link(&create_locked_link("abc123", i32::MAX)).unwrap();
        assert_eq!(index, i32::MAX);
    }

    #[test]
    fn malformed_base64_fails() {
        let err = parse_locked_link(&format!("{LOCKED_LINK_PREFIX}not-valid-base64!!!")).unwrap_err();
        assert_eq!(err.code, stremthru_core::ErrorCode::BadRequest);
    }

    #[test]
    fn missing_separator_fails() {
        use stremthru_core::util::base64_encode;
        let err =
            parse_locked_link(&format!("{LOCKED_LINK_PREFIX}{}", base64_encode("nocolon")))
                .unwrap_err();
        assert!(err.message.contains("separator"));
    }
}
