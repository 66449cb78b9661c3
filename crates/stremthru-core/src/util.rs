//! Small encoding helpers shared by codecs and adapters.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::{StoreError, StoreResult};

/// Everything except RFC 3986 unreserved characters gets percent-encoded
/// inside a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[must_use]
pub fn base64_encode(value: &str) -> String {
    BASE64.encode(value.as_bytes())
}

#[must_use]
pub fn base64_encode_bytes(value: &[u8]) -> String {
    BASE64.encode(value)
}

/// # Errors
///
/// Returns `bad_request` when the input is not valid base64 or not UTF-8.
pub fn base64_decode(value: &str) -> StoreResult<String> {
    let bytes = base64_decode_bytes(value)?;
    String::from_utf8(bytes).map_err(|_| StoreError::bad_request("invalid base64 payload"))
}

/// # Errors
///
/// Returns `bad_request` when the input is not valid base64.
pub fn base64_decode_bytes(value: &str) -> StoreResult<Vec<u8>> {
    BASE64
        .decode(value.as_bytes())
        .map_err(|_| StoreError::bad_request("invalid base64 payload"))
}

/// Percent-encode each `/`-separated segment of `path`, preserving the
/// separators. The only unescaped byte inside a segment is never `/`.
#[must_use]
pub fn encode_path_segments(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Final path component, like `filepath.Base` for URL-style paths.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let encoded = base64_encode("hash:42");
        assert_eq!(base64_decode(&encoded).unwrap(), "hash:42");
    }

    #[test]
    fn base64_decode_rejects_garbage() {
        assert!(base64_decode("not-valid-base64!!!").is_err());
    }

    #[test]
    fn path_segments_preserve_slashes() {
        assert_eq!(
            encode_path_segments("folder/sub/file.mkv"),
            "folder/sub/file.mkv"
        );
    }

    #[test]
    fn path_segments_escape_specials() {
        assert_eq!(
            encode_path_segments("Movie (2024)/Movie [1080p] (2024).mkv"),
            "Movie%20%282024%29/Movie%20%5B1080p%5D%20%282024%29.mkv"
        );
        let encoded = encode_path_segments("file #1 100%.mkv");
        assert!(encoded.contains("%23"));
        assert!(encoded.contains("%25"));
        assert!(!encoded.contains(' '));
    }

    #[test]
    fn path_segments_escape_unicode() {
        let encoded = encode_path_segments("映画/テスト.mkv");
        assert!(!encoded.contains('映'));
        assert!(encoded.contains('/'));
    }

    #[test]
    fn basename_strips_directories() {
        assert_eq!(basename("Ubuntu/ubuntu-22.04.iso"), "ubuntu-22.04.iso");
        assert_eq!(basename("single-file.mkv"), "single-file.mkv");
        assert_eq!(basename("/a/b/c.mkv"), "c.mkv");
    }
}
