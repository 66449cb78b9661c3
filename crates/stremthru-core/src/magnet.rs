//! Magnet URI parsing and canonicalization.

use data_encoding::BASE32;
use url::Url;

use crate::error::{StoreError, StoreResult};

/// Parsed magnet link with a canonical rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    /// Lowercase 40-char hex BTIH v1 info-hash.
    pub hash: String,
    /// Display name from `dn`, may be empty.
    pub name: String,
    /// The input as received.
    pub raw: String,
    /// Canonical `magnet:?xt=urn:btih:<hash>[&dn=<name>]` form.
    pub link: String,
}

/// Parse a magnet URI or a bare info-hash.
///
/// Accepts 40-char hex and 32-char base32 hashes; base32 is normalized to
/// lowercase hex.
///
/// # Errors
///
/// Returns `bad_request` for anything that does not yield a v1 info-hash.
pub fn parse_magnet(input: &str) -> StoreResult<MagnetLink> {
    let trimmed = input.trim();

    if let Some(hash) = normalize_hash(trimmed) {
        return Ok(build(hash, String::new(), trimmed.to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|err| StoreError::bad_request(format!("invalid magnet: {err}")))?;
    if url.scheme() != "magnet" {
        return Err(StoreError::bad_request("invalid magnet: not a magnet uri"));
    }

    let mut hash = None;
    let mut name = String::new();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" => {
                if let Some(encoded) = value.strip_prefix("urn:btih:") {
                    hash = normalize_hash(encoded);
                }
            }
            "dn" => name = value.into_owned(),
            _ => {}
        }
    }

    let hash = hash.ok_or_else(|| StoreError::bad_request("invalid magnet: missing btih hash"))?;
    Ok(build(hash, name, trimmed.to_string()))
}

fn build(hash: String, name: String, raw: String) -> MagnetLink {
    let mut link = Url::parse("magnet:?").expect("static url");
    {
        let mut pairs = link.query_pairs_mut();
        pairs.append_pair("xt", &format!("urn:btih:{hash}"));
        if !name.is_empty() {
            pairs.append_pair("dn", &name);
        }
    }
    MagnetLink {
        hash,
        name,
        raw,
        link: link.to_string(),
    }
}

fn normalize_hash(value: &str) -> Option<String> {
    match value.len() {
        40 if value.bytes().all(|b| b.is_ascii_hexdigit()) => Some(value.to_ascii_lowercase()),
        32 => BASE32
            .decode(value.to_ascii_uppercase().as_bytes())
            .ok()
            .filter(|bytes| bytes.len() == 20)
            .map(hex_encode),
        _ => None,
    }
}

fn hex_encode(bytes: Vec<u8>) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "d160b8d8ea35a5b4e52837468fc8f03d55cef1f7";

    #[test]
    fn parses_full_magnet_uri() {
        let magnet = parse_magnet(&format!(
            "magnet:?xt=urn:btih:{HASH}&dn=ubuntu-24.04.3-desktop-amd64.iso"
        ))
        .unwrap();
        assert_eq!(magnet.hash, HASH);
        assert_eq!(magnet.name, "ubuntu-24.04.3-desktop-amd64.iso");
        assert!(magnet.link.starts_with("magnet:?xt=urn%3Abtih%3A") || magnet.link.contains(HASH));
    }

    #[test]
    fn parses_bare_hash() {
        let magnet = parse_magnet(&HASH.to_ascii_uppercase()).unwrap();
        assert_eq!(magnet.hash, HASH);
        assert!(magnet.name.is_empty());
    }

    #[test]
    fn parses_base32_hash() {
        let bytes: Vec<u8> = (0..20).collect();
        let encoded = BASE32.encode(&bytes);
        assert_eq!(encoded.len(), 32);
        let magnet = parse_magnet(&format!("magnet:?xt=urn:btih:{encoded}")).unwrap();
        assert_eq!(magnet.hash.len(), 40);
        assert!(magnet.hash.starts_with("000102"));
    }

    #[test]
    fn rejects_non_magnet() {
        assert!(parse_magnet("http://example.com").is_err());
        assert!(parse_magnet("magnet:?dn=name-only").is_err());
        assert!(parse_magnet("not a uri at all").is_err());
    }

    #[test]
    fn canonical_link_round_trips() {
        let magnet = parse_magnet(&format!("magnet:?xt=urn:btih:{HASH}&dn=Some+Name&tr=x")).unwrap();
        let reparsed = parse_magnet(&magnet.link).unwrap();
        assert_eq!(reparsed.hash, magnet.hash);
        assert_eq!(reparsed.name, magnet.name);
    }
}
