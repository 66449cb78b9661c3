//! The qBittorrent "API key": a pipe-separated token carrying the WebUI
//! endpoint, credentials, the file server base URL, and an optional path
//! mapping.

use stremthru_core::{StoreError, StoreResult};
use stremthru_store::StoreName;

/// Maps an internal (container) path prefix to the external file-server
/// namespace. Needed when qBittorrent's save path inside Docker doesn't
/// match the file server's directory layout: `/downloads:/media/torrents`
/// rewrites `/downloads/Movie/file.mkv` to `/media/torrents/Movie/file.mkv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    /// Internal path prefix, trailing slash trimmed, never empty.
    pub from: String,
    /// External path prefix, trailing slash trimmed; empty strips the prefix.
    pub to: String,
}

impl PathMapping {
    /// Rewrite `path` when it equals `from` or sits under `from/`;
    /// otherwise return it unchanged. Partial component matches never match
    /// (`/downloads` does not rewrite `/downloads-extra`).
    #[must_use]
    pub fn apply(&self, path: &str) -> String {
        if path == self.from {
            return self.to.clone();
        }
        if let Some(rest) = path.strip_prefix(&self.from) {
            if rest.starts_with('/') {
                return format!("{}{rest}", self.to);
            }
        }
        path.to_string()
    }
}

/// Parsed qBittorrent token.
#[derive(Debug, Clone)]
pub struct QbitToken {
    /// WebUI base URL, trailing slash trimmed.
    pub url: String,
    pub username: String,
    pub password: String,
    /// File server base URL, trailing slash trimmed.
    pub file_base_url: String,
    pub path_mapping: Option<PathMapping>,
}

impl QbitToken {
    pub(crate) fn session_key(&self) -> String {
        format!("{}|{}", self.url, self.username)
    }
}

fn token_error(message: impl Into<String>) -> StoreError {
    StoreError::bad_request(format!("invalid qbittorrent token: {}", message.into()))
        .with_store(StoreName::Qbittorrent.as_str())
}

/// Parse `url|username|password|file_base_url[|from:to]`.
///
/// # Errors
///
/// `bad_request` for fewer than four fields, an empty required field, or a
/// malformed path mapping. Only the first `:` in the fifth field splits, so
/// URLs with ports are valid on the right-hand side.
pub fn parse_token(token: &str) -> StoreResult<QbitToken> {
    let parts: Vec<&str> = token.splitn(5, '|').collect();
    if parts.len() < 4 {
        return Err(token_error(format!(
            "expected 4 pipe-delimited parts (url|user|pass|file_base_url[|path_mapping]), got {}",
            parts.len()
        )));
    }
    for (index, part) in parts.iter().take(4).enumerate() {
        if part.trim().is_empty() {
            return Err(token_error(format!("part {index} is empty")));
        }
    }

    let path_mapping = match parts.get(4) {
        None | Some(&"") => None,
        Some(raw) => {
            let (from, to) = raw
                .split_once(':')
                .ok_or_else(|| token_error(format!("path_mapping must be 'from:to' format, got {raw:?}")))?;
            if from.is_empty() {
                return Err(token_error("path_mapping 'from' is empty"));
            }
            Some(PathMapping {
                from: from.trim_end_matches('/').to_string(),
                to: to.trim_end_matches('/').to_string(),
            })
        }
    };

    Ok(QbitToken {
        url: parts[0].trim_end_matches('/').to_string(),
        username: parts[1].to_string(),
        password: parts[2].to_string(),
        file_base_url: parts[3].trim_end_matches('/').to_string(),
        path_mapping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_token() {
        let token = parse_token("http://localhost:8080|admin|password|http://fileserver").unwrap();
        assert_eq!(token.url, "http://localhost:8080");
        assert_eq!(token.username, "admin");
        assert_eq!(token.password, "password");
        assert_eq!(token.file_base_url, "http://fileserver");
        assert!(token.path_mapping.is_none());
    }

    #[test]
    fn trims_trailing_slashes() {
        let token = parse_token("http://localhost:8080/|admin|pass|http://fileserver/").unwrap();
        assert_eq!(token.url, "http://localhost:8080");
        assert_eq!(token.file_base_url, "http://fileserver");
    }

    #[test]
    fn urls_with_colons_survive() {
        let token = parse_token(
            "https://seedbox.example.com:9443|user|p@ss:word|https://files.example.com:443/downloads",
        )
        .unwrap();
        assert_eq!(token.url, "https://seedbox.example.com:9443");
        assert_eq!(token.password, "p@ss:word");
        assert_eq!(token.file_base_url, "https://files.example.com:443/downloads");
    }

    #[test]
    fn too_few_parts_fails() {
        let err = parse_token("http://localhost:8080|admin|password").unwrap_err();
        assert!(err.message.contains("expected 4 pipe-delimited parts"));
    }

    #[test]
    fn empty_part_fails_with_index() {
        let err = parse_token("http://localhost:8080||password|http://fileserver").unwrap_err();
        assert!(err.message.contains("part 1 is empty"));
        assert!(parse_token("").is_err());
    }

    #[test]
    fn parses_path_mapping() {
        let token =
            parse_token("http://localhost:8080|admin|pass|http://server|/downloads:/media/torrents")
                .unwrap();
        let mapping = token.path_mapping.unwrap();
        assert_eq!(mapping.from, "/downloads");
        assert_eq!(mapping.to, "/media/torrents");
    }

    #[test]
    fn strip_only_mapping_has_empty_to() {
        let token =
            parse_token("http://localhost:8080|admin|pass|http://server|/downloads:").unwrap();
        let mapping = token.path_mapping.unwrap();
        assert_eq!(mapping.from, "/downloads");
        assert_eq!(mapping.to, "");
    }

    #[test]
    fn empty_fifth_field_means_no_mapping() {
        let token = parse_token("http://localhost:8080|admin|pass|http://server|").unwrap();
        assert!(token.path_mapping.is_none());
    }

    #[test]
    fn mapping_without_colon_fails() {
        let err =
            parse_token("http://localhost:8080|admin|pass|http://server|no-colon").unwrap_err();
        assert!(err.message.contains("from:to"));
    }

    #[test]
    fn mapping_with_empty_from_fails() {
        let err =
            parse_token("http://localhost:8080|admin|pass|http://server|:/external").unwrap_err();
        assert!(err.message.contains("'from' is empty"));
    }

    #[test]
    fn mapping_only_first_colon_splits() {
        let token = parse_token(
            "http://localhost:8080|admin|pass|http://server|/downloads:http://other:8080/media",
        )
        .unwrap();
        let mapping = token.path_mapping.unwrap();
        assert_eq!(mapping.from, "/downloads");
        assert_eq!(mapping.to, "http://other:8080/media");
    }

    #[test]
    fn apply_basic_replace() {
        let mapping = PathMapping {
            from: "/downloads".into(),
            to: "/media/torrents".into(),
        };
        assert_eq!(
            mapping.apply("/downloads/Movie/file.mkv"),
            "/media/torrents/Movie/file.mkv"
        );
    }

    #[test]
    fn apply_strip_prefix() {
        let mapping = PathMapping {
            from: "/downloads".into(),
            to: String::new(),
        };
        assert_eq!(mapping.apply("/downloads/Movie/file.mkv"), "/Movie/file.mkv");
    }

    #[test]
    fn apply_no_match_returns_input() {
        let mapping = PathMapping {
            from: "/downloads".into(),
            to: "/media".into(),
        };
        assert_eq!(mapping.apply("/other/path/file.mkv"), "/other/path/file.mkv");
    }

    #[test]
    fn apply_partial_component_never_matches() {
        let mapping = PathMapping {
            from: "/downloads".into(),
            to: "/media".into(),
        };
        assert_eq!(
            mapping.apply("/downloads-extra/file.mkv"),
            "/downloads-extra/file.mkv"
        );
    }

    #[test]
    fn apply_exact_match_returns_to() {
        let mapping = PathMapping {
            from: "/downloads".into(),
            to: "/media".into(),
        };
        assert_eq!(mapping.apply("/downloads"), "/media");
    }

    #[test]
    fn apply_nested_from() {
        let mapping = PathMapping {
            from: "/data/downloads/complete".into(),
            to: "/torrents".into(),
        };
        assert_eq!(
            mapping.apply("/data/downloads/complete/Movie/file.mkv"),
            "/torrents/Movie/file.mkv"
        );
    }
}
