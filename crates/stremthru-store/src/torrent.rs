//! BitTorrent v1 metainfo parsing.
//!
//! The info-hash must be computed over the exact bencoded bytes of the
//! `info` dictionary, so a small scanner locates that span in the raw input
//! before `serde_bencode` decodes the typed fields.

use serde::Deserialize;
use sha1::{Digest, Sha1};

use stremthru_core::{StoreError, StoreResult};

/// Parsed `.torrent` file, reduced to what the store layer needs.
#[derive(Debug, Clone)]
pub struct TorrentMeta {
    /// Lowercase hex BTIH v1 info-hash.
    pub hash: String,
    pub name: String,
    /// Total payload size in bytes.
    pub size: i64,
    pub private: bool,
    pub files: Vec<TorrentMetaFile>,
}

#[derive(Debug, Clone)]
pub struct TorrentMetaFile {
    /// Path inside the torrent, `/`-rooted, root folder stripped for
    /// multi-file torrents.
    pub path: String,
    pub size: i64,
}

#[derive(Deserialize)]
struct MetaInfoFile {
    info: InfoDict,
}

#[derive(Deserialize)]
struct InfoDict {
    name: String,
    #[serde(default, rename = "piece length")]
    piece_length: Option<i64>,
    #[serde(default)]
    pieces: Option<serde_bytes::ByteBuf>,
    #[serde(default)]
    private: Option<u8>,
    #[serde(default)]
    length: Option<i64>,
    #[serde(default)]
    files: Option<Vec<InfoFileEntry>>,
}

#[derive(Deserialize)]
struct InfoFileEntry {
    length: i64,
    path: Vec<String>,
}

impl TorrentMeta {
    /// Parse raw `.torrent` bytes.
    ///
    /// # Errors
    ///
    /// `bad_request` for malformed bencode and for torrents without a v1
    /// info dictionary (v2-only files are unsupported).
    pub fn parse(bytes: &[u8]) -> StoreResult<Self> {
        let meta: MetaInfoFile = serde_bencode::from_bytes(bytes)
            .map_err(|err| StoreError::bad_request(format!("invalid torrent file: {err}")))?;

        let info = meta.info;
        let has_v1 = info.pieces.is_some() && info.piece_length.is_some();
        if !has_v1 {
            return Err(StoreError::bad_request("unsupported torrent file"));
        }

        let span = find_info_span(bytes)?;
        let hash = hex_digest(&bytes[span.0..span.1]);

        let (size, files) = match info.files {
            Some(entries) => {
                let mut total = 0;
                let files = entries
                    .into_iter()
                    .map(|entry| {
                        total += entry.length;
                        TorrentMetaFile {
                            path: format!("/{}", entry.path.join("/")),
                            size: entry.length,
                        }
                    })
                    .collect();
                (total, files)
            }
            None => {
                let length = info.length.unwrap_or(0);
                (
                    length,
                    vec![TorrentMetaFile {
                        path: format!("/{}", info.name),
                        size: length,
                    }],
                )
            }
        };

        Ok(Self {
            hash,
            name: info.name,
            size,
            private: info.private == Some(1),
            files,
        })
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Locate the raw byte span of the top-level `info` value.
fn find_info_span(data: &[u8]) -> StoreResult<(usize, usize)> {
    let err = || StoreError::bad_request("invalid torrent file");

    if data.first() != Some(&b'd') {
        return Err(err());
    }
    let mut pos = 1;
    while pos < data.len() && data[pos] != b'e' {
        let (key, key_end) = read_string(data, pos).ok_or_else(err)?;
        let value_end = skip_value(data, key_end).ok_or_else(err)?;
        if key == b"info" {
            return Ok((key_end, value_end));
        }
        pos = value_end;
    }
    Err(err())
}

/// Read a bencoded byte string at `pos`; returns the string and the offset
/// just past it.
fn read_string(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let colon = data[pos..].iter().position(|&b| b == b':')? + pos;
    let len: usize = std::str::from_utf8(&data[pos..colon]).ok()?.parse().ok()?;
    let start = colon + 1;
    let end = start.checked_add(len)?;
    if end > data.len() {
        return None;
    }
    Some((&data[start..end], end))
}

/// Skip one bencoded value at `pos`; returns the offset just past it.
fn skip_value(data: &[u8], pos: usize) -> Option<usize> {
    match data.get(pos)? {
        b'i' => {
            let end = data[pos..].iter().position(|&b| b == b'e')? + pos;
            Some(end + 1)
        }
        b'l' | b'd' => {
            let is_dict = data[pos] == b'd';
            let mut cursor = pos + 1;
            while *data.get(cursor)? != b'e' {
                if is_dict {
                    let (_, key_end) = read_string(data, cursor)?;
                    cursor = skip_value(data, key_end)?;
                } else {
                    cursor = skip_value(data, cursor)?;
                }
            }
            Some(cursor + 1)
        }
        b'0'..=b'9' => read_string(data, pos).map(|(_, end)| end),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // d...4:infod...e...e assembled by hand; 20-byte fake piece hash.
    fn single_file_torrent() -> Vec<u8> {
        let pieces = "A".repeat(20);
        format!(
            "d8:announce32:https://tracker.example/announce4:infod6:lengthi1048576e4:name8:file.mkv12:piece lengthi262144e6:pieces20:{pieces}ee"
        )
        .into_bytes()
    }

    fn multi_file_torrent() -> Vec<u8> {
        let pieces = "B".repeat(20);
        format!(
            "d4:infod5:filesld6:lengthi100e4:pathl3:sub5:a.mkveed6:lengthi50e4:pathl5:b.srteee4:name4:Show12:piece lengthi16384e6:pieces20:{pieces}ee"
        )
        .into_bytes()
    }

    #[test]
    fn parses_single_file_torrent() {
        let meta = TorrentMeta::parse(&single_file_torrent()).unwrap();
        assert_eq!(meta.name, "file.mkv");
        assert_eq!(meta.size, 1_048_576);
        assert_eq!(meta.hash.len(), 40);
        assert!(!meta.private);
        assert_eq!(meta.files.len(), 1);
        assert_eq!(meta.files[0].path, "/file.mkv");
    }

    #[test]
    fn parses_multi_file_torrent() {
        let meta = TorrentMeta::parse(&multi_file_torrent()).unwrap();
        assert_eq!(meta.name, "Show");
        assert_eq!(meta.size, 150);
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.files[0].path, "/sub/a.mkv");
        assert_eq!(meta.files[1].path, "/b.srt");
    }

    #[test]
    fn info_hash_covers_exact_info_span() {
        let bytes = single_file_torrent();
        let span = find_info_span(&bytes).unwrap();
        assert_eq!(bytes[span.0], b'd');
        assert_eq!(bytes[span.1 - 1], b'e');
        // The hash must match a straight SHA-1 of the located span.
        assert_eq!(
            TorrentMeta::parse(&bytes).unwrap().hash,
            hex_digest(&bytes[span.0..span.1])
        );
    }

    #[test]
    fn rejects_v2_only_torrents() {
        // No `pieces`, only a meta version marker.
        let bytes = b"d4:infod12:meta versioni2e4:name4:testee".to_vec();
        let err = TorrentMeta::parse(&bytes).unwrap_err();
        assert!(err.message.contains("unsupported"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(TorrentMeta::parse(b"not bencode").is_err());
        assert!(TorrentMeta::parse(b"").is_err());
    }
}
