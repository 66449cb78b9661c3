//! Streaming-while-downloading engine.
//!
//! qBittorrent pre-allocates files at full size, so a plain file server
//! happily returns zeros for regions that are not downloaded yet. The engine
//! answers the two questions the paced proxy needs to avoid serving those
//! zeros: how many bytes from offset 0 are contiguously downloaded (the
//! safe-byte frontier), and whether every piece covering an arbitrary byte
//! range is present (for seeks outside the frontier, e.g. ffprobe reading
//! the moov atom that `firstLastPiecePrio` fetched early).

use std::time::Duration;

use once_cell::sync::Lazy;

use stremthru_core::cache::Cache;
use stremthru_core::{StoreError, StoreResult};
use stremthru_store::StoreName;

use crate::StoreClient;
use crate::token::parse_token;
use crate::webui::{TorrentFile, TorrentProperties};

/// Piece state value reported by the WebUI for a fully downloaded piece.
pub const PIECE_STATE_DOWNLOADED: i32 = 2;

/// Download progress and size for a single file within a torrent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileProgressInfo {
    pub progress: f64,
    pub size: i64,
}

// The three engine caches. Shared across users keyed by hash: the same hash
// on the same backend produces the same states. Best-effort only.
static FILE_PROGRESS_CACHE: Lazy<Cache<FileProgressInfo>> =
    Lazy::new(|| Cache::new("qbit:fileProgress", Duration::from_secs(10)));
static PIECE_STATES_CACHE: Lazy<Cache<Vec<i32>>> =
    Lazy::new(|| Cache::new("qbit:pieceStates", Duration::from_secs(10)));
static TORRENT_PROPS_CACHE: Lazy<Cache<TorrentProperties>> =
    Lazy::new(|| Cache::new("qbit:torrentProps", Duration::from_secs(60 * 60)));

/// How many bytes from offset 0 of a file are fully downloaded contiguously.
///
/// `file_offset` is the byte position of the file within the torrent (sum of
/// preceding files' sizes in index order). Walks pieces from `first_piece`
/// and stops at the first gap; the result is clamped to `[0, file_size]`.
#[must_use]
pub fn compute_safe_bytes(
    file_offset: i64,
    file_size: i64,
    piece_size: i64,
    states: &[i32],
    first_piece: i64,
    last_piece: i64,
) -> i64 {
    if piece_size <= 0 || first_piece < 0 {
        return 0;
    }
    let len = states.len() as i64;
    if first_piece >= len {
        return 0;
    }

    let mut safe: i64 = 0;
    for piece in first_piece..=last_piece {
        if piece >= len || states[piece as usize] != PIECE_STATE_DOWNLOADED {
            break;
        }
        let piece_end_byte = (piece + 1) * piece_size;
        let safe_in_file = piece_end_byte - file_offset;
        if safe_in_file > safe {
            safe = safe_in_file;
        }
    }
    safe.clamp(0, file_size.max(0))
}

/// Whether every piece covering `[range_start, range_end]` within the file
/// is fully downloaded. `last_needed` is clamped to the file's last piece,
/// which makes end-of-file seeks succeed as soon as `firstLastPiecePrio`
/// has fetched the final piece.
#[must_use]
pub fn is_range_available(
    file_offset: i64,
    piece_size: i64,
    states: &[i32],
    last_piece: i64,
    range_start: i64,
    range_end: i64,
) -> bool {
    if piece_size <= 0 {
        return false;
    }
    let len = states.len() as i64;
    if last_piece >= len || last_piece < 0 {
        return false;
    }

    let first_needed = (file_offset + range_start) / piece_size;
    let mut last_needed = (file_offset + range_end) / piece_size;
    if last_needed > last_piece {
        last_needed = last_piece;
    }
    if first_needed < 0 {
        return false;
    }

    for piece in first_needed..=last_needed {
        if piece >= len || states[piece as usize] != PIECE_STATE_DOWNLOADED {
            return false;
        }
    }
    true
}

/// Located file plus its byte offset within the torrent payload.
struct LocatedFile {
    file: TorrentFile,
    offset: i64,
}

impl StoreClient {
    async fn locate_file(
        &self,
        token: &crate::token::QbitToken,
        hash: &str,
        file_index: i32,
    ) -> StoreResult<LocatedFile> {
        let files = self.files(token, hash).await?;
        let mut offset: i64 = 0;
        for file in files {
            if file.index == file_index {
                return Ok(LocatedFile { file, offset });
            }
            offset += file.size;
        }
        Err(
            StoreError::not_found(format!("file index {file_index} not found in torrent {hash}"))
                .with_store(StoreName::Qbittorrent.as_str()),
        )
    }

    async fn piece_size(
        &self,
        token: &crate::token::QbitToken,
        hash: &str,
    ) -> StoreResult<i64> {
        if let Some(props) = TORRENT_PROPS_CACHE.get(hash) {
            return Ok(props.piece_size);
        }
        let props = self.properties(token, hash).await?;
        let piece_size = props.piece_size;
        TORRENT_PROPS_CACHE.put(hash, props);
        Ok(piece_size)
    }

    async fn states(&self, token: &crate::token::QbitToken, hash: &str) -> StoreResult<Vec<i32>> {
        if let Some(states) = PIECE_STATES_CACHE.get(hash) {
            return Ok(states);
        }
        let states = self.piece_states(token, hash).await?;
        PIECE_STATES_CACHE.put(hash, states.clone());
        Ok(states)
    }

    /// Download progress (0.0–1.0) and total size for one file. Cached for
    /// ten seconds.
    ///
    /// # Errors
    ///
    /// Token, upstream, and unknown-index failures.
    pub async fn get_file_progress(
        &self,
        api_key: &str,
        hash: &str,
        file_index: i32,
    ) -> StoreResult<FileProgressInfo> {
        let cache_key = format!("{hash}:{file_index}");
        if let Some(info) = FILE_PROGRESS_CACHE.get(&cache_key) {
            return Ok(info);
        }

        let token = parse_token(api_key)?;
        let located = self.locate_file(&token, hash, file_index).await?;
        let info = FileProgressInfo {
            progress: located.file.progress,
            size: located.file.size,
        };
        FILE_PROGRESS_CACHE.put(cache_key, info);
        Ok(info)
    }

    /// The safe-byte frontier for one file: `(safe_bytes, file_size, done)`.
    ///
    /// Callers must treat the frontier as a lower bound; piece states may be
    /// up to ten seconds stale.
    ///
    /// # Errors
    ///
    /// Token, upstream, and unknown-index failures.
    pub async fn get_safe_bytes(
        &self,
        api_key: &str,
        hash: &str,
        file_index: i32,
    ) -> StoreResult<(i64, i64, bool)> {
        let token = parse_token(api_key)?;
        let located = self.locate_file(&token, hash, file_index).await?;
        let file_size = located.file.size;

        if located.file.progress >= 1.0 {
            return Ok((file_size, file_size, true));
        }

        let piece_size = self.piece_size(&token, hash).await?;
        let states = self.states(&token, hash).await?;

        let safe = compute_safe_bytes(
            located.offset,
            file_size,
            piece_size,
            &states,
            located.file.first_piece(),
            located.file.last_piece(),
        );
        Ok((safe, file_size, false))
    }

    /// Whether `[range_start, range_end]` within the file is fully
    /// downloaded at the piece level.
    ///
    /// # Errors
    ///
    /// Token, upstream, and unknown-index failures.
    pub async fn is_file_range_available(
        &self,
        api_key: &str,
        hash: &str,
        file_index: i32,
        range_start: i64,
        range_end: i64,
    ) -> StoreResult<bool> {
        let token = parse_token(api_key)?;
        let located = self.locate_file(&token, hash, file_index).await?;

        if located.file.progress >= 1.0 {
            return Ok(true);
        }

        let piece_size = self.piece_size(&token, hash).await?;
        if piece_size <= 0 {
            return Ok(false);
        }
        let states = self.states(&token, hash).await?;

        Ok(is_range_available(
            located.offset,
            piece_size,
            &states,
            located.file.last_piece(),
            range_start,
            range_end,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIECE: i64 = 16_384;

    fn all_downloaded(count: usize) -> Vec<i32> {
        vec![PIECE_STATE_DOWNLOADED; count]
    }

    #[test]
    fn safe_bytes_clamped_to_file_size() {
        let states = all_downloaded(8);
        let safe = compute_safe_bytes(0, 100_000, PIECE, &states, 0, 7);
        assert_eq!(safe, 100_000);
    }

    #[test]
    fn safe_bytes_zero_when_first_piece_missing() {
        let mut states = all_downloaded(8);
        states[0] = 0;
        assert_eq!(compute_safe_bytes(0, 100_000, PIECE, &states, 0, 7), 0);
    }

    #[test]
    fn safe_bytes_stops_at_first_gap() {
        let mut states = all_downloaded(8);
        states[3] = 1;
        let safe = compute_safe_bytes(0, PIECE * 8, PIECE, &states, 0, 7);
        assert_eq!(safe, PIECE * 3);
    }

    #[test]
    fn safe_bytes_monotone_as_pieces_complete() {
        let mut states = vec![0; 8];
        let mut previous = 0;
        for piece in 0..8 {
            states[piece] = PIECE_STATE_DOWNLOADED;
            let safe = compute_safe_bytes(0, PIECE * 8, PIECE, &states, 0, 7);
            assert!(safe >= previous);
            previous = safe;
        }
        assert_eq!(previous, PIECE * 8);
    }

    #[test]
    fn safe_bytes_accounts_for_file_offset() {
        // File starts mid-way through piece 2.
        let states = all_downloaded(8);
        let file_offset = PIECE * 2 + 100;
        let safe = compute_safe_bytes(file_offset, PIECE * 4, PIECE, &states, 2, 7);
        // Piece 3 ends at byte (3+1)*PIECE; relative to the file start that
        // frontier keeps growing until clamped by file size.
        assert_eq!(safe, PIECE * 4);
    }

    #[test]
    fn safe_bytes_degenerate_inputs() {
        assert_eq!(compute_safe_bytes(0, 100, 0, &all_downloaded(4), 0, 3), 0);
        assert_eq!(compute_safe_bytes(0, 100, PIECE, &all_downloaded(4), 9, 12), 0);
        assert_eq!(compute_safe_bytes(0, 100, PIECE, &[], 0, 0), 0);
    }

    #[test]
    fn range_available_when_all_downloaded() {
        let states = all_downloaded(8);
        assert!(is_range_available(0, PIECE, &states, 7, 0, PIECE * 8 - 1));
        assert!(is_range_available(0, PIECE, &states, 7, 0, 0));
    }

    #[test]
    fn range_unavailable_when_any_covering_piece_missing() {
        let mut states = all_downloaded(8);
        states[5] = 0;
        assert!(!is_range_available(0, PIECE, &states, 7, PIECE * 5, PIECE * 5 + 10));
        // Ranges not touching piece 5 are still fine.
        assert!(is_range_available(0, PIECE, &states, 7, 0, PIECE - 1));
    }

    #[test]
    fn range_last_needed_clamped_to_last_piece() {
        // Only first and last pieces downloaded (firstLastPiecePrio).
        let mut states = vec![0; 8];
        states[0] = PIECE_STATE_DOWNLOADED;
        states[7] = PIECE_STATE_DOWNLOADED;
        let file_size = PIECE * 8;
        // A moov-atom style seek into the tail: covered only by piece 7.
        assert!(is_range_available(0, PIECE, &states, 7, PIECE * 7 + 1, file_size - 1));
        // Range end past the file still clamps to last piece.
        assert!(is_range_available(0, PIECE, &states, 7, PIECE * 7 + 1, file_size + 999));
    }

    #[test]
    fn range_degenerate_inputs() {
        assert!(!is_range_available(0, 0, &all_downloaded(4), 3, 0, 10));
        assert!(!is_range_available(0, PIECE, &all_downloaded(4), 9, 0, 10));
        assert!(!is_range_available(0, PIECE, &[], 0, 0, 10));
    }
}
