//! Optical disc access: table of contents, MusicBrainz disc id, track addresses.

use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::command;
use crate::error::KioskError;

const TRACK_EXTENSIONS: [&str; 4] = ["wav", "flac", "aiff", "aif"];

/// Physical layout of the inserted disc.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscToc {
    pub track_count: usize,
    /// MusicBrainz disc id, when the TOC was complete enough to compute one.
    pub disc_id: Option<String>,
    /// Position of this disc within a multi-disc release (1-based).
    pub disc_number: u32,
}

/// Reads the disc and addresses its tracks.
pub trait DiscReader: Send + Sync {
    fn read_toc(&self) -> Result<DiscToc, KioskError>;

    /// Track count from a cheaper source when the TOC is unreadable.
    fn probe_track_count(&self) -> Option<usize> {
        None
    }

    /// Playback address of track `index` (1-based).
    fn track_uri(&self, index: usize) -> String;
}

/// Disc reader backed by `cd-discid` and a directory of extracted track files
/// (typically a `cdfs` mount of the drive).
pub struct CdromReader {
    device: String,
    tracks_dir: PathBuf,
    track_pattern: String,
}

impl CdromReader {
    pub fn new(device: String, tracks_dir: PathBuf, track_pattern: String) -> Self {
        Self {
            device,
            tracks_dir,
            track_pattern,
        }
    }
}

impl DiscReader for CdromReader {
    fn read_toc(&self) -> Result<DiscToc, KioskError> {
        let output = command::run("cd-discid", &["--musicbrainz", &self.device])
            .map_err(|e| KioskError::DiscUnavailable(format!("{e:#}")))?;
        let toc = parse_musicbrainz_toc(&output)?;
        tracing::info!(
            device = %self.device,
            tracks = toc.track_count,
            disc_id = ?toc.disc_id,
            "disc toc read"
        );
        Ok(toc)
    }

    fn probe_track_count(&self) -> Option<usize> {
        let entries = std::fs::read_dir(&self.tracks_dir).ok()?;
        let count = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| TRACK_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .count();
        (count > 0).then_some(count)
    }

    fn track_uri(&self, index: usize) -> String {
        self.tracks_dir
            .join(track_file_name(&self.track_pattern, index))
            .to_string_lossy()
            .into_owned()
    }
}

/// Expand `{nn}` (zero-padded) and `{n}` in a track file pattern.
fn track_file_name(pattern: &str, index: usize) -> String {
    pattern
        .replace("{nn}", &format!("{index:02}"))
        .replace("{n}", &index.to_string())
}

/// Parse `cd-discid --musicbrainz` output: `N offset_1 .. offset_N leadout`.
fn parse_musicbrainz_toc(raw: &str) -> Result<DiscToc, KioskError> {
    let fields = raw
        .split_whitespace()
        .map(|f| f.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| KioskError::DiscUnavailable(format!("malformed toc {raw:?}: {e}")))?;
    let Some((&count, rest)) = fields.split_first() else {
        return Err(KioskError::DiscUnavailable("empty toc".to_string()));
    };
    let count = count as usize;
    if count == 0 || count > 99 || rest.len() != count + 1 {
        return Err(KioskError::DiscUnavailable(format!(
            "toc lists {count} tracks but carries {} offsets",
            rest.len()
        )));
    }
    let (offsets, leadout) = rest.split_at(count);
    Ok(DiscToc {
        track_count: count,
        disc_id: Some(musicbrainz_disc_id(1, count as u8, leadout[0], offsets)),
        disc_number: 1,
    })
}

/// MusicBrainz disc id: SHA-1 over the hex TOC, base64 with `._-` substitutions.
pub fn musicbrainz_disc_id(first: u8, last: u8, leadout: u32, offsets: &[u32]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{first:02X}"));
    hasher.update(format!("{last:02X}"));
    hasher.update(format!("{leadout:08X}"));
    for slot in 0..99 {
        let offset = offsets.get(slot).copied().unwrap_or(0);
        hasher.update(format!("{offset:08X}"));
    }
    STANDARD
        .encode(hasher.finalize())
        .replace('+', ".")
        .replace('/', "_")
        .replace('=', "-")
}
