//! Track list construction for a disc session.
//!
//! The list always has exactly the physical track count: metadata is used where
//! it exists, missing entries are synthesized and extras are dropped.

use kiosk_types::TrackEntry;

use crate::metadata::{Medium, ReleaseMetadata};

pub const UNKNOWN_ALBUM: &str = "Unknown album";
pub const UNKNOWN_ARTIST: &str = "Unknown artist";
pub const UNKNOWN_TITLE: &str = "Unknown title";
pub const UNKNOWN_DURATION: &str = "unknown";

/// Album-level details shown alongside every track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlbumInfo {
    pub title: String,
    pub artist: String,
    pub release_id: Option<String>,
}

impl AlbumInfo {
    pub fn unknown() -> Self {
        Self {
            title: UNKNOWN_ALBUM.to_string(),
            artist: UNKNOWN_ARTIST.to_string(),
            release_id: None,
        }
    }
}

/// Pick the medium describing the inserted disc.
///
/// Disc-id match, then declared position, then the first medium.
pub fn select_medium<'a>(
    media: &'a [Medium],
    disc_id: Option<&str>,
    disc_number: u32,
) -> Option<&'a Medium> {
    disc_id
        .and_then(|id| media.iter().find(|m| m.disc_ids.iter().any(|d| d == id)))
        .or_else(|| media.iter().find(|m| m.position == Some(disc_number)))
        .or_else(|| media.first())
}

/// Build the album info and a track list of exactly `track_count` entries.
pub fn build_track_list(
    track_count: usize,
    release: Option<&ReleaseMetadata>,
    disc_id: Option<&str>,
    disc_number: u32,
) -> (Vec<TrackEntry>, AlbumInfo) {
    let Some(release) = release else {
        return (synthetic_tracks(1, track_count, UNKNOWN_ARTIST), AlbumInfo::unknown());
    };

    let artist = release
        .artist
        .clone()
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let medium = select_medium(&release.media, disc_id, disc_number);
    let album_title = release.title.as_deref().unwrap_or(UNKNOWN_ALBUM);
    let title = match medium.and_then(|m| m.title.as_deref()) {
        Some(medium_title) => format!("{album_title} - {medium_title}"),
        None => album_title.to_string(),
    };

    let mut tracks: Vec<TrackEntry> = medium
        .map(|m| m.tracks.as_slice())
        .unwrap_or_default()
        .iter()
        .take(track_count)
        .enumerate()
        .map(|(i, track)| TrackEntry {
            index: i + 1,
            title: track
                .title
                .clone()
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            performer: track.artist.clone().unwrap_or_else(|| artist.clone()),
            duration_formatted: track
                .length_ms
                .map(format_duration)
                .unwrap_or_else(|| UNKNOWN_DURATION.to_string()),
        })
        .collect();
    let next = tracks.len() + 1;
    tracks.extend(synthetic_tracks(next, track_count, &artist));

    let album = AlbumInfo {
        title,
        artist,
        release_id: release.release_id.clone(),
    };
    (tracks, album)
}

fn synthetic_tracks(from: usize, to: usize, performer: &str) -> Vec<TrackEntry> {
    (from..=to)
        .map(|index| TrackEntry {
            index,
            title: format!("Track {index}"),
            performer: performer.to_string(),
            duration_formatted: UNKNOWN_DURATION.to_string(),
        })
        .collect()
}

/// `m:ss` from milliseconds.
pub fn format_duration(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{minutes}:{seconds:02}")
}
