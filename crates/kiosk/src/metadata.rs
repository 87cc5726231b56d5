//! Album metadata by disc id (MusicBrainz) and front covers (Cover Art Archive).

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::config::MetadataSettings;
use crate::error::KioskError;

const MAX_RESPONSE_BYTES: u64 = 2_000_000;
const MAX_COVER_BYTES: u64 = 5_000_000;

/// A release as far as the kiosk cares about it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReleaseMetadata {
    pub release_id: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub media: Vec<Medium>,
}

/// One physical disc within a release.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Medium {
    pub position: Option<u32>,
    pub title: Option<String>,
    pub disc_ids: Vec<String>,
    pub tracks: Vec<MediumTrack>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MediumTrack {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub length_ms: Option<u64>,
}

/// Metadata collaborator used by the disc loader.
pub trait MetadataService: Send + Sync {
    fn lookup(&self, disc_id: &str) -> Result<ReleaseMetadata, KioskError>;

    /// Front cover bytes; any failure is `None`.
    fn fetch_cover(&self, release_id: &str) -> Option<Vec<u8>>;
}

pub struct MusicBrainzClient {
    base_url: String,
    cover_art_url: String,
    agent: ureq::Agent,
}

impl MusicBrainzClient {
    /// `None` when lookups are disabled in the config.
    pub fn new(settings: &MetadataSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        let config = ureq::Agent::config_builder()
            .user_agent(settings.user_agent.as_str())
            .build();
        Some(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            cover_art_url: settings.cover_art_url.trim_end_matches('/').to_string(),
            agent: ureq::Agent::new_with_config(config),
        })
    }

    fn get_text(&self, url: &str, request: ureq::RequestBuilder<ureq::typestate::WithoutBody>) -> Result<String> {
        let resp = match request.config().http_status_as_error(false).build().call() {
            Ok(resp) => resp,
            Err(err) => bail!("request failed (transport) url={url}: {err}"),
        };
        let code = resp.status();
        if code.as_u16() >= 400 {
            bail!("request failed (status {code}) url={url}");
        }
        resp.into_body()
            .with_config()
            .limit(MAX_RESPONSE_BYTES)
            .read_to_string()
            .context("response read failed")
    }

    fn lookup_release(&self, disc_id: &str) -> Result<ReleaseMetadata> {
        let url = format!("{}/discid/{disc_id}", self.base_url);
        let body = self.get_text(
            &url,
            self.agent
                .get(&url)
                .query("inc", "artists+recordings")
                .query("fmt", "json"),
        )?;
        parse_discid_response(&body)
    }

    fn cover_bytes(&self, release_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{release_id}/front-250", self.cover_art_url);
        let resp = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("cover request failed url={url}"))?;
        resp.into_body()
            .with_config()
            .limit(MAX_COVER_BYTES)
            .read_to_vec()
            .context("cover read failed")
    }
}

impl MetadataService for MusicBrainzClient {
    fn lookup(&self, disc_id: &str) -> Result<ReleaseMetadata, KioskError> {
        self.lookup_release(disc_id).map_err(|e| {
            tracing::warn!(disc_id, error = %format!("{e:#}"), "musicbrainz lookup failed");
            KioskError::lookup_failed(&e)
        })
    }

    fn fetch_cover(&self, release_id: &str) -> Option<Vec<u8>> {
        match self.cover_bytes(release_id) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                tracing::info!(release_id, error = %format!("{e:#}"), "no cover art");
                None
            }
        }
    }
}

/// Encode cover bytes as a `data:` URI the display can use directly.
pub fn cover_data_uri(bytes: &[u8]) -> String {
    let mime = if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/jpeg"
    };
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

#[derive(Debug, Deserialize)]
struct DiscIdResponse {
    #[serde(default)]
    releases: Vec<MbRelease>,
}

#[derive(Debug, Deserialize)]
struct MbRelease {
    id: Option<String>,
    title: Option<String>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<MbArtistCredit>,
    #[serde(default)]
    media: Vec<MbMedium>,
}

#[derive(Debug, Deserialize)]
struct MbArtistCredit {
    name: Option<String>,
    artist: Option<MbArtist>,
}

#[derive(Debug, Deserialize)]
struct MbArtist {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MbMedium {
    position: Option<u32>,
    title: Option<String>,
    #[serde(default)]
    discs: Vec<MbDisc>,
    #[serde(default)]
    tracks: Vec<MbTrack>,
}

#[derive(Debug, Deserialize)]
struct MbDisc {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MbTrack {
    title: Option<String>,
    length: Option<u64>,
    recording: Option<MbRecording>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<MbArtistCredit>,
}

#[derive(Debug, Deserialize)]
struct MbRecording {
    title: Option<String>,
    length: Option<u64>,
}

fn parse_discid_response(body: &str) -> Result<ReleaseMetadata> {
    let parsed: DiscIdResponse =
        serde_json::from_str(body).context("musicbrainz response parse failed")?;
    let Some(release) = parsed.releases.into_iter().next() else {
        bail!("no release for disc id");
    };
    Ok(ReleaseMetadata {
        release_id: release.id,
        title: non_empty(release.title),
        artist: join_artists(&release.artist_credit),
        media: release.media.into_iter().map(convert_medium).collect(),
    })
}

fn convert_medium(medium: MbMedium) -> Medium {
    Medium {
        position: medium.position,
        title: non_empty(medium.title),
        disc_ids: medium.discs.into_iter().map(|d| d.id).collect(),
        tracks: medium
            .tracks
            .into_iter()
            .map(|track| {
                let (recording_title, recording_length) = match track.recording {
                    Some(rec) => (rec.title, rec.length),
                    None => (None, None),
                };
                MediumTrack {
                    title: non_empty(recording_title).or(non_empty(track.title)),
                    artist: join_artists(&track.artist_credit),
                    length_ms: track.length.or(recording_length),
                }
            })
            .collect(),
    }
}

/// Artist names joined with `" & "`, or `None` when no credit names an artist.
fn join_artists(credits: &[MbArtistCredit]) -> Option<String> {
    let names: Vec<&str> = credits
        .iter()
        .filter_map(|credit| {
            credit
                .artist
                .as_ref()
                .and_then(|a| a.name.as_deref())
                .or(credit.name.as_deref())
        })
        .filter(|name| !name.trim().is_empty())
        .collect();
    (!names.is_empty()).then(|| names.join(" & "))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISCID_BODY: &str = r#"{
        "releases": [{
            "id": "rel-1",
            "title": "Kind of Blue",
            "artist-credit": [
                {"name": "Miles Davis", "artist": {"name": "Miles Davis"}},
                {"name": "John Coltrane", "artist": {"name": "John Coltrane"}}
            ],
            "media": [{
                "position": 2,
                "title": "Bonus",
                "discs": [{"id": "disc-xyz", "sectors": 1000}],
                "tracks": [
                    {"number": "1", "title": "So What", "length": 562000,
                     "recording": {"title": "So What", "length": 561000}},
                    {"number": "2", "title": "Freddie",
                     "recording": {"title": "", "length": 589000},
                     "artist-credit": [{"name": "Miles Davis Sextet"}]}
                ]
            }]
        }]
    }"#;

    #[test]
    fn parses_first_release() {
        let release = parse_discid_response(DISCID_BODY).unwrap();
        assert_eq!(release.release_id.as_deref(), Some("rel-1"));
        assert_eq!(release.title.as_deref(), Some("Kind of Blue"));
        assert_eq!(release.artist.as_deref(), Some("Miles Davis & John Coltrane"));

        let medium = &release.media[0];
        assert_eq!(medium.position, Some(2));
        assert_eq!(medium.title.as_deref(), Some("Bonus"));
        assert_eq!(medium.disc_ids, vec!["disc-xyz".to_string()]);
        assert_eq!(medium.tracks[0].length_ms, Some(562_000));
        assert_eq!(medium.tracks[0].artist, None);
        assert_eq!(medium.tracks[1].title.as_deref(), Some("Freddie"));
        assert_eq!(medium.tracks[1].artist.as_deref(), Some("Miles Davis Sextet"));
        assert_eq!(medium.tracks[1].length_ms, Some(589_000));
    }

    #[test]
    fn empty_release_list_is_an_error() {
        assert!(parse_discid_response(r#"{"releases": []}"#).is_err());
        assert!(parse_discid_response("not json").is_err());
    }

    #[test]
    fn cover_data_uri_sniffs_png() {
        let uri = cover_data_uri(&[0x89, b'P', b'N', b'G', 0, 1]);
        assert!(uri.starts_with("data:image/png;base64,"));
        assert!(cover_data_uri(&[0xFF, 0xD8, 0xFF]).starts_with("data:image/jpeg;base64,"));
    }
}
