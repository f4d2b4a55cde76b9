//! BIN/CUE archive backend.
//!
//! Parses a cue sheet with hand-rolled, line-by-line regexes rather than a
//! cue-sheet parsing crate: the accepted grammar (case-insensitive keywords,
//! arbitrary whitespace) is small and pinned precisely enough that a direct
//! match is clearer than bridging an external parser's `Command`/`TrackType`
//! model onto it. Read path follows `BinCueSectorReader` in
//! `disc/browse/reader.rs`, generalized to per-track `data_offset` instead of
//! a reader fixed to one data track.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::backend::{ArchiveBackend, BackendError, Track, TrackType};

static FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)FILE\s+"([^"]+)"\s+BINARY"#).unwrap());
static TRACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)TRACK\s+(\d+)\s+(\w+(?:/\d+)?)").unwrap());
static INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)INDEX\s+01\s+(\d+):(\d+):(\d+)").unwrap());

const FRAMES_PER_SECOND: u32 = 75;

pub struct BinCueBackend {
    file: BufReader<File>,
    tracks: Vec<Track>,
}

impl BinCueBackend {
    pub fn open(cue_path: &Path) -> Result<Self, BackendError> {
        let cue_content = std::fs::read_to_string(cue_path)?;
        let bin_name = FILE_RE
            .captures(&cue_content)
            .map(|c| c[1].to_string())
            .ok_or_else(|| {
                BackendError::HeaderInvalid("no FILE ... BINARY line in cue sheet".to_string())
            })?;

        let bin_path = resolve_bin_path(cue_path, &bin_name);
        let file = File::open(&bin_path).map_err(|e| {
            BackendError::ArchiveOpenFailed(format!("{}: {}", bin_path.display(), e))
        })?;

        let tracks = parse_tracks(&cue_content)?;

        Ok(Self {
            file: BufReader::new(file),
            tracks,
        })
    }
}

impl ArchiveBackend for BinCueBackend {
    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn read_physical_sector(
        &mut self,
        track: u32,
        sector_index: u64,
    ) -> Result<Vec<u8>, BackendError> {
        let geometry = self
            .tracks
            .iter()
            .find(|t| t.number == track)
            .copied()
            .ok_or_else(|| BackendError::TrackMetadataMalformed(format!("no track {}", track)))?;

        let absolute_frame = geometry.start_frame + sector_index;
        let start_byte = absolute_frame * geometry.physical_sector_size as u64;

        self.file.seek(SeekFrom::Start(start_byte))?;
        let mut buffer = vec![0u8; geometry.physical_sector_size as usize];
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn set_track_geometry(&mut self, track: u32, data_offset: u32, user_data_size: u32) {
        if let Some(t) = self.tracks.iter_mut().find(|t| t.number == track) {
            t.data_offset = data_offset;
            t.user_data_size = user_data_size;
        }
    }
}

fn resolve_bin_path(cue_path: &Path, bin_name: &str) -> PathBuf {
    cue_path
        .parent()
        .map(|dir| dir.join(bin_name))
        .unwrap_or_else(|| PathBuf::from(bin_name))
}

/// `MODE1/2048 -> (2352, 0, 2048)`-style mapping from spec.md §4.2, returning
/// `(physical_sector_size, data_offset, user_data_size)`.
fn geometry_for_type_tag(tag: &str) -> (u32, u32, u32) {
    match tag.to_ascii_uppercase().as_str() {
        "MODE1/2048" => (2048, 0, 2048),
        "MODE1/2352" => (2352, 16, 2048),
        "MODE2/2048" => (2048, 0, 2048),
        "MODE2/2352" => (2352, 24, 2048),
        "AUDIO" => (2352, 0, 2352),
        _ => (2352, 0, 2048),
    }
}

fn track_type_tag(tag: &str) -> TrackType {
    match tag.to_ascii_uppercase().as_str() {
        "AUDIO" => TrackType::Audio,
        t if t.starts_with("MODE2") => TrackType::Mode2,
        _ => TrackType::Mode1,
    }
}

fn parse_tracks(cue_content: &str) -> Result<Vec<Track>, BackendError> {
    let mut tracks = Vec::new();
    let mut current: Option<(u32, String)> = None;

    for line in cue_content.lines() {
        if let Some(caps) = TRACK_RE.captures(line) {
            let number: u32 = caps[1].parse().map_err(|_| {
                BackendError::TrackMetadataMalformed(format!("bad track number in {:?}", line))
            })?;
            current = Some((number, caps[2].to_string()));
            continue;
        }

        if let Some(caps) = INDEX_RE.captures(line) {
            let (number, type_tag) = current.clone().ok_or_else(|| {
                BackendError::TrackMetadataMalformed(format!("INDEX 01 before TRACK: {:?}", line))
            })?;
            let minutes: u64 = caps[1].parse().unwrap_or(0);
            let seconds: u64 = caps[2].parse().unwrap_or(0);
            let frames: u64 = caps[3].parse().unwrap_or(0);
            let start_frame = minutes * 60 * FRAMES_PER_SECOND as u64
                + seconds * FRAMES_PER_SECOND as u64
                + frames;

            let (physical_sector_size, data_offset, user_data_size) =
                geometry_for_type_tag(&type_tag);
            tracks.push(Track {
                number,
                type_tag: track_type_tag(&type_tag),
                physical_sector_size,
                data_offset,
                user_data_size,
                pregap_frames: 0,
                total_frames: 0,
                start_frame,
            });
        }
    }

    if tracks.is_empty() {
        return Err(BackendError::TrackMetadataMalformed(
            "no TRACK/INDEX 01 pairs found in cue sheet".to_string(),
        ));
    }

    tracks.sort_by_key(|t| t.number);
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUE: &str = r#"
FILE "game.bin" BINARY
  TRACK 01 MODE2/2352
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    INDEX 01 02:00:00
"#;

    #[test]
    fn parses_file_line_case_insensitively() {
        let caps = FILE_RE.captures("file \"Game.BIN\" binary").unwrap();
        assert_eq!(&caps[1], "Game.BIN");
    }

    #[test]
    fn parses_tracks_and_indexes() {
        let tracks = parse_tracks(CUE).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].number, 1);
        assert_eq!(tracks[0].start_frame, 0);
        assert_eq!(tracks[0].physical_sector_size, 2352);
        assert_eq!(tracks[0].data_offset, 24);
        assert_eq!(tracks[0].user_data_size, 2048);

        assert_eq!(tracks[1].number, 2);
        assert_eq!(tracks[1].start_frame, 2 * 60 * 75);
        assert_eq!(tracks[1].type_tag, TrackType::Audio);
    }

    #[test]
    fn unknown_type_tag_falls_back_to_raw_2048() {
        assert_eq!(geometry_for_type_tag("CDG"), (2352, 0, 2048));
    }

    #[test]
    fn index_without_track_is_an_error() {
        assert!(parse_tracks("INDEX 01 00:00:00").is_err());
    }

    #[test]
    fn missing_track_metadata_errors() {
        assert!(parse_tracks("FILE \"x.bin\" BINARY").is_err());
    }
}
