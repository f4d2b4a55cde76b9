//! CHD archive backend.
//!
//! Wraps the `chd` crate's hunk decompression and exposes it through
//! [`ArchiveBackend`]. Grounded on the `ChdSectorReader` hunk-caching read
//! path and the CHT2 metadata parser in `disc/chd.rs`, generalized to walk
//! `CHT2`, then `CHTR`, then `CHGD` metadata tags and to compute `start_frame`
//! for every track rather than just the first data track.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use chd::metadata::MetadataTag;
use chd::Chd;

use super::backend::{ArchiveBackend, BackendError, Track, TrackType};

const CHT2_TAG: u32 = 0x4348_5432; // "CHT2"
const CHTR_TAG: u32 = 0x4348_5452; // "CHTR"
const CHGD_TAG: u32 = 0x4348_4744; // "CHGD"

/// Bytes per frame for CD-mastered CHDs that don't report `unit_bytes`.
const DEFAULT_UNIT_BYTES: u32 = 2448;

pub struct ChdBackend {
    chd: Chd<BufReader<File>>,
    unit_bytes: u32,
    frames_per_hunk: u64,
    tracks: Vec<Track>,
    cached_hunk: Option<(u32, Vec<u8>)>,
    hunk_buffer: Vec<u8>,
}

impl ChdBackend {
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let file = File::open(path)?;
        let mut chd = Chd::open(BufReader::new(file), None)
            .map_err(|e| BackendError::ArchiveOpenFailed(format!("{:?}", e)))?;

        let header = chd.header();
        let hunk_size = header.hunk_size();
        let unit_bytes = match header.unit_bytes() {
            0 => DEFAULT_UNIT_BYTES,
            n => n,
        };
        if hunk_size % unit_bytes != 0 {
            return Err(BackendError::HeaderInvalid(format!(
                "hunk_size {} is not a multiple of unit_bytes {}",
                hunk_size, unit_bytes
            )));
        }
        let frames_per_hunk = (hunk_size / unit_bytes) as u64;
        if frames_per_hunk == 0 {
            return Err(BackendError::HeaderInvalid(
                "frames_per_hunk computed as zero".to_string(),
            ));
        }

        let tracks = parse_tracks(&mut chd)?;
        let hunk_buffer = chd.get_hunksized_buffer();

        Ok(Self {
            chd,
            unit_bytes,
            frames_per_hunk,
            tracks,
            cached_hunk: None,
            hunk_buffer,
        })
    }

    fn read_hunk(&mut self, hunk_index: u32) -> Result<Vec<u8>, BackendError> {
        if let Some((cached_index, ref data)) = self.cached_hunk {
            if cached_index == hunk_index {
                return Ok(data.clone());
            }
        }

        let mut compressed_buf = Vec::new();
        self.chd
            .hunk(hunk_index)
            .map_err(|e| BackendError::SectorReadFailed {
                hunk: hunk_index as u64,
                code: format!("{:?}", e),
            })?
            .read_hunk_in(&mut compressed_buf, &mut self.hunk_buffer)
            .map_err(|e| BackendError::SectorReadFailed {
                hunk: hunk_index as u64,
                code: format!("{:?}", e),
            })?;

        let result = self.hunk_buffer.clone();
        self.cached_hunk = Some((hunk_index, result.clone()));
        Ok(result)
    }
}

impl ArchiveBackend for ChdBackend {
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
        let hunk_index = (absolute_frame / self.frames_per_hunk) as u32;
        let in_hunk = ((absolute_frame % self.frames_per_hunk) * self.unit_bytes as u64) as usize;

        let hunk_data = self.read_hunk(hunk_index)?;
        let sector_size = geometry.physical_sector_size as usize;

        if in_hunk + sector_size <= hunk_data.len() {
            Ok(hunk_data[in_hunk..in_hunk + sector_size].to_vec())
        } else {
            let next_hunk = self.read_hunk(hunk_index + 1)?;
            let mut result = vec![0u8; sector_size];
            let first_len = hunk_data.len() - in_hunk;
            result[..first_len].copy_from_slice(&hunk_data[in_hunk..]);
            result[first_len..].copy_from_slice(&next_hunk[..sector_size - first_len]);
            Ok(result)
        }
    }

    fn set_track_geometry(&mut self, track: u32, data_offset: u32, user_data_size: u32) {
        if let Some(t) = self.tracks.iter_mut().find(|t| t.number == track) {
            t.data_offset = data_offset;
            t.user_data_size = user_data_size;
        }
    }
}

/// Try `CHT2`, then `CHTR`, then `CHGD` metadata at increasing index until a
/// tag yields no entries, parsing each `TRACK:%d TYPE:%s ... FRAMES:%d` blob
/// and accumulating `start_frame` per track.
fn parse_tracks<F: Read + Seek>(chd: &mut Chd<F>) -> Result<Vec<Track>, BackendError> {
    for tag in [CHT2_TAG, CHTR_TAG, CHGD_TAG] {
        let meta_refs: Vec<_> = chd
            .metadata_refs()
            .filter(|meta_ref| meta_ref.metatag() == tag)
            .collect();
        if meta_refs.is_empty() {
            continue;
        }

        let mut entries = Vec::new();
        for meta_ref in meta_refs {
            let metadata = match meta_ref.read(chd.inner()) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("skipping unreadable track metadata entry: {:?}", e);
                    continue;
                }
            };
            let content = match String::from_utf8(metadata.value) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("skipping non-ASCII track metadata entry: {}", e);
                    continue;
                }
            };
            match parse_track_entry(&content) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!(
                    "skipping malformed track metadata entry {:?}: {}",
                    content,
                    e
                ),
            }
        }

        if entries.is_empty() {
            continue;
        }

        entries.sort_by_key(|(num, ..)| *num);

        let mut tracks = Vec::new();
        let mut frame_offset = 0u64;
        for (number, type_tag, total_frames, pregap_frames) in entries {
            let (data_offset, user_data_size, physical_sector_size) = type_tag.nominal_geometry();
            let start_frame = frame_offset + pregap_frames as u64;
            tracks.push(Track {
                number,
                type_tag,
                physical_sector_size,
                data_offset,
                user_data_size,
                pregap_frames,
                total_frames,
                start_frame,
            });
            frame_offset += pregap_frames as u64;
            frame_offset += total_frames as u64;
            frame_offset += pad_to_multiple_of_4(total_frames) as u64;
        }
        return Ok(tracks);
    }

    Err(BackendError::TrackMetadataMalformed(
        "no CHT2/CHTR/CHGD track metadata found".to_string(),
    ))
}

fn pad_to_multiple_of_4(n: u32) -> u32 {
    ((n + 3) & !3) - n
}

/// Parse one `TRACK:%d TYPE:%s SUBTYPE:%s FRAMES:%d [PREGAP:%d ...]` entry,
/// returning `(track_number, type_tag, total_frames, pregap_frames)`.
fn parse_track_entry(content: &str) -> Result<(u32, TrackType, u32, u32), BackendError> {
    let mut number = None;
    let mut type_str = None;
    let mut frames = None;
    let mut pregap = 0u32;

    for part in content.split_whitespace() {
        if let Some((key, value)) = part.split_once(':') {
            match key {
                "TRACK" => number = value.parse().ok(),
                "TYPE" => type_str = Some(value.to_string()),
                "FRAMES" => frames = value.parse().ok(),
                "PREGAP" => pregap = value.parse().unwrap_or(0),
                _ => {}
            }
        }
    }

    let number = number.ok_or_else(|| {
        BackendError::TrackMetadataMalformed(format!("missing TRACK in {:?}", content))
    })?;
    let type_str = type_str.ok_or_else(|| {
        BackendError::TrackMetadataMalformed(format!("missing TYPE in {:?}", content))
    })?;
    let frames = frames.ok_or_else(|| {
        BackendError::TrackMetadataMalformed(format!("missing FRAMES in {:?}", content))
    })?;
    let type_tag = track_type_from_str(&type_str)?;

    Ok((number, type_tag, frames, pregap))
}

fn track_type_from_str(s: &str) -> Result<TrackType, BackendError> {
    match s {
        "MODE1_RAW" => Ok(TrackType::Mode1Raw),
        "MODE2_RAW" => Ok(TrackType::Mode2Raw),
        "MODE1" => Ok(TrackType::Mode1),
        "MODE2" | "MODE2_FORM1" | "MODE2_FORM2" | "MODE2_FORM_MIX" => Ok(TrackType::Mode2),
        "AUDIO" => Ok(TrackType::Audio),
        other => Err(BackendError::TrackMetadataMalformed(format!(
            "unrecognized track type {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_rounds_up_to_next_multiple_of_four() {
        assert_eq!(pad_to_multiple_of_4(0), 0);
        assert_eq!(pad_to_multiple_of_4(1), 3);
        assert_eq!(pad_to_multiple_of_4(4), 0);
        assert_eq!(pad_to_multiple_of_4(150), 2);
    }

    #[test]
    fn parse_track_entry_reads_known_fields() {
        let (number, type_tag, frames, pregap) = parse_track_entry(
            "TRACK:1 TYPE:MODE1_RAW SUBTYPE:NONE FRAMES:19652 PREGAP:150 PGTYPE:SILENCE",
        )
        .unwrap();
        assert_eq!(number, 1);
        assert_eq!(type_tag, TrackType::Mode1Raw);
        assert_eq!(frames, 19652);
        assert_eq!(pregap, 150);
    }

    #[test]
    fn parse_track_entry_defaults_pregap_to_zero() {
        let (_, _, _, pregap) =
            parse_track_entry("TRACK:2 TYPE:AUDIO SUBTYPE:NONE FRAMES:1000").unwrap();
        assert_eq!(pregap, 0);
    }

    #[test]
    fn parse_track_entry_rejects_unknown_type() {
        assert!(parse_track_entry("TRACK:1 TYPE:WEIRD FRAMES:10").is_err());
    }

    #[test]
    fn parse_track_entry_rejects_missing_track() {
        assert!(parse_track_entry("TYPE:MODE1 FRAMES:10").is_err());
    }
}
