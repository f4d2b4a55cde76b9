//! Archive backend abstraction.
//!
//! A backend exposes logical CD sectors for a disc image regardless of
//! whether it's a compressed CHD archive or a raw BIN file described by a
//! CUE sheet. Everything above this layer (geometry resolution, ISO 9660
//! traversal) only ever calls [`ArchiveBackend::read_physical_sector`].

use thiserror::Error;

/// Declared track type, taken from CHD `CHT2`/`CHTR`/`CHGD` metadata or from
/// a CUE sheet's `TRACK` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Mode1Raw,
    Mode2Raw,
    Mode1,
    Mode2,
    Audio,
}

impl TrackType {
    /// Nominal `(data_offset, user_data_size, physical_sector_size)` for this
    /// track type, before the sector-16 geometry probe refines it.
    pub fn nominal_geometry(&self) -> (u32, u32, u32) {
        match self {
            TrackType::Mode1Raw => (16, 2048, 2352),
            TrackType::Mode2Raw => (16, 2336, 2352),
            TrackType::Mode1 => (0, 2048, 2352),
            TrackType::Mode2 => (0, 2336, 2352),
            TrackType::Audio => (0, 2352, 2352),
        }
    }

    pub fn is_data(&self) -> bool {
        !matches!(self, TrackType::Audio)
    }
}

/// Per-track geometry and placement within the backend's logical sector
/// address space.
#[derive(Debug, Clone, Copy)]
pub struct Track {
    pub number: u32,
    pub type_tag: TrackType,
    pub physical_sector_size: u32,
    pub data_offset: u32,
    pub user_data_size: u32,
    pub pregap_frames: u32,
    pub total_frames: u32,
    pub start_frame: u64,
}

/// Errors raised while opening or reading from an archive backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to open archive: {0}")]
    ArchiveOpenFailed(String),

    #[error("invalid archive header: {0}")]
    HeaderInvalid(String),

    #[error("track metadata malformed: {0}")]
    TrackMetadataMalformed(String),

    #[error("sector read failed (hunk {hunk}): {code}")]
    SectorReadFailed { hunk: u64, code: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform sector accessor over either backend variant.
pub trait ArchiveBackend {
    /// All tracks, in ascending track-number order, computed once at open.
    fn tracks(&self) -> &[Track];

    /// Read one physical sector (`physical_sector_size` bytes) of `track`,
    /// at `sector_index` sectors from the start of that track's data.
    fn read_physical_sector(
        &mut self,
        track: u32,
        sector_index: u64,
    ) -> Result<Vec<u8>, BackendError>;

    /// Read the `user_data_size` bytes of logical (cooked) data out of one
    /// physical sector, per the track's resolved `data_offset`/`user_data_size`.
    fn read_user_data(&mut self, track: u32, sector_index: u64) -> Result<Vec<u8>, BackendError> {
        let geometry = self
            .tracks()
            .iter()
            .find(|t| t.number == track)
            .copied()
            .ok_or_else(|| BackendError::TrackMetadataMalformed(format!("no track {}", track)))?;
        let sector = self.read_physical_sector(track, sector_index)?;
        let start = geometry.data_offset as usize;
        let end = start + geometry.user_data_size as usize;
        Ok(sector[start..end].to_vec())
    }

    /// Override the resolved `data_offset`/`user_data_size` of one track,
    /// used by the geometry resolver to apply its sector-16 refinement.
    fn set_track_geometry(&mut self, track: u32, data_offset: u32, user_data_size: u32);
}
