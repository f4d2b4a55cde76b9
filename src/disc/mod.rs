//! Disc image handling.
//!
//! Exposes a uniform `ArchiveBackend` over CHD archives and BIN/CUE raw
//! dumps, a geometry resolver that refines per-track data offsets, and an
//! ISO 9660 directory reader built on top of both.

pub mod backend;
pub mod bincue_backend;
pub mod chd_backend;
pub mod geometry;
pub mod iso9660;

pub use backend::{ArchiveBackend, BackendError, Track, TrackType};
pub use bincue_backend::BinCueBackend;
pub use chd_backend::ChdBackend;
pub use iso9660::{DirEntry, Iso9660Error, Iso9660Reader};

use std::path::Path;

/// Open the right backend for `path` based on its extension (`.chd` vs
/// `.cue`), refine the first data track's geometry, and return the opened
/// backend plus the track number to hand to the ISO 9660 reader.
pub fn open(path: &Path) -> Result<(Box<dyn ArchiveBackend>, u32), BackendError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let mut backend: Box<dyn ArchiveBackend> = match extension.as_deref() {
        Some("chd") => Box::new(ChdBackend::open(path)?),
        Some("cue") => Box::new(BinCueBackend::open(path)?),
        _ => {
            return Err(BackendError::ArchiveOpenFailed(format!(
                "unrecognized archive extension: {}",
                path.display()
            )))
        }
    };

    let first_data_track = backend
        .tracks()
        .iter()
        .find(|t| t.type_tag.is_data())
        .map(|t| t.number)
        .ok_or_else(|| BackendError::TrackMetadataMalformed("no data track found".to_string()))?;

    geometry::refine_first_data_track(backend.as_mut(), first_data_track)?;

    Ok((backend, first_data_track))
}
