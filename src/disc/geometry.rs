//! Track geometry resolution.
//!
//! A track's nominal `data_offset`/`user_data_size` (from its declared type
//! tag) is refined by probing sector 16 of the first data track for one of
//! four known CD-ROM layouts. Grounded on the probe spec.md documents;
//! structurally similar to the teacher's `ChdSectorReader`/`BinCueSectorReader`
//! data-offset tables in `disc/browse/reader.rs`, generalized into a runtime
//! probe instead of a static lookup so non-standard XA discs are handled too.

use super::backend::{ArchiveBackend, BackendError};

/// CD sync pattern at the start of every raw (2352-byte) sector:
/// `00 FF*10 00`.
const CD_SYNC_PATTERN: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

/// Refine `data_offset`/`user_data_size` for `track` by probing sector 16.
/// Leaves the track's nominal geometry untouched if no pattern matches.
pub fn refine_first_data_track(
    backend: &mut dyn ArchiveBackend,
    track: u32,
) -> Result<(), BackendError> {
    let sector = backend.read_physical_sector(track, 16)?;

    if let Some((offset, size)) = probe(&sector) {
        backend.set_track_geometry(track, offset, size);
    }
    Ok(())
}

/// Test the four known layouts against a raw sector-16 read, in the order
/// spec.md §4.3 lists them, returning the first match's
/// `(data_offset, user_data_size)`.
fn probe(sector: &[u8]) -> Option<(u32, u32)> {
    // 1. CD-ROM XA: "CD001" at sector offset 25.
    if sector.len() > 29 && &sector[25..30] == b"CD001" {
        let user_data_size = if sector[18] & 0x20 != 0 { 2324 } else { 2048 };
        return Some((24, user_data_size));
    }

    // 2. MODE2 form 1 with 16-byte sync: "CD001" at offset 17.
    if sector.len() > 21 && &sector[17..22] == b"CD001" {
        return Some((16, 2336));
    }

    // 3. Raw 2048-byte data: "CD001" at offset 1.
    if sector.len() > 5 && &sector[1..6] == b"CD001" {
        return Some((0, 2048));
    }

    // 4. Raw sync pattern at the start of the sector.
    if sector.len() >= 16 && sector[..12] == CD_SYNC_PATTERN {
        return if sector[15] & 3 == 1 {
            Some((16, 2048)) // MODE1
        } else {
            Some((16, 2336)) // MODE2
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_xa_form1() {
        let mut sector = vec![0u8; 2352];
        sector[25..30].copy_from_slice(b"CD001");
        sector[18] = 0x00;
        assert_eq!(probe(&sector), Some((24, 2048)));
    }

    #[test]
    fn probe_xa_form2() {
        let mut sector = vec![0u8; 2352];
        sector[25..30].copy_from_slice(b"CD001");
        sector[18] = 0x20;
        assert_eq!(probe(&sector), Some((24, 2324)));
    }

    #[test]
    fn probe_mode2_form1_16_sync() {
        let mut sector = vec![0u8; 2352];
        sector[17..22].copy_from_slice(b"CD001");
        assert_eq!(probe(&sector), Some((16, 2336)));
    }

    #[test]
    fn probe_raw_2048() {
        let mut sector = vec![0u8; 2352];
        sector[1..6].copy_from_slice(b"CD001");
        assert_eq!(probe(&sector), Some((0, 2048)));
    }

    #[test]
    fn probe_sync_mode1() {
        let mut sector = vec![0u8; 2352];
        sector[..12].copy_from_slice(&CD_SYNC_PATTERN);
        sector[15] = 0x01;
        assert_eq!(probe(&sector), Some((16, 2048)));
    }

    #[test]
    fn probe_sync_mode2() {
        let mut sector = vec![0u8; 2352];
        sector[..12].copy_from_slice(&CD_SYNC_PATTERN);
        sector[15] = 0x02;
        assert_eq!(probe(&sector), Some((16, 2336)));
    }

    #[test]
    fn probe_no_match_keeps_nominal() {
        let sector = vec![0u8; 2352];
        assert_eq!(probe(&sector), None);
    }
}
