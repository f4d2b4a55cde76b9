//! ISO 9660 directory traversal.
//!
//! Reads through [`ArchiveBackend::read_user_data`] rather than a flat
//! `SectorReader`, so every directory read and file read is expressed in
//! terms of a `(track, sector)` pair plus the track's resolved
//! `user_data_size`. Directory record parsing mirrors `Iso9660Filesystem` in
//! `disc/browse/iso9660_fs.rs`.

use thiserror::Error;

use super::backend::{ArchiveBackend, BackendError};

#[derive(Debug, Error)]
pub enum Iso9660Error {
    #[error("not a Primary Volume Descriptor (type {0})")]
    NotADataDisc(u8),

    #[error("no ISO 9660 filesystem found on track")]
    FilesystemNotFound,

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A parsed directory record, with the name uppercased and version suffix
/// already stripped.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub extent_lba: u32,
    pub size_bytes: u32,
    pub is_directory: bool,
}

pub struct Iso9660Reader<'a> {
    backend: &'a mut dyn ArchiveBackend,
    track: u32,
    user_data_size: u32,
    pub root: DirEntry,
}

impl<'a> Iso9660Reader<'a> {
    /// Read sector 16 of `track` as user data, validate it's a Primary Volume
    /// Descriptor, and extract the root directory record embedded at
    /// offset 156.
    pub fn open(backend: &'a mut dyn ArchiveBackend, track: u32) -> Result<Self, Iso9660Error> {
        let user_data_size = backend
            .tracks()
            .iter()
            .find(|t| t.number == track)
            .map(|t| t.user_data_size)
            .ok_or(Iso9660Error::FilesystemNotFound)?;

        let pvd = backend.read_user_data(track, 16)?;
        if pvd[0] != 1 {
            return Err(Iso9660Error::NotADataDisc(pvd[0]));
        }
        if &pvd[1..6] != b"CD001" {
            return Err(Iso9660Error::FilesystemNotFound);
        }

        let root_record = &pvd[156..190];
        let extent_lba = u32::from_le_bytes([
            root_record[2],
            root_record[3],
            root_record[4],
            root_record[5],
        ]);
        let size_bytes = u32::from_le_bytes([
            root_record[10],
            root_record[11],
            root_record[12],
            root_record[13],
        ]);

        Ok(Self {
            backend,
            track,
            user_data_size,
            root: DirEntry {
                name: String::new(),
                extent_lba,
                size_bytes,
                is_directory: true,
            },
        })
    }

    /// Yield every entry of the directory at `(extent_lba, size_bytes)`,
    /// skipping the two special `.`/`..` records.
    pub fn list_directory(
        &mut self,
        extent_lba: u32,
        size_bytes: u32,
    ) -> Result<Vec<DirEntry>, Iso9660Error> {
        let sector_count = (size_bytes as u64).div_ceil(self.user_data_size as u64);
        let mut data = Vec::with_capacity(size_bytes as usize);
        for i in 0..sector_count {
            let chunk = self
                .backend
                .read_user_data(self.track, extent_lba as u64 + i)?;
            data.extend_from_slice(&chunk);
        }
        data.truncate(size_bytes as usize);

        let mut entries = Vec::new();
        let mut offset = 0usize;
        let sector_size = self.user_data_size as usize;

        while offset < data.len() {
            let sector_start = (offset / sector_size) * sector_size;
            let record_length = data[offset] as usize;

            if record_length == 0 {
                offset = sector_start + sector_size;
                continue;
            }
            if offset + record_length > data.len() {
                break;
            }

            let record = &data[offset..offset + record_length];
            let extent = u32::from_le_bytes([record[2], record[3], record[4], record[5]]);
            let length = u32::from_le_bytes([record[10], record[11], record[12], record[13]]);
            let flags = record[25];
            let name_len = record[32] as usize;
            let name_bytes = &record[33..33 + name_len];

            let is_self = name_bytes == [0u8];
            let is_parent = name_bytes == [1u8];

            if !is_self && !is_parent {
                let is_directory = flags & 0x02 != 0;
                let name = clean_name(name_bytes, is_directory);
                entries.push(DirEntry {
                    name,
                    extent_lba: extent,
                    size_bytes: length,
                    is_directory,
                });
            }

            offset += record_length;
        }

        Ok(entries)
    }

    /// Split `path` on `/` and descend directory by directory; the final
    /// segment must match a file entry. Comparison is case-insensitive with
    /// the `;N` version suffix stripped on both sides.
    pub fn find_file(&mut self, path: &str) -> Result<DirEntry, Iso9660Error> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(Iso9660Error::EntryNotFound(path.to_string()));
        }

        let mut extent_lba = self.root.extent_lba;
        let mut size_bytes = self.root.size_bytes;

        for (i, segment) in segments.iter().enumerate() {
            let entries = self.list_directory(extent_lba, size_bytes)?;
            let wanted = strip_version(segment).to_ascii_uppercase();
            let is_final = i == segments.len() - 1;

            let found = entries
                .into_iter()
                .find(|e| {
                    strip_version(&e.name).to_ascii_uppercase() == wanted
                        && e.is_directory != is_final
                })
                .ok_or_else(|| Iso9660Error::EntryNotFound(path.to_string()))?;

            if is_final {
                return Ok(found);
            }
            extent_lba = found.extent_lba;
            size_bytes = found.size_bytes;
        }

        Err(Iso9660Error::EntryNotFound(path.to_string()))
    }

    /// Read one sector of user data and take exactly `min(2048, len)` bytes,
    /// regardless of the track's resolved `user_data_size`. Used by the
    /// hasher's sector-by-sector re-read, which is pinned to 2048 bytes per
    /// sector independent of disc geometry.
    pub fn read_sector_user_data(&mut self, sector: u64) -> Result<Vec<u8>, Iso9660Error> {
        let chunk = self.backend.read_user_data(self.track, sector)?;
        let take = chunk.len().min(2048);
        Ok(chunk[..take].to_vec())
    }

    /// Read exactly `entry.size_bytes` bytes starting at `entry.extent_lba`,
    /// copying `min(remaining, user_data_size)` bytes per sector.
    pub fn read_file(&mut self, entry: &DirEntry) -> Result<Vec<u8>, Iso9660Error> {
        let mut data = Vec::with_capacity(entry.size_bytes as usize);
        let mut remaining = entry.size_bytes as usize;
        let mut sector = entry.extent_lba as u64;

        while remaining > 0 {
            let chunk = self.backend.read_user_data(self.track, sector)?;
            let take = remaining.min(chunk.len());
            data.extend_from_slice(&chunk[..take]);
            remaining -= take;
            sector += 1;
        }

        Ok(data)
    }
}

fn strip_version(name: &str) -> &str {
    match name.rfind(';') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

fn clean_name(name_bytes: &[u8], is_directory: bool) -> String {
    let raw = String::from_utf8_lossy(name_bytes).to_ascii_uppercase();
    let name = strip_version(&raw);
    if is_directory {
        name.trim_end_matches('.').to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::backend::{Track, TrackType};

    struct FakeBackend {
        tracks: Vec<Track>,
        sectors: Vec<Vec<u8>>,
    }

    impl ArchiveBackend for FakeBackend {
        fn tracks(&self) -> &[Track] {
            &self.tracks
        }

        fn read_physical_sector(
            &mut self,
            _track: u32,
            sector_index: u64,
        ) -> Result<Vec<u8>, BackendError> {
            Ok(self.sectors[sector_index as usize].clone())
        }

        fn set_track_geometry(&mut self, _track: u32, _data_offset: u32, _user_data_size: u32) {}
    }

    fn track1() -> Track {
        Track {
            number: 1,
            type_tag: TrackType::Mode1,
            physical_sector_size: 2048,
            data_offset: 0,
            user_data_size: 2048,
            pregap_frames: 0,
            total_frames: 0,
            start_frame: 0,
        }
    }

    fn pvd_sector(root_lba: u32, root_size: u32) -> Vec<u8> {
        let mut s = vec![0u8; 2048];
        s[0] = 1;
        s[1..6].copy_from_slice(b"CD001");
        let record = &mut s[156..190];
        record[2..6].copy_from_slice(&root_lba.to_le_bytes());
        record[10..14].copy_from_slice(&root_size.to_le_bytes());
        s
    }

    fn directory_record(name: &[u8], extent_lba: u32, size: u32, is_dir: bool) -> Vec<u8> {
        let len = 33 + name.len();
        let mut rec = vec![0u8; len];
        rec[0] = len as u8;
        rec[2..6].copy_from_slice(&extent_lba.to_le_bytes());
        rec[10..14].copy_from_slice(&size.to_le_bytes());
        rec[25] = if is_dir { 0x02 } else { 0x00 };
        rec[32] = name.len() as u8;
        rec[33..].copy_from_slice(name);
        rec
    }

    fn sectors_up_to_16_plus(extra: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut sectors = vec![vec![0u8; 2048]; 16];
        sectors.extend(extra);
        sectors
    }

    #[test]
    fn open_rejects_non_pvd_sector() {
        let mut backend = FakeBackend {
            tracks: vec![track1()],
            sectors: vec![vec![0u8; 2048]; 17],
        };
        let result = Iso9660Reader::open(&mut backend, 1);
        assert!(matches!(result, Err(Iso9660Error::NotADataDisc(0))));
    }

    #[test]
    fn open_extracts_root_directory_record() {
        let mut backend = FakeBackend {
            tracks: vec![track1()],
            sectors: {
                let mut s = vec![vec![0u8; 2048]; 16];
                s.push(pvd_sector(20, 2048));
                s
            },
        };
        let reader = Iso9660Reader::open(&mut backend, 1).unwrap();
        assert_eq!(reader.root.extent_lba, 20);
        assert_eq!(reader.root.size_bytes, 2048);
    }

    #[test]
    fn list_directory_skips_self_and_parent_and_strips_version() {
        let mut dir_sector = vec![0u8; 2048];
        let mut off = 0;
        for rec in [
            directory_record(&[0u8], 20, 2048, true),
            directory_record(&[1u8], 0, 2048, true),
            directory_record(b"SYSTEM.CNF;1", 25, 100, false),
        ] {
            dir_sector[off..off + rec.len()].copy_from_slice(&rec);
            off += rec.len();
        }

        let mut backend = FakeBackend {
            tracks: vec![track1()],
            sectors: sectors_up_to_16_plus(vec![pvd_sector(17, 2048), dir_sector]),
        };
        let mut reader = Iso9660Reader::open(&mut backend, 1).unwrap();
        let entries = reader.list_directory(17, 2048).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "SYSTEM.CNF");
        assert_eq!(entries[0].extent_lba, 25);
    }

    #[test]
    fn find_file_matches_case_insensitively_ignoring_version() {
        let mut dir_sector = vec![0u8; 2048];
        let rec = directory_record(b"psx.exe;1", 30, 512, false);
        dir_sector[..rec.len()].copy_from_slice(&rec);

        let mut backend = FakeBackend {
            tracks: vec![track1()],
            sectors: sectors_up_to_16_plus(vec![pvd_sector(17, 2048), dir_sector]),
        };
        let mut reader = Iso9660Reader::open(&mut backend, 1).unwrap();
        let found = reader.find_file("PSX.EXE").unwrap();
        assert_eq!(found.extent_lba, 30);
        assert_eq!(found.size_bytes, 512);
    }

    #[test]
    fn read_file_reads_exact_byte_count_across_sectors() {
        let sector_a = vec![0xAAu8; 2048];
        let sector_b = vec![0xBBu8; 2048];

        let mut sectors = sectors_up_to_16_plus(vec![pvd_sector(20, 2048)]);
        sectors.push(sector_a);
        sectors.push(sector_b);

        let mut backend = FakeBackend {
            tracks: vec![track1()],
            sectors,
        };
        let mut reader = Iso9660Reader::open(&mut backend, 1).unwrap();
        let entry = DirEntry {
            name: "X".to_string(),
            extent_lba: 17,
            size_bytes: 3000,
            is_directory: false,
        };
        let data = reader.read_file(&entry).unwrap();
        assert_eq!(data.len(), 3000);
        assert!(data[..2048].iter().all(|&b| b == 0xAA));
        assert!(data[2048..].iter().all(|&b| b == 0xBB));
    }
}
