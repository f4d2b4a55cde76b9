//! Boot executable discovery and redump-style MD5 hashing.
//!
//! No direct teacher analogue exists for this module: the closest relative,
//! `extract_serial` in `ps1_disc.rs`, derives a region/serial string rather
//! than a hash input, but its SYSTEM.CNF/PSX.EXE fallback chain shaped the
//! discovery order here.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::disc::backend::ArchiveBackend;
use crate::disc::iso9660::{DirEntry, Iso9660Error, Iso9660Reader};

static BOOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)BOOT\s*=\s*(.+?)(?:\s|;|$)").unwrap());

const SERIAL_PREFIXES: [&str; 3] = ["SLUS", "SLES", "SCUS"];
const PS_X_EXE_MAGIC: &[u8; 8] = b"PS-X EXE";

#[derive(Debug, Error)]
pub enum PsxError {
    #[error("no boot executable found on disc")]
    ExecutableNotFound,

    #[error("failed to read boot executable: {0}")]
    ExecutableReadFailed(String),

    #[error(transparent)]
    Iso9660(#[from] Iso9660Error),
}

/// The final per-disc result: the redump-style MD5 plus enough of the
/// resolved boot executable's placement to identify it without re-deriving
/// anything.
#[derive(Debug, Clone)]
pub struct ExecutableInfo {
    pub md5: String,
    pub lba: u32,
    pub size: u32,
    pub name: String,
    pub canonical_path: String,
}

/// Run the full discovery → truncation → hashing pipeline for one data track
/// of an already-opened backend.
pub fn hash_disc(backend: &mut dyn ArchiveBackend, track: u32) -> Result<ExecutableInfo, PsxError> {
    let mut iso = Iso9660Reader::open(backend, track)?;
    let raw_path = discover_boot_path(&mut iso)?;
    let hash_path = hash_path_of(&raw_path);
    let lookup_path = lookup_path_of(&raw_path);

    let entry = iso.find_file(&lookup_path)?;
    let buffer = iso
        .read_file(&entry)
        .map_err(|e| PsxError::ExecutableReadFailed(e.to_string()))?;
    if let Some(declared) = declared_length(&buffer) {
        if declared > buffer.len() {
            log::warn!(
                "PS-X EXE header reports {} bytes, larger than the stored extent ({}); using the extent as-is",
                declared,
                buffer.len()
            );
        }
    }
    let truncated_len = truncated_length(&buffer);
    let md5 = build_hash(&mut iso, &entry, &hash_path, truncated_len)
        .map_err(|e| PsxError::ExecutableReadFailed(e.to_string()))?;

    Ok(ExecutableInfo {
        md5,
        lba: entry.extent_lba,
        size: truncated_len as u32,
        name: executable_name(&hash_path),
        canonical_path: hash_path,
    })
}

/// The last `\`-separated segment of `hash_path` — the bare executable
/// filename, e.g. `"EXE\\GAME.EXE;1"` -> `"GAME.EXE;1"`.
fn executable_name(hash_path: &str) -> String {
    hash_path
        .rsplit('\\')
        .next()
        .unwrap_or(hash_path)
        .to_string()
}

/// Try `SYSTEM.CNF`'s `BOOT=` line, then `PSX.EXE`, then a `SLUS`/`SLES`/`SCUS`
/// serial in the root directory.
fn discover_boot_path(iso: &mut Iso9660Reader) -> Result<String, PsxError> {
    if let Ok(entry) = iso.find_file("SYSTEM.CNF") {
        let content = iso.read_file(&entry)?;
        let text = String::from_utf8_lossy(&content);
        if let Some(caps) = BOOT_RE.captures(&text) {
            return Ok(caps[1].trim().to_string());
        }
    }

    if iso.find_file("PSX.EXE").is_ok() {
        return Ok("PSX.EXE".to_string());
    }

    let root = iso.root.clone();
    let entries = iso.list_directory(root.extent_lba, root.size_bytes)?;
    for entry in &entries {
        let name = strip_version(&entry.name).to_ascii_uppercase();
        if SERIAL_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return Ok(entry.name.clone());
        }
    }

    Err(PsxError::ExecutableNotFound)
}

/// What feeds the MD5: strip a `cdrom:` prefix, normalize separators to `\`,
/// strip leading `\`, preserve case and the `;N` suffix.
fn hash_path_of(raw: &str) -> String {
    let stripped = strip_cdrom_prefix(raw);
    let backslashed = stripped.replace('/', "\\");
    backslashed.trim_start_matches('\\').to_string()
}

/// What feeds ISO traversal: strip `cdrom:`, strip all leading `/`/`\`,
/// normalize separators to `/`, strip the version suffix.
fn lookup_path_of(raw: &str) -> String {
    let stripped = strip_cdrom_prefix(raw);
    let trimmed = stripped.trim_start_matches(['/', '\\']);
    let normalized = trimmed.replace('\\', "/");
    strip_version(&normalized).to_string()
}

fn strip_cdrom_prefix(raw: &str) -> &str {
    if raw.len() >= 6 && raw[..6].eq_ignore_ascii_case("cdrom:") {
        &raw[6..]
    } else {
        raw
    }
}

fn strip_version(name: &str) -> &str {
    match name.rfind(';') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// `header_size + 2048` from the `PS-X EXE` header, before clamping to the
/// buffer's actual length. `None` when the magic isn't present.
fn declared_length(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < 32 || &buffer[0..8] != PS_X_EXE_MAGIC {
        return None;
    }
    let header_size = u32::from_le_bytes([buffer[28], buffer[29], buffer[30], buffer[31]]) as usize;
    Some(header_size + 2048)
}

/// If the buffer starts with the `PS-X EXE` magic, truncate to
/// `header_size + 2048` where `header_size` is the little-endian u32 at
/// offset 28. Never pads a short buffer.
fn truncated_length(buffer: &[u8]) -> usize {
    match declared_length(buffer) {
        Some(adjusted) => adjusted.min(buffer.len()),
        None => buffer.len(),
    }
}

/// Concatenate `hash_path` bytes with a fresh sector-by-sector re-read of the
/// executable (exactly 2048 bytes per sector, stopping early on a short
/// read), then MD5 the stream.
fn build_hash(
    iso: &mut Iso9660Reader,
    entry: &DirEntry,
    hash_path: &str,
    truncated_len: usize,
) -> Result<String, Iso9660Error> {
    let mut stream = Vec::with_capacity(hash_path.len() + truncated_len);
    stream.extend_from_slice(hash_path.as_bytes());

    let sector_count = (truncated_len as u64).div_ceil(2048);
    for i in 0..sector_count {
        let sector = iso.read_sector_user_data(entry.extent_lba as u64 + i)?;
        if sector.is_empty() {
            break;
        }
        let take = sector.len().min(2048);
        stream.extend_from_slice(&sector[..take]);
    }

    Ok(format!("{:x}", md5::compute(&stream)))
}
