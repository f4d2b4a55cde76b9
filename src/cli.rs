//! Command-line surface.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::HashError;

/// Compute redump-style MD5 identifier hashes for PlayStation 1 disc images.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the CHD codec library. The bundled decoder is pure Rust, so
    /// this flag is accepted for compatibility and otherwise ignored.
    #[arg(long, value_name = "PATH")]
    pub lib: Option<PathBuf>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// CHD archives or CUE sheets to hash. When empty, scans the current
    /// directory for `*.chd` and `*.cue` files.
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

/// Run the CLI. Returns `Ok(true)` if every file hashed successfully.
pub fn run(args: Args) -> std::io::Result<bool> {
    if args.lib.is_some() {
        log::debug!("--lib is a no-op: the bundled CHD decoder needs no native library");
    }

    let files = if args.files.is_empty() {
        scan_directory(Path::new("."))?
    } else {
        args.files
    };

    if files.is_empty() {
        log::warn!("no .chd or .cue files found");
        return Ok(false);
    }

    let mut all_succeeded = true;
    for file in &files {
        match hash_one(file) {
            Ok(info) => {
                println!("{}  {}", info.md5, file.display());
                log::debug!(
                    "{}: boot executable {} at LBA {}, {} bytes hashed ({})",
                    file.display(),
                    info.name,
                    info.lba,
                    info.size,
                    info.canonical_path
                );
            }
            Err(e) => {
                log::error!("{}: {}", file.display(), e);
                all_succeeded = false;
            }
        }
    }

    Ok(all_succeeded)
}

fn hash_one(path: &Path) -> Result<crate::psx::ExecutableInfo, HashError> {
    let (mut backend, track) = crate::disc::open(path)?;
    let info = crate::psx::hash_disc(backend.as_mut(), track)?;
    Ok(info)
}

/// Scans for `*.chd` and `*.cue`. A bare `*.bin` with no sibling `.cue` has
/// no backend to read it through, so it's logged as a warning and skipped.
fn scan_directory(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut cue_stems = std::collections::HashSet::new();
    let mut bins = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("chd") | Some("cue") => {
                if extension.as_deref() == Some("cue") {
                    if let Some(stem) = path.file_stem() {
                        cue_stems.insert(stem.to_os_string());
                    }
                }
                found.push(path);
            }
            Some("bin") => bins.push(path),
            _ => {}
        }
    }

    for bin in bins {
        let has_cue = bin.file_stem().is_some_and(|stem| cue_stems.contains(stem));
        if !has_cue {
            log::warn!("{}: no sibling .cue file, skipping", bin.display());
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_directory_finds_chd_and_cue_but_skips_bare_bin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.chd"), b"").unwrap();
        std::fs::write(dir.path().join("b.cue"), b"").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"").unwrap();
        std::fs::write(dir.path().join("c.bin"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let found = scan_directory(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.chd", "b.cue"]);
    }
}
