//! Computes redump-style MD5 identifier hashes for PlayStation 1 disc images
//! from CHD archives or BIN/CUE raw dumps.

use clap::Parser;

use psx_hash::cli::{self, Args};

fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli::run(args) {
        Ok(true) => std::process::ExitCode::SUCCESS,
        Ok(false) => std::process::ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
