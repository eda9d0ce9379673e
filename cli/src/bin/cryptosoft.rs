//! cryptosoft - Reference encryption tool driven by the backup engine.
//!
//! Usage: `cryptosoft <FILE> <KEY>`. XORs the file in place with the key
//! bytes, so running it twice restores the original. Only one instance runs
//! at a time machine-wide.
//!
//! Exit code: the encryption time in milliseconds, or a negative code on
//! failure (-1 for an error, -2 if another instance holds the lock).

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use backup_engine::encryption::{EXIT_ALREADY_RUNNING, EXIT_FAILED, TOOL_INSTANCE_LOCK_NAME};
use backup_engine::NamedLock;
use clap::Parser;

/// Unix keeps 8 bits of exit status and shells reserve 126 and up.
#[cfg(unix)]
const MAX_DURATION_CODE: u128 = 125;
#[cfg(not(unix))]
const MAX_DURATION_CODE: u128 = i32::MAX as u128;

#[derive(Parser, Debug)]
#[command(name = "cryptosoft")]
#[command(version)]
#[command(about = "XOR-encrypt a file in place")]
struct Args {
    /// File to encrypt
    file: PathBuf,

    /// Encryption key
    key: String,
}

fn main() {
    let args = Args::parse();
    std::process::exit(run(&args));
}

fn run(args: &Args) -> i32 {
    let _instance = match NamedLock::try_acquire(TOOL_INSTANCE_LOCK_NAME) {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            eprintln!("cryptosoft: another instance is running");
            return EXIT_ALREADY_RUNNING as i32;
        }
        Err(e) => {
            eprintln!("cryptosoft: {e}");
            return EXIT_FAILED as i32;
        }
    };

    let started = Instant::now();
    match encrypt_file(args) {
        Ok(()) => duration_code(started.elapsed().as_millis()),
        Err(e) => {
            eprintln!("cryptosoft: {e:#}");
            EXIT_FAILED as i32
        }
    }
}

fn encrypt_file(args: &Args) -> Result<()> {
    ensure!(!args.key.is_empty(), "key must not be empty");
    let mut data = fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    xor_in_place(&mut data, args.key.as_bytes());
    fs::write(&args.file, data).with_context(|| format!("Failed to write {}", args.file.display()))
}

fn xor_in_place(data: &mut [u8], key: &[u8]) {
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

fn duration_code(elapsed_ms: u128) -> i32 {
    elapsed_ms.clamp(1, MAX_DURATION_CODE) as i32
}
