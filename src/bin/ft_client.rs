//! Sends one file over a connection, framed as a 1-byte name length, the
//! name, a 4-byte big-endian size, the bytes, and a trailing SHA-256 digest
//! the server checks on arrival.

use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use rudp::Connection;
use sha2::{Digest, Sha256};
use tracing::{error, info};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let (Some(host), Some(port), Some(path)) = (
        args.next(),
        args.next().and_then(|s| s.parse::<u16>().ok()),
        args.next(),
    ) else {
        eprintln!("usage: ft-client <host> <port> <file> [loss-rate]");
        return ExitCode::FAILURE;
    };
    let loss_rate: f64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);

    if let Err(e) = run(&host, port, &path, loss_rate) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(host: &str, port: u16, path: &str, loss_rate: f64) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let name = Path::new(path)
        .file_name()
        .ok_or("path has no file name")?
        .to_string_lossy()
        .to_string();
    if name.len() > 255 {
        return Err("file name too long for the 1-byte length prefix".into());
    }

    info!(host, port, name, size = bytes.len(), "connecting");
    let mut conn = Connection::connect(host, port, loss_rate)?;

    let mut framed = Vec::with_capacity(1 + name.len() + 4 + bytes.len());
    framed.push(name.len() as u8);
    framed.extend_from_slice(name.as_bytes());
    framed.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    framed.extend_from_slice(&bytes);

    conn.send(&framed)?;

    let digest = Sha256::digest(&bytes);
    conn.send(&digest)?;

    conn.close()?;
    info!(name, "transfer complete");
    Ok(())
}
