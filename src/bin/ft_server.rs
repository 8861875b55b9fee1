//! Receives one framed file per accepted connection and verifies its
//! end-to-end SHA-256 digest. Demonstrates the engine's streaming API; no
//! part of this is required by the transport itself.

use std::env;
use std::fs::File;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use rudp::Connection;
use sha2::{Digest, Sha256};
use tracing::{error, info};

const STALL_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let Some(port) = args.next().and_then(|s| s.parse::<u16>().ok()) else {
        eprintln!("usage: ft-server <port> [loss-rate]");
        return ExitCode::FAILURE;
    };
    let loss_rate: f64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);

    let mut listener = match Connection::listen(port, loss_rate) {
        Ok(c) => c,
        Err(e) => {
            error!("bind failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(port, "listening");

    loop {
        let mut conn = match listener.accept() {
            Ok(c) => c,
            Err(e) => {
                error!("accept failed: {e}");
                continue;
            }
        };
        info!("accepted connection");

        if let Err(e) = receive_one(&mut conn) {
            error!("transfer failed: {e}");
        }
        let _ = conn.close();
    }
}

fn receive_one(conn: &mut Connection) -> Result<(), Box<dyn std::error::Error>> {
    let name_len = read_exact_n(conn, 1)?[0] as usize;
    let name = String::from_utf8_lossy(&read_exact_n(conn, name_len)?).to_string();
    let size_bytes = read_exact_n(conn, 4)?;
    let size = u32::from_be_bytes(size_bytes.try_into().unwrap()) as usize;

    info!(name, size, "receiving");

    let mut file = File::create(&name)?;
    let mut hasher = Sha256::new();
    let mut remaining = size;
    let mut buf = [0u8; 4096];

    while remaining > 0 {
        let want = remaining.min(buf.len());
        match conn.recv_timeout(&mut buf[..want], STALL_TIMEOUT)? {
            Some(0) => return Err("peer closed before transfer completed".into()),
            Some(n) => {
                file.write_all(&buf[..n])?;
                hasher.update(&buf[..n]);
                remaining -= n;
            }
            None => return Err(format!("stalled with {remaining} bytes remaining").into()),
        }
    }

    let expected_digest = read_exact_n(conn, 32)?;
    let actual_digest = hasher.finalize();
    if actual_digest.as_slice() == expected_digest.as_slice() {
        info!(name, "digest OK");
    } else {
        error!(name, "digest MISMATCH");
    }

    Ok(())
}

fn read_exact_n(conn: &mut Connection, n: usize) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut out = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        match conn.recv_timeout(&mut out[filled..], STALL_TIMEOUT)? {
            Some(0) | None => return Err(format!("connection stalled after {filled} of {n} bytes").into()),
            Some(read) => filled += read,
        }
    }
    Ok(out)
}
