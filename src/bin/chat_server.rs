//! Interactive line-based chat over one accepted connection. A reader
//! thread feeds stdin lines through a channel so the main thread can
//! interleave them with connection polling without sharing the connection
//! across threads (the engine is single-threaded per connection).

use std::env;
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rudp::Connection;
use tracing::{error, info};

const POLL: Duration = Duration::from_millis(100);
const QUIT: &str = "/quit";

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let Some(port) = args.next().and_then(|s| s.parse::<u16>().ok()) else {
        eprintln!("usage: chat-server <port> [loss-rate]");
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
    info!(port, "waiting for a peer");

    let conn = match listener.accept() {
        Ok(c) => c,
        Err(e) => {
            error!("accept failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("peer connected, type {QUIT} to leave");

    chat_loop(conn)
}

fn chat_loop(mut conn: Connection) -> ExitCode {
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut inbound = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        match rx.try_recv() {
            Ok(line) => {
                let quit = line.trim() == QUIT;
                let mut framed = line.into_bytes();
                framed.push(b'\n');
                if let Err(e) = conn.send(&framed) {
                    error!("send failed: {e}");
                    break;
                }
                if quit {
                    let _ = conn.close();
                    break;
                }
            }
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => {
                let _ = conn.close();
                break;
            }
        }

        match conn.recv_timeout(&mut buf, POLL) {
            Ok(Some(0)) => {
                println!("(peer closed the connection)");
                break;
            }
            Ok(Some(n)) => {
                inbound.extend_from_slice(&buf[..n]);
                while let Some(pos) = inbound.iter().position(|&b| b == b'\n') {
                    let line = String::from_utf8_lossy(&inbound[..pos]).to_string();
                    if line.trim() == QUIT {
                        println!("(peer left the chat)");
                        let _ = conn.close();
                        return ExitCode::SUCCESS;
                    }
                    println!("peer> {line}");
                    inbound.drain(..=pos);
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("recv failed: {e}");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}
