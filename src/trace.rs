//! Protocol-level trace sink (spec §6.3).
//!
//! When `RUDP_LOG=1` is set in the environment, each connection appends
//! timestamped event lines to `server_log.txt` (responder/listen role) or
//! `client_log.txt` (initiator role). This is distinct from the `tracing`
//! instrumentation sprinkled through the engine: the line grammar here is a
//! contract the boundary scenarios in spec §8 assert against, not a generic
//! diagnostic feed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Which log file a trace sink writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    fn file_name(self) -> &'static str {
        match self {
            Role::Server => "server_log.txt",
            Role::Client => "client_log.txt",
        }
    }
}

/// A per-connection trace sink. A no-op unless `RUDP_LOG=1` is set at
/// construction time.
pub struct Trace {
    sink: Option<Mutex<File>>,
}

impl Trace {
    pub fn new(role: Role) -> Self {
        let enabled = std::env::var("RUDP_LOG").map(|v| v == "1").unwrap_or(false);

        let sink = if enabled {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(role.file_name())
                .ok()
                .map(Mutex::new)
        } else {
            None
        };

        Trace { sink }
    }

    /// A sink that never writes anywhere, for tests that don't care about
    /// the trace file contract.
    pub fn disabled() -> Self {
        Trace { sink: None }
    }

    fn emit(&self, line: std::fmt::Arguments) {
        let Some(sink) = &self.sink else { return };
        let Ok(mut file) = sink.lock() else { return };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let _ = writeln!(
            file,
            "{}.{:03} [LOG] {}",
            now.as_secs(),
            now.subsec_millis(),
            line
        );
    }

    pub fn snd_syn(&self, seq: u32) {
        self.emit(format_args!("SND SYN SEQ={seq}"));
    }

    pub fn snd_data(&self, seq: u32, len: usize) {
        self.emit(format_args!("SND DATA SEQ={seq} LEN={len}"));
    }

    pub fn rcv_data(&self, seq: u32, len: usize) {
        self.emit(format_args!("RCV DATA SEQ={seq} LEN={len}"));
    }

    pub fn rcv_ack(&self, ack: u32) {
        self.emit(format_args!("RCV ACK={ack}"));
    }

    pub fn retx_data(&self, seq: u32, len: usize) {
        self.emit(format_args!("RETX DATA SEQ={seq} LEN={len}"));
    }

    pub fn timeout(&self, seq: u32) {
        self.emit(format_args!("TIMEOUT SEQ={seq}"));
    }

    pub fn drop_data(&self, seq: u32) {
        self.emit(format_args!("DROP DATA SEQ={seq}"));
    }

    pub fn flow_window_update(&self, window: u16) {
        self.emit(format_args!("FLOW WIN UPDATE={window}"));
    }
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trace")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}
