//! End-to-end transfer scenarios driven over real loopback UDP sockets.

use std::thread;
use std::time::Instant;

use rudp::{Connection, Error};

fn recv_exact(conn: &mut Connection, total: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(total);
    let mut buf = [0u8; 4096];
    while out.len() < total {
        let n = conn.recv(&mut buf).unwrap();
        assert_ne!(n, 0, "peer closed before delivering all expected bytes");
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn clean_small_transfer() {
    let mut listener = Connection::listen(0, 0.0).unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();
        let bytes = recv_exact(&mut conn, 11);
        conn.close().unwrap();
        bytes
    });

    let mut client = Connection::connect("127.0.0.1", port, 0.0).unwrap();
    client.send(b"hello world").unwrap();
    client.close().unwrap();

    assert_eq!(server.join().unwrap(), b"hello world");
}

#[test]
fn multi_segment_transfer() {
    let data: Vec<u8> = (0..3072u32).map(|i| (i % 256) as u8).collect();

    let mut listener = Connection::listen(0, 0.0).unwrap();
    let port = listener.local_addr().unwrap().port();
    let expected = data.clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();
        let bytes = recv_exact(&mut conn, 3072);
        conn.close().unwrap();
        bytes
    });

    let mut client = Connection::connect("127.0.0.1", port, 0.0).unwrap();
    client.send(&data).unwrap();
    client.close().unwrap();

    assert_eq!(server.join().unwrap(), expected);
}

#[test]
fn loss_and_retransmission_preserves_the_byte_sequence() {
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();

    let mut listener = Connection::listen(0, 0.3).unwrap();
    let port = listener.local_addr().unwrap().port();
    let expected = data.clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();
        let bytes = recv_exact(&mut conn, 10_000);
        conn.close().unwrap();
        bytes
    });

    let mut client = Connection::connect("127.0.0.1", port, 0.3).unwrap();
    client.send(&data).unwrap();
    client.close().unwrap();

    assert_eq!(server.join().unwrap(), expected);
}

#[test]
fn handshake_failure_returns_within_roughly_one_rto() {
    // Bind and immediately drop a listener to get a port nothing answers on.
    let probe = Connection::listen(0, 0.0).unwrap();
    let dead_port = probe.local_addr().unwrap().port();
    drop(probe);

    let started = Instant::now();
    let result = Connection::connect("127.0.0.1", dead_port, 0.0);
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(Error::HandshakeFailed(_))));
    assert!(
        elapsed.as_millis() < 2000,
        "handshake failure took {elapsed:?}, expected roughly one RTO"
    );
}
