//! Process-level behavior of the eof-listener binary: argument handling,
//! exit codes and signal shutdown.

use std::io::{BufRead, BufReader, Lines, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

const RESPONSE: &[u8] = b"RESP: received all of the request\n";

fn listener_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_eof-listener"));
    cmd.env("RUST_LOG", "info");
    cmd
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_no_arguments_prints_usage() {
    let output = listener_bin().output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr: {stderr}");
}

#[test]
fn test_missing_port_prints_usage() {
    let output = listener_bin().arg("127.0.0.1").output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr: {stderr}");
}

#[test]
fn test_invalid_port() {
    let output = listener_bin()
        .args(["127.0.0.1", "notaport"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_help_exits_cleanly() {
    let output = listener_bin().arg("--help").output().unwrap();

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<HOST>"), "stdout: {stdout}");
}

#[test]
fn test_bind_failure() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let output = listener_bin()
        .args(["127.0.0.1", &port.to_string()])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_zero_max_connections_rejected() {
    let output = listener_bin()
        .args(["127.0.0.1", "0", "--max-connections", "0"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_connections"), "stderr: {stderr}");
}

/// Start the listener and block until it logs readiness.
#[cfg(unix)]
fn spawn_ready(port: u16, extra: &[&str]) -> (Child, Lines<BufReader<ChildStdout>>) {
    let mut child = listener_bin()
        .args(["127.0.0.1", &port.to_string()])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Stdout stays open until the child has exited.
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();
    loop {
        let line = lines
            .next()
            .expect("listener exited before it was ready")
            .unwrap();
        if line.contains("Listening") {
            break;
        }
    }
    (child, lines)
}

#[cfg(unix)]
fn interrupt(child: &mut Child) -> Option<i32> {
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
    assert_eq!(rc, 0);
    child.wait().unwrap().code()
}

#[cfg(unix)]
#[test]
fn test_interrupt_shuts_down_cleanly() {
    let port = free_port();
    let (mut child, mut lines) = spawn_ready(port, &[]);

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(b"hello\neof\n").unwrap();
    let mut buf = [0u8; RESPONSE.len()];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], RESPONSE);

    // The plain line is only observable through the log.
    loop {
        let line = lines
            .next()
            .expect("listener exited before logging the line")
            .unwrap();
        if line.contains("Line received") && line.contains("hello") {
            break;
        }
    }

    assert_eq!(interrupt(&mut child), Some(0));
    drop(lines);
}

#[cfg(unix)]
#[test]
fn test_zero_workers_uses_default_runtime() {
    let port = free_port();
    let (mut child, lines) = spawn_ready(port, &["-w", "0"]);

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(b"eof\n").unwrap();
    let mut buf = [0u8; RESPONSE.len()];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], RESPONSE);

    assert_eq!(interrupt(&mut child), Some(0));
    drop(lines);
}
