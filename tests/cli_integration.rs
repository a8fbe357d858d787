// CLI integration tests: argument errors, startup, and signal shutdown.
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_linelog");
    Command::new(exe)
}

fn parse_json_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().next().expect("json line");
    serde_json::from_str(line).expect("valid json")
}

/// Reads stderr until the `listening` line and returns the bound address.
fn wait_for_listening(child: &mut Child) -> (SocketAddr, BufReader<std::process::ChildStderr>) {
    let stderr = child.stderr.take().expect("stderr");
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).expect("stderr line");
        assert!(read > 0, "server exited before listening");
        if !line.contains("listening") {
            continue;
        }
        let addr = line
            .split_whitespace()
            .find_map(|token| token.strip_prefix("addr="))
            .expect("addr field");
        return (addr.parse().expect("socket addr"), reader);
    }
}

fn terminate(child: &Child) {
    // SAFETY: signalling a child we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);
}

#[test]
fn help_exits_successfully() {
    let output = cmd().arg("--help").output().expect("help");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("--medium"));
    assert!(text.contains("AESDCHAR_IOCSEEKTO"));
}

#[test]
fn zero_capacity_is_a_usage_error() {
    let output = cmd()
        .args(["--bind", "127.0.0.1:0", "--medium", "slots", "--capacity", "0"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
    let json = parse_json_line(&output.stderr);
    assert_eq!(json["error"]["kind"], "Usage");
    assert!(json["error"]["hint"].is_string());
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let output = cmd().arg("--no-such-flag").output().expect("run");
    assert_eq!(output.status.code(), Some(2));
    let json = parse_json_line(&output.stderr);
    assert_eq!(json["error"]["kind"], "Usage");
}

#[test]
fn serves_until_sigterm_then_removes_data_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data_file = temp.path().join("aesdsocketdata");

    let mut child = cmd()
        .args([
            "--bind",
            "127.0.0.1:0",
            "--data-file",
            data_file.to_str().expect("utf8 path"),
            "--stamp-interval-secs",
            "0",
        ])
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    let (addr, mut stderr) = wait_for_listening(&mut child);

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    stream.write_all(b"hello\n").expect("send");
    let mut reply = [0u8; 6];
    stream.read_exact(&mut reply).expect("reply");
    assert_eq!(&reply, b"hello\n");
    assert_eq!(std::fs::read(&data_file).expect("data file"), b"hello\n");
    drop(stream);

    terminate(&child);
    let status = child.wait().expect("wait");
    assert!(status.success());
    assert!(!data_file.exists());

    let mut rest = String::new();
    stderr.read_to_string(&mut rest).expect("stderr");
    assert!(rest.contains("caught signal, exiting"));
}

#[test]
fn relative_data_file_resolves_against_launch_directory() {
    let temp = tempfile::tempdir().expect("tempdir");

    let mut child = cmd()
        .current_dir(temp.path())
        .args([
            "--bind",
            "127.0.0.1:0",
            "--data-file",
            "rel.data",
            "--stamp-interval-secs",
            "0",
        ])
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    let (addr, _stderr) = wait_for_listening(&mut child);

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    stream.write_all(b"rel\n").expect("send");
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).expect("reply");
    assert_eq!(
        std::fs::read(temp.path().join("rel.data")).expect("data file"),
        b"rel\n"
    );
    drop(stream);

    terminate(&child);
    assert!(child.wait().expect("wait").success());
    assert!(!temp.path().join("rel.data").exists());
}
