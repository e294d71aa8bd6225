//! Client Integration Tests
//!
//! Runs the `usbgate-client` binary against stand-in daemon sockets.
//!
//! Run with: `cargo test -p client --test integration_tests`

use protocol::{Endpoint, Request, decode_request, encode_block, read_frame};
use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn client(socket_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_usbgate-client"))
        .arg("--socket-dir")
        .arg(socket_dir)
        .args(args)
        .output()
        .expect("Failed to run client")
}

/// Serve one frame on a pull endpoint
fn serve_once(socket_dir: &Path, endpoint: Endpoint, lines: &[&str]) -> thread::JoinHandle<()> {
    let listener = UnixListener::bind(endpoint.path_in(socket_dir)).unwrap();
    let frame = encode_block(lines).unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(&frame).unwrap();
    })
}

#[test]
fn test_rules_command_prints_labeled_rules() {
    let dir = TempDir::new().unwrap();
    let server = serve_once(dir.path(), Endpoint::RuleSet, &["0 0 0 0 8 0", "0 0 0 0 0 1"]);

    let output = client(dir.path(), &["rules"]);
    server.join().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("1. [BUS:0] [PORT:0] [VENDOR ID:0] [PRODUCT ID:0] [INTERFACE CLASS:8] [PERMISSION]0"));
    assert!(stdout.contains("2. [BUS:0]"));
}

#[test]
fn test_devices_command_shows_blocked_interfaces() {
    let dir = TempDir::new().unwrap();
    let server = serve_once(
        dir.path(),
        Endpoint::InterfaceInfo,
        &["Cruzer_Blade SanDisk 1 3 1921 21863 1 1 8 0"],
    );

    let output = client(dir.path(), &["devices"]);
    server.join().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Cruzer Blade (SanDisk)  0781:5567  bus 1 port 3  [RESTRICTED]"));
    assert!(stdout.contains("MASS STORAGE (8) [blocked]"));
}

#[test]
fn test_upload_is_delivered_when_daemon_connects() {
    let dir = TempDir::new().unwrap();
    let rules = dir.path().join("office.rules");
    std::fs::write(&rules, "0 0 0 0 8 0\n\n0 0 0 0 0 1\n").unwrap();

    let update = Endpoint::RuleUpdate.path_in(dir.path());
    let daemon = thread::spawn(move || {
        // poll the way the daemon does on each tick
        let mut stream = loop {
            match UnixStream::connect(&update) {
                Ok(stream) => break stream,
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        };
        let payload = read_frame(&mut stream).unwrap();
        decode_request(&payload).unwrap()
    });

    let output = client(dir.path(), &["upload", rules.to_str().unwrap()]);
    assert!(output.status.success(), "{:?}", output);

    assert_eq!(
        daemon.join().unwrap(),
        Request::UploadRuleSet(vec!["0 0 0 0 8 0".to_string(), "0 0 0 0 0 1".to_string()])
    );
    assert!(!Endpoint::RuleUpdate.path_in(dir.path()).exists());
}

#[test]
fn test_missing_daemon_is_an_error() {
    let dir = TempDir::new().unwrap();
    let output = client(dir.path(), &["rules"]);
    assert!(!output.status.success());
}

#[test]
fn test_update_times_out_without_daemon() {
    let dir = TempDir::new().unwrap();
    let output = client(dir.path(), &["--timeout", "0", "load", "office.rules"]);

    assert!(!output.status.success());
    assert!(!Endpoint::RuleUpdate.path_in(dir.path()).exists());
}
