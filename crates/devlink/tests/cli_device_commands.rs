#![cfg(feature = "cli")]

use std::process::{Command, Output};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use devlink_mux::Mux;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::Notify;

const STATUS: u8 = 0x03;
const VERSION: u8 = 0x04;
const LOCK: u8 = 0x10;
const UNLOCK: u8 = 0x11;
const OK: u8 = 0x20;
const ERROR: u8 = 0x21;
const LIST_DIR: u8 = 0x04;
const LAST_DATA: u8 = 0x11;

fn controller_reply(request: &[u8]) -> Vec<u8> {
    match request[0] {
        STATUS => [&[STATUS, 1, 0][..], b"OK"].concat(),
        VERSION => [&[VERSION][..], b"firmware 2.1\nboard test\n"].concat(),
        LOCK | UNLOCK => vec![OK],
        _ => vec![ERROR],
    }
}

fn uploader_reply(request: &[u8]) -> Vec<u8> {
    match request[0] {
        LIST_DIR => [&[LAST_DATA][..], b"fmain.js\0dlib\0"].concat(),
        _ => vec![ERROR],
    }
}

fn reply(mux: &Weak<Mux>, channel: u8, data: Vec<u8>) {
    if let Some(mux) = mux.upgrade() {
        let mut packet = mux.build_packet(channel).expect("packet");
        packet.write(&data);
        packet.send().expect("send");
    }
}

/// Accept connections and answer like a device. Returns the port.
fn spawn_device(runtime: &Runtime) -> u16 {
    let listener = runtime
        .block_on(TcpListener::bind("127.0.0.1:0"))
        .expect("bind should succeed");
    let port = listener.local_addr().expect("local addr").port();

    runtime.spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mux = Arc::new(Mux::new(stream));
                for channel in [0u8, 1] {
                    let weak = Arc::downgrade(&mux);
                    mux.subscribe_channel(
                        channel,
                        Arc::new(move |request: Bytes| {
                            if request.is_empty() {
                                return;
                            }
                            let data = match channel {
                                0 => controller_reply(&request),
                                _ => uploader_reply(&request),
                            };
                            reply(&weak, channel, data);
                        }),
                    )
                    .expect("subscribe");
                }
                let closed = Arc::new(Notify::new());
                let notify = Arc::clone(&closed);
                mux.on_end(move || notify.notify_one());
                mux.start();
                closed.notified().await;
                mux.destroy().await;
            });
        }
    });
    port
}

fn devlink(port: u16, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_devlink"))
        .arg("--log-level")
        .arg("error")
        .arg("--socket")
        .arg(format!("127.0.0.1:{port}"))
        .args(args)
        .output()
        .expect("devlink should run")
}

#[test]
fn status_prints_json() {
    let runtime = Runtime::new().expect("runtime");
    let port = spawn_device(&runtime);

    let output = devlink(port, &["--format", "json", "status"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["running"], true);
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["status"], "OK");
}

#[test]
fn version_prints_rows() {
    let runtime = Runtime::new().expect("runtime");
    let port = spawn_device(&runtime);

    let output = devlink(port, &["--format", "pretty", "version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "firmware 2.1\nboard test\n"
    );
}

#[test]
fn ls_lists_entries() {
    let runtime = Runtime::new().expect("runtime");
    let port = spawn_device(&runtime);

    let output = devlink(port, &["--format", "json", "ls", "/code"]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    assert_eq!(
        json,
        serde_json::json!([
            {"name": "main.js", "is_dir": false},
            {"name": "lib", "is_dir": true},
        ])
    );
}

#[test]
fn device_rejection_exits_with_failure() {
    let runtime = Runtime::new().expect("runtime");
    let port = spawn_device(&runtime);

    let output = devlink(port, &["stop"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("device replied ERROR"), "stderr: {stderr}");
}

#[test]
fn refused_connection_exits_with_transport_code() {
    let runtime = Runtime::new().expect("runtime");
    let port = {
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let output = devlink(port, &["status"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn bad_timeout_is_a_usage_error() {
    let output = devlink(1, &["--timeout", "soon", "status"]);
    assert_eq!(output.status.code(), Some(64));
}
