//! Subprocess transport against small shell scripts
#![cfg(unix)]

use std::time::Duration;

use kodegen_claude_relay::{
    ClaudeError, ConversationKey, LaunchParams, RelayOptions, RelayOptionsBuilder,
    SubprocessTransport, Transport,
};
use tempfile::TempDir;

fn transport_for(
    script: &str,
    configure: impl FnOnce(RelayOptionsBuilder) -> RelayOptionsBuilder,
) -> (TempDir, SubprocessTransport) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.sh");
    std::fs::write(&path, script).unwrap();

    let options = configure(
        RelayOptions::builder()
            .cli_path("/bin/sh")
            .program_args(vec![path.display().to_string()]),
    )
    .build();

    let transport =
        SubprocessTransport::new(ConversationKey::from("t"), options, LaunchParams::default())
            .unwrap();
    (dir, transport)
}

#[tokio::test]
async fn test_lines_skip_blanks_and_end_with_stream() {
    let (_dir, mut transport) = transport_for(
        "echo '{\"type\":\"a\"}'\necho ''\necho '{\"type\":\"b\"}'\n",
        |b| b,
    );
    transport.connect().await.unwrap();
    assert!(transport.is_ready());

    let mut rx = transport.read_lines();
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line.unwrap());
    }
    assert_eq!(lines, vec![r#"{"type":"a"}"#, r#"{"type":"b"}"#]);

    let status = transport.wait_for_exit(Duration::from_secs(2)).await;
    assert!(status.is_some_and(|s| s.success()));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_overlong_line_is_transport_error() {
    let (_dir, mut transport) = transport_for(
        "printf '%0200d\\n' 0\n",
        |b| b.max_buffer_size(64),
    );
    transport.connect().await.unwrap();

    let mut rx = transport.read_lines();
    let first = rx.recv().await.unwrap();
    assert!(matches!(first, Err(ClaudeError::Transport(_))));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_stderr_marker_sets_flag() {
    let (_dir, mut transport) = transport_for(
        "echo 'No conversation found with session ID: abc' >&2\nexit 3\n",
        |b| b,
    );
    transport.connect().await.unwrap();
    let monitor = transport.monitor();

    let mut rx = transport.read_lines();
    assert!(rx.recv().await.is_none());

    transport.finish_stderr(Duration::from_secs(2)).await;
    assert!(monitor.session_not_found());

    let status = transport.wait_for_exit(Duration::from_secs(2)).await;
    assert_eq!(status.and_then(|s| s.code()), Some(3));
    assert!(!monitor.is_alive());
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (_dir, mut transport) = transport_for(
        "while IFS= read -r line; do echo \"$line\"; done\n",
        |b| b,
    );
    transport.connect().await.unwrap();
    let mut rx = transport.read_lines();

    transport.write("{\"n\":1}\n").await.unwrap();
    assert_eq!(rx.recv().await.unwrap().unwrap(), "{\"n\":1}");

    // Closing stdin lets the script finish on its own
    transport.end_input().await.unwrap();
    assert!(rx.recv().await.is_none());
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_close_kills_unresponsive_process() {
    let (_dir, mut transport) = transport_for(
        "trap '' TERM\nwhile true; do sleep 1; done\n",
        |b| b.close_timeout(Duration::from_millis(200)),
    );
    transport.connect().await.unwrap();
    let monitor = transport.monitor();
    assert!(monitor.is_alive());

    transport.close().await.unwrap();
    assert!(!monitor.is_alive());
    assert!(!transport.is_ready());
    assert!(transport.write("late\n").await.is_err());
}
