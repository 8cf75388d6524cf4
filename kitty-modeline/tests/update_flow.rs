//! Integration test: producer and daemon binaries end to end
//!
//! Each test gets its own runtime directory and fake terminal device, runs the
//! real `kitty-modeline` daemon with a stub renderer, and pushes updates with
//! the real `kitty-modeline-client`.
//!
//! Run with: cargo test --test update_flow

mod helpers;

use helpers::daemon_guard::{wait_for_process_exit, DaemonGuard, TestTerminal};
use helpers::polling::{wait_for_file_content, wait_for_removal};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);
const CLEAR_LINE: &str = "\x1b[2K\r";

/// Renderer stand-in: prints its arguments wrapped in zero-width markers.
/// With SLOW set it records its pid in PID_FILE and sleeps instead.
fn write_stub_renderer(dir: &Path) -> PathBuf {
    let path = dir.join("stub-prompt");
    fs::write(
        &path,
        r#"#!/bin/sh
if [ -n "$SLOW" ]; then
  echo $$ > "$PID_FILE.part" && mv "$PID_FILE.part" "$PID_FILE"
  exec sleep "$SLOW"
fi
printf '%s' "\\[<$*>\\]"
"#,
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn setup() -> (TempDir, TestTerminal) {
    let temp = TempDir::new().unwrap();
    let runtime_dir = temp.path().join("runtime");
    fs::create_dir(&runtime_dir).unwrap();
    let renderer = write_stub_renderer(temp.path());
    let terminal = TestTerminal::new(&runtime_dir, &renderer);
    (temp, terminal)
}

fn prompt_vars<'a>(pwd: &'a str, status: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("PWD", pwd),
        ("STARSHIP_CMD_STATUS", status),
        ("STARSHIP_PIPE_STATUS", status),
        ("NUM_JOBS", "0"),
    ]
}

fn expected_line(status: &str) -> String {
    format!(
        "{}<prompt --terminal-width 80 --status {} --pipestatus {} --jobs 0>",
        CLEAR_LINE, status, status
    )
}

#[test]
fn test_update_before_daemon_is_rendered_at_startup() {
    let (temp, terminal) = setup();
    let pwd = temp.path().to_string_lossy().into_owned();

    // No daemon yet: the client still succeeds by storing the update
    let status = terminal.push(&prompt_vars(&pwd, "0"));
    assert!(status.success(), "client failed: {:?}", status);
    assert!(terminal.handoff_file().exists(), "update was not stored");

    let daemon = DaemonGuard::start(&terminal).expect("daemon did not start");

    let out = wait_for_file_content(
        daemon.stdout_path(),
        |out| out.contains('>'),
        WAIT,
    )
    .expect("stored update was never rendered");
    assert_eq!(out, expected_line("0"));
    assert!(
        wait_for_removal(&terminal.handoff_file(), WAIT),
        "handoff file was not consumed"
    );
}

#[test]
fn test_live_update_reflects_exit_status() {
    let (temp, terminal) = setup();
    let pwd = temp.path().to_string_lossy().into_owned();
    let daemon = DaemonGuard::start(&terminal).expect("daemon did not start");

    assert!(terminal.push(&prompt_vars(&pwd, "1")).success());

    let out = wait_for_file_content(
        daemon.stdout_path(),
        |out| out.contains('>'),
        WAIT,
    )
    .expect("update was never rendered");
    assert_eq!(out, expected_line("1"));
    assert!(!terminal.handoff_file().exists(), "live update must not be stored");
}

#[test]
fn test_newer_update_cancels_running_render() {
    let (temp, terminal) = setup();
    let pwd = temp.path().to_string_lossy().into_owned();
    let pid_file = temp.path().join("slow.pid");
    let pid_file_str = pid_file.to_string_lossy().into_owned();
    let daemon = DaemonGuard::start(&terminal).expect("daemon did not start");

    let mut slow = prompt_vars(&pwd, "7");
    slow.push(("SLOW", "30"));
    slow.push(("PID_FILE", pid_file_str.as_str()));
    assert!(terminal.push(&slow).success());

    let pid = wait_for_file_content(&pid_file, |p| p.trim().parse::<i32>().is_ok(), WAIT)
        .expect("slow render never started")
        .trim()
        .parse::<i32>()
        .unwrap();

    assert!(terminal.push(&prompt_vars(&pwd, "0")).success());

    let out = wait_for_file_content(
        daemon.stdout_path(),
        |out| out.contains('>'),
        WAIT,
    )
    .expect("newer update was never rendered");
    assert_eq!(out, expected_line("0"));
    assert!(
        wait_for_process_exit(pid, WAIT),
        "superseded render {} is still running",
        pid
    );

    // Nothing from the cancelled render shows up later either
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(String::from_utf8_lossy(&daemon.stdout()), expected_line("0"));
}

#[test]
fn test_missing_required_key_is_logged_and_skipped() {
    let (temp, terminal) = setup();
    let pwd = temp.path().to_string_lossy().into_owned();
    let daemon = DaemonGuard::start(&terminal).expect("daemon did not start");

    let incomplete: Vec<_> = prompt_vars(&pwd, "0")
        .into_iter()
        .filter(|(k, _)| *k != "STARSHIP_CMD_STATUS")
        .collect();
    assert!(terminal.push(&incomplete).success());

    wait_for_file_content(
        terminal.log_file(),
        |log| log.contains("STARSHIP_CMD_STATUS not found in passed environment"),
        WAIT,
    )
    .expect("missing key was not logged");
    assert!(daemon.stdout().is_empty(), "nothing should be rendered");

    // The daemon keeps serving
    assert!(terminal.push(&prompt_vars(&pwd, "2")).success());
    let out = wait_for_file_content(daemon.stdout_path(), |out| out.contains('>'), WAIT)
        .expect("later update was never rendered");
    assert_eq!(out, expected_line("2"));
}

#[test]
fn test_second_daemon_for_same_terminal_exits_1() {
    let (_temp, terminal) = setup();
    let _daemon = DaemonGuard::start(&terminal).expect("daemon did not start");

    let output = terminal
        .daemon_command()
        .output()
        .expect("failed to run second daemon");
    assert_eq!(output.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("already serving"),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_sigterm_stops_daemon_and_kills_render() {
    let (temp, terminal) = setup();
    let pwd = temp.path().to_string_lossy().into_owned();
    let pid_file = temp.path().join("slow.pid");
    let pid_file_str = pid_file.to_string_lossy().into_owned();
    let daemon = DaemonGuard::start(&terminal).expect("daemon did not start");

    let mut slow = prompt_vars(&pwd, "0");
    slow.push(("SLOW", "30"));
    slow.push(("PID_FILE", pid_file_str.as_str()));
    assert!(terminal.push(&slow).success());
    let pid = wait_for_file_content(&pid_file, |p| p.trim().parse::<i32>().is_ok(), WAIT)
        .expect("slow render never started")
        .trim()
        .parse::<i32>()
        .unwrap();

    let status = daemon.terminate(WAIT).expect("daemon ignored SIGTERM");
    assert!(status.success(), "unexpected exit: {:?}", status);
    assert!(wait_for_process_exit(pid, WAIT), "render outlived the daemon");
}
