//! Foreground starts: the callback runs in the invoking process.

#[path = "common/mod.rs"]
mod common;

use std::{
    cell::Cell,
    env, fs,
    path::Path,
    process::{self, Command, Stdio},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use assert_cmd::cargo::cargo_bin_cmd;
use common::{wait_for_path, wait_for_process_exit};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use predicates::str::contains;
use tempfile::tempdir;
use warden::{
    Configuration, LifecycleController, Outcome,
    lifecycle::LifecycleState,
    logs::{MemorySink, init_logging},
    signals::SignalBridge,
};

#[test]
fn foreground_start_invokes_callback_with_configuration() {
    let temp = tempdir().expect("failed to create temp dir");
    let sink = Arc::new(MemorySink::new());
    let mut config =
        Configuration::new("test-process").with_pid_path(temp.path().join("test-process.pid"));
    config.port = Some(4100);
    config.debug = true;

    let calls = Cell::new(0);
    let mut controller = LifecycleController::with_sink(sink.clone());
    let outcome = controller
        .execute(&config, |seen, _token| {
            calls.set(calls.get() + 1);
            assert_eq!(seen.name, "test-process");
            assert_eq!(seen.host, "0.0.0.0");
            assert_eq!(seen.port, Some(4100));
            Ok(())
        })
        .expect("foreground start");

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(calls.get(), 1);
    assert_eq!(controller.state(), LifecycleState::Running);
    assert!(sink.contains("Starting test-process service..."));
}

#[test]
fn binary_runs_command_in_foreground() {
    let temp = tempdir().expect("failed to create temp dir");
    let pid_path = temp.path().join("echoer.pid");

    cargo_bin_cmd!("warden")
        .args(["--name", "echoer", "--debug", "--pid"])
        .arg(&pid_path)
        .args(["--", "echo hello from $WARDEN_SERVICE"])
        .assert()
        .success()
        .stdout(contains("hello from echoer"))
        .stdout(contains("Starting echoer service..."))
        .stdout(contains("echoer finished"));

    assert!(!pid_path.exists(), "foreground runs leave no PID file");
}

#[test]
fn binary_fails_when_command_fails() {
    let temp = tempdir().expect("failed to create temp dir");

    cargo_bin_cmd!("warden")
        .args(["-n", "broken", "-P"])
        .arg(temp.path().join("broken.pid"))
        .args(["--", "exit 7"])
        .assert()
        .failure()
        .stderr(contains("Service 'broken' failed"));
}

fn assert_graceful_shutdown(sig: Signal) {
    let temp = tempdir().expect("failed to create temp dir");
    let marker = temp.path().join("ready");

    let mut warden = Command::new(env!("CARGO_BIN_EXE_warden"))
        .args(["-n", "graceful", "-P"])
        .arg(temp.path().join("graceful.pid"))
        .arg("--")
        .arg(format!("touch {} && sleep 30", marker.display()))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn warden");

    // The marker is written by the command, so the handler is already in place.
    wait_for_path(&marker);

    let started = Instant::now();
    signal::kill(Pid::from_raw(warden.id() as i32), sig).expect("send signal");
    let status = warden.wait().expect("wait for warden");

    assert!(status.success(), "{sig} should exit 0, got {status:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    wait_for_process_exit(warden.id());
}

#[test]
fn sigterm_requests_graceful_shutdown() {
    assert_graceful_shutdown(Signal::SIGTERM);
}

#[test]
fn sigint_requests_graceful_shutdown() {
    assert_graceful_shutdown(Signal::SIGINT);
}

const STUBBORN_DIR: &str = "WARDEN_TEST_STUBBORN_DIR";
const STUBBORN_GRACE: Duration = Duration::from_millis(500);

/// Runs a service that never looks at its token, then exits 3 if the
/// controller ever hands control back.
fn run_stubborn_service(dir: &Path) -> ! {
    init_logging(Some("info"));
    let config = Configuration::new("stubborn").with_pid_path(dir.join("stubborn.pid"));
    let marker = dir.join("ready");

    let _ = LifecycleController::new()
        .with_signal_bridge(SignalBridge::new(STUBBORN_GRACE))
        .execute(&config, |_, _token| {
            fs::write(&marker, "ready\n")?;
            thread::sleep(Duration::from_secs(30));
            Ok(())
        });
    process::exit(3);
}

#[test]
fn callback_ignoring_shutdown_is_cut_off_after_grace() {
    if let Some(dir) = env::var_os(STUBBORN_DIR) {
        run_stubborn_service(Path::new(&dir));
    }

    let temp = tempdir().expect("failed to create temp dir");
    let marker = temp.path().join("ready");

    // Re-run this test alone in a child so the exit fallback cannot take
    // down the harness.
    let child = Command::new(env::current_exe().expect("current test binary"))
        .args([
            "callback_ignoring_shutdown_is_cut_off_after_grace",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(STUBBORN_DIR, temp.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn stubborn service");

    wait_for_path(&marker);

    let pid = Pid::from_raw(child.id() as i32);
    let started = Instant::now();
    signal::kill(pid, Signal::SIGINT).expect("send SIGINT");
    thread::sleep(Duration::from_millis(50));
    // Either the repeat is ignored or the process has already gone.
    let _ = signal::kill(pid, Signal::SIGTERM);

    let output = child.wait_with_output().expect("wait for stubborn service");
    let elapsed = started.elapsed();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        output.status.success(),
        "grace fallback should exit 0, got {:?}\n{stdout}",
        output.status
    );
    assert!(elapsed >= STUBBORN_GRACE, "exited before the grace window: {elapsed:?}");
    assert!(
        elapsed < STUBBORN_GRACE + Duration::from_secs(2),
        "grace fallback took {elapsed:?}"
    );
    assert_eq!(
        stdout.matches("Shutdown signal received").count(),
        1,
        "hook must fire exactly once:\n{stdout}"
    );
    assert!(stdout.contains("did not return within"));
}
