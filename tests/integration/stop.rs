//! Stopping instances through their PID files.

#[path = "common/mod.rs"]
mod common;

use std::{fs, sync::Arc, time::Duration};

use assert_cmd::cargo::cargo_bin_cmd;
use common::{is_process_alive, spawn_sleeper, stale_pid};
use nix::unistd::Pid;
use predicates::str::contains;
use tempfile::tempdir;
use warden::{
    Configuration, LifecycleController, Outcome,
    liveness::LivenessPoller,
    logs::MemorySink,
    pidfile::PidFile,
    signals::Delivery,
};

fn controller(sink: &Arc<MemorySink>) -> LifecycleController {
    LifecycleController::with_sink(sink.clone()).with_poller(LivenessPoller::new(
        Duration::from_secs(3),
        Duration::from_millis(50),
    ))
}

#[test]
fn wildcard_stop_counts_every_cleared_target() {
    let temp = tempdir().expect("failed to create temp dir");
    let (live_pid, reaper) = spawn_sleeper();
    let dead_pid = stale_pid();

    let live = PidFile::new(temp.path().join("svc.8001.pid"));
    let dead = PidFile::new(temp.path().join("svc.8002.pid"));
    live.write(Pid::from_raw(live_pid as i32)).expect("write live pid");
    dead.write(Pid::from_raw(dead_pid as i32)).expect("write dead pid");

    let sink = Arc::new(MemorySink::new());
    let mut config = Configuration::new("svc").with_pid_path(temp.path().join("svc.pid"));
    config.kill = Some("*".into());
    config.debug = true;

    let outcome = controller(&sink)
        .execute(&config, |_, _| panic!("kill must not start the service"))
        .expect("stop");
    reaper.join().expect("reaper thread");

    let (report, confirmed) = match outcome {
        Outcome::Stopped { report, confirmed } => (report, confirmed),
        other => panic!("expected stopped outcome, got {other:?}"),
    };
    assert!(confirmed);
    assert_eq!(report.stopped(), 2);
    assert_eq!(report.failures(), 1);
    assert_eq!(
        report.entries[0].delivery,
        Delivery::Sent(Pid::from_raw(live_pid as i32))
    );
    assert!(matches!(report.entries[1].delivery, Delivery::Failed { .. }));
    assert!(!live.exists() && !dead.exists());
    assert!(sink.contains("Failed to stop"));
}

#[test]
fn instance_target_leaves_siblings_alone() {
    let temp = tempdir().expect("failed to create temp dir");
    let (first_pid, first_reaper) = spawn_sleeper();
    let (second_pid, second_reaper) = spawn_sleeper();

    let first = PidFile::new(temp.path().join("api.8001.pid"));
    let second = PidFile::new(temp.path().join("api.8002.pid"));
    first.write(Pid::from_raw(first_pid as i32)).expect("write first");
    second.write(Pid::from_raw(second_pid as i32)).expect("write second");

    let sink = Arc::new(MemorySink::new());
    let mut config = Configuration::new("api").with_pid_path(temp.path().join("api.pid"));
    config.kill = Some("8001".into());

    let outcome = controller(&sink)
        .execute(&config, |_, _| Ok(()))
        .expect("stop instance");
    first_reaper.join().expect("first reaper");

    assert!(matches!(
        outcome,
        Outcome::Stopped {
            confirmed: true,
            ..
        }
    ));
    assert!(!first.exists());
    assert!(second.exists());

    config.kill = Some("*".into());
    controller(&sink)
        .execute(&config, |_, _| Ok(()))
        .expect("stop remaining");
    second_reaper.join().expect("second reaper");
    assert!(!second.exists());
}

#[test]
fn wildcard_stop_spares_services_with_a_shared_prefix() {
    let temp = tempdir().expect("failed to create temp dir");
    let (own_pid, own_reaper) = spawn_sleeper();
    let (sibling_pid, sibling_reaper) = spawn_sleeper();

    let own = PidFile::new(temp.path().join("api.pid"));
    let sibling = PidFile::new(temp.path().join("apigateway.pid"));
    own.write(Pid::from_raw(own_pid as i32)).expect("write own pid");
    sibling
        .write(Pid::from_raw(sibling_pid as i32))
        .expect("write sibling pid");

    let sink = Arc::new(MemorySink::new());
    let mut config = Configuration::new("api").with_pid_path(own.path());
    config.kill = Some("*".into());

    let outcome = controller(&sink)
        .execute(&config, |_, _| Ok(()))
        .expect("stop api");
    own_reaper.join().expect("own reaper");

    match outcome {
        Outcome::Stopped { report, confirmed } => {
            assert!(confirmed);
            assert_eq!(report.signalled(), vec![Pid::from_raw(own_pid as i32)]);
        }
        other => panic!("expected stopped outcome, got {other:?}"),
    }
    assert!(!own.exists());
    assert!(sibling.exists(), "apigateway.pid must survive stopping api");
    assert!(is_process_alive(sibling_pid));

    nix::sys::signal::kill(
        Pid::from_raw(sibling_pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .expect("kill sibling");
    sibling_reaper.join().expect("sibling reaper");
}

#[test]
fn stopping_twice_reports_not_running() {
    let temp = tempdir().expect("failed to create temp dir");
    let (pid, reaper) = spawn_sleeper();
    let pid_path = temp.path().join("twice.pid");
    PidFile::new(&pid_path)
        .write(Pid::from_raw(pid as i32))
        .expect("write pid");

    let sink = Arc::new(MemorySink::new());
    let mut config = Configuration::new("twice").with_pid_path(&pid_path);
    config.kill = Some(pid_path.display().to_string());

    let first = controller(&sink).execute(&config, |_, _| Ok(())).expect("first stop");
    reaper.join().expect("reaper thread");
    assert!(first.is_success());

    let second = controller(&sink).execute(&config, |_, _| Ok(())).expect("second stop");
    assert_eq!(second, Outcome::NotRunning);
    assert_eq!(fs::read_dir(temp.path()).expect("list dir").count(), 0);
}

#[test]
fn binary_kill_without_instances_exits_nonzero() {
    let temp = tempdir().expect("failed to create temp dir");

    cargo_bin_cmd!("warden")
        .args(["-n", "ghost", "-P"])
        .arg(temp.path().join("ghost.pid"))
        .arg("--kill")
        .assert()
        .failure()
        .stdout(contains("ghost is not running"));
}
