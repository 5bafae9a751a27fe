//! PID files as weak references to running processes.

#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{is_process_alive, spawn_sleeper, stale_pid};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tempfile::tempdir;
use warden::{
    Configuration,
    lifecycle::daemon_running,
    liveness::{LivenessPoller, probe},
    pidfile::{PidFile, StopTarget},
};

#[test]
fn daemon_running_tracks_recorded_pid() {
    let temp = tempdir().expect("failed to create temp dir");
    let pid_file = PidFile::new(temp.path().join("tracked.pid"));
    assert_eq!(daemon_running(&pid_file), None);

    let (pid, reaper) = spawn_sleeper();
    let pid = Pid::from_raw(pid as i32);
    pid_file.write(pid).expect("write pid file");
    assert_eq!(daemon_running(&pid_file), Some(pid));

    signal::kill(pid, Signal::SIGTERM).expect("terminate sleeper");
    reaper.join().expect("reaper thread");

    let poller = LivenessPoller::default();
    assert!(poller.wait_until(|| daemon_running(&pid_file).is_none()));
    assert!(pid_file.exists(), "a stale file is only ignored, never removed");
}

#[test]
fn stale_or_malformed_files_do_not_count_as_running() {
    let temp = tempdir().expect("failed to create temp dir");

    let stale = PidFile::new(temp.path().join("stale.pid"));
    stale
        .write(Pid::from_raw(stale_pid() as i32))
        .expect("write stale pid");
    assert_eq!(daemon_running(&stale), None);

    let junk = PidFile::new(temp.path().join("junk.pid"));
    fs::write(junk.path(), "not-a-pid\n").expect("write junk");
    assert_eq!(daemon_running(&junk), None);

    let zero = PidFile::new(temp.path().join("zero.pid"));
    fs::write(zero.path(), "0\n").expect("write zero");
    assert_eq!(zero.read(), None);
}

#[test]
fn removing_the_file_does_not_touch_the_process() {
    let temp = tempdir().expect("failed to create temp dir");
    let pid_file = PidFile::new(temp.path().join("weak.pid"));

    let (raw_pid, reaper) = spawn_sleeper();
    let pid = Pid::from_raw(raw_pid as i32);
    pid_file.write(pid).expect("write pid file");

    pid_file.remove().expect("remove pid file");
    assert_eq!(daemon_running(&pid_file), None);
    assert!(probe(pid).is_alive());
    assert!(is_process_alive(raw_pid));

    signal::kill(pid, Signal::SIGKILL).expect("kill sleeper");
    reaper.join().expect("reaper thread");
}

#[test]
fn pid_file_contents_are_a_single_line() {
    let temp = tempdir().expect("failed to create temp dir");
    let pid_file = PidFile::new(temp.path().join("nested/dir/service.pid"));

    pid_file.write(Pid::from_raw(4242)).expect("write pid file");
    assert_eq!(
        fs::read_to_string(pid_file.path()).expect("read pid file"),
        "4242\n"
    );
    assert_eq!(pid_file.read(), Some(Pid::from_raw(4242)));
}

#[test]
fn wildcard_resolution_finds_every_instance() {
    let temp = tempdir().expect("failed to create temp dir");
    let config = Configuration::new("svc").with_pid_path(temp.path().join("svc.pid"));

    for name in [
        "svc.pid",
        "svc.8001.pid",
        "svc.8002.pid",
        "svcgateway.pid",
        "other.pid",
        "svc.log",
    ] {
        fs::write(temp.path().join(name), "1\n").expect("seed file");
    }

    let all = StopTarget::All.resolve(&config).expect("resolve all");
    let names: Vec<_> = all
        .iter()
        .map(|file| file.path().file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["svc.8001.pid", "svc.8002.pid", "svc.pid"]);

    let one = StopTarget::parse("8002")
        .resolve(&config)
        .expect("resolve instance");
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].path(), temp.path().join("svc.8002.pid"));
}
