#![cfg(unix)]

use std::collections::BTreeMap;
use std::ffi::OsString;

use sigcheck_host_runner::process::{CommandRunner, CommandSpec, SystemRunner, WaitStatus};
use sigcheck_host_runner::termination::{classify, Signal, Termination};
use sigcheck_host_runner::HarnessError;

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("/bin/sh").arg("-c").arg(script)
}

#[test]
fn sync_run_keeps_stdout_and_stderr_interleaved_in_write_order() {
    let res = SystemRunner
        .run(&sh(
            "printf 'step1\\n'; sleep 0.1; printf 'error: step2\\n' >&2; sleep 0.1; printf 'step3\\n'; exit 3",
        ))
        .expect("run sh");
    assert_eq!(res.status, WaitStatus::Exited(3));
    assert_eq!(
        String::from_utf8_lossy(&res.combined_output()),
        "step1\nerror: step2\nstep3\n"
    );
    assert!(res.stderr.is_empty());
    assert_eq!(classify(&res), Ok(Termination::ExitWithCode(3)));
}

#[test]
fn separate_capture_splits_the_streams() {
    let res = SystemRunner
        .run(&sh("printf out; printf err >&2; exit 3").separate_stderr())
        .expect("run sh");
    assert_eq!(res.output, b"out");
    assert_eq!(res.stderr, b"err");
    assert_eq!(res.combined_output(), b"outerr");
    assert_eq!(res.status, WaitStatus::Exited(3));
}

#[test]
fn sync_run_reports_terminating_signal() {
    let res = SystemRunner.run(&sh("kill -SEGV $$")).expect("run sh");
    assert_eq!(res.terminating_signal(), Some(Signal::SIGSEGV));
    assert!(!res.exited_normally());
    assert_eq!(
        classify(&res),
        Ok(Termination::KilledBySignal(Signal::SIGSEGV))
    );
}

#[test]
fn explicit_environment_replaces_the_inherited_one() {
    let env = BTreeMap::from([(OsString::from("SIGCHECK_PROBE"), OsString::from("ws"))]);
    let res = SystemRunner
        .run(&sh("printf '%s:%s' \"$SIGCHECK_PROBE\" \"${HOME:-unset}\"").env(env))
        .expect("run sh");
    assert!(res.success(), "output={:?}", String::from_utf8_lossy(&res.output));
    assert_eq!(res.output, b"ws:unset");
}

#[test]
fn missing_program_is_a_start_error() {
    let err = SystemRunner
        .run(&CommandSpec::new("/nonexistent/sigcheck-no-such-tool"))
        .unwrap_err();
    assert!(matches!(err, HarnessError::Start { .. }), "{err:?}");
    assert_eq!(err.code(), "ESTART");
}

#[test]
fn supervised_child_is_signalled_after_the_token() {
    let spec = sh("echo OK >&2; echo after >&2; exec sleep 30");
    let mut child = SystemRunner
        .spawn_supervised(&spec, "OK\n")
        .expect("spawn supervised");
    assert!(child.pid() > 0);
    child.signal(Signal::SIGTERM).expect("send SIGTERM");
    let res = child.wait().expect("wait");
    assert_eq!(res.terminating_signal(), Some(Signal::SIGTERM));
    assert_eq!(res.stderr, b"OK\nafter\n");
}

#[test]
fn wrong_token_is_a_synchronization_error() {
    let spec = sh("echo NOPE >&2; exec sleep 30");
    let err = SystemRunner.spawn_supervised(&spec, "OK\n").err().expect("sync error");
    assert!(matches!(err, HarnessError::Synchronization { .. }), "{err:?}");
    assert!(err.to_string().contains("NOPE"), "{err}");
}

#[test]
fn closed_stderr_before_token_is_a_synchronization_error() {
    let err = SystemRunner
        .spawn_supervised(&sh("exit 0"), "OK\n")
        .err()
        .expect("sync error");
    assert_eq!(err.code(), "ESYNC");
}
