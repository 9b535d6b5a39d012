use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::process::{ProcessResult, WaitStatus};

/// An OS signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Signal(i32);

// Outside unix the harness skips every signal scenario; the numbers below are the
// traditional POSIX values so the catalogue still type-checks there.
#[cfg(unix)]
mod raw {
    pub const SIGSEGV: i32 = libc::SIGSEGV;
    pub const SIGPIPE: i32 = libc::SIGPIPE;
    pub const SIGPROF: i32 = libc::SIGPROF;
    pub const SIGINT: i32 = libc::SIGINT;
    pub const SIGTERM: i32 = libc::SIGTERM;
    pub const SIGKILL: i32 = libc::SIGKILL;
    pub const SIGBUS: i32 = libc::SIGBUS;
    pub const SIGABRT: i32 = libc::SIGABRT;
}

#[cfg(not(unix))]
mod raw {
    pub const SIGSEGV: i32 = 11;
    pub const SIGPIPE: i32 = 13;
    pub const SIGPROF: i32 = 27;
    pub const SIGINT: i32 = 2;
    pub const SIGTERM: i32 = 15;
    pub const SIGKILL: i32 = 9;
    pub const SIGBUS: i32 = 7;
    pub const SIGABRT: i32 = 6;
}

impl Signal {
    pub const SIGSEGV: Signal = Signal(raw::SIGSEGV);
    pub const SIGPIPE: Signal = Signal(raw::SIGPIPE);
    pub const SIGPROF: Signal = Signal(raw::SIGPROF);
    pub const SIGINT: Signal = Signal(raw::SIGINT);
    pub const SIGTERM: Signal = Signal(raw::SIGTERM);
    pub const SIGKILL: Signal = Signal(raw::SIGKILL);
    pub const SIGBUS: Signal = Signal(raw::SIGBUS);
    pub const SIGABRT: Signal = Signal(raw::SIGABRT);

    const NAMED: [Signal; 8] = [
        Signal::SIGSEGV,
        Signal::SIGPIPE,
        Signal::SIGPROF,
        Signal::SIGINT,
        Signal::SIGTERM,
        Signal::SIGKILL,
        Signal::SIGBUS,
        Signal::SIGABRT,
    ];

    pub const fn from_raw(signo: i32) -> Self {
        Signal(signo)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }

    pub fn name(self) -> Option<&'static str> {
        const NAMES: [&str; 8] = [
            "SIGSEGV", "SIGPIPE", "SIGPROF", "SIGINT", "SIGTERM", "SIGKILL", "SIGBUS", "SIGABRT",
        ];
        Self::NAMED
            .iter()
            .position(|s| *s == self)
            .map(|idx| NAMES[idx])
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "signal {}", self.0),
        }
    }
}

/// How a child process ended, as far as the harness cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Termination {
    CleanExit,
    ExitWithCode(i32),
    KilledBySignal(Signal),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::CleanExit => f.write_str("clean exit"),
            Termination::ExitWithCode(code) => write!(f, "exit status {code}"),
            Termination::KilledBySignal(sig) => write!(f, "killed by {sig}"),
        }
    }
}

/// The wait status carried neither an exit code nor a terminating signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wait status has unexpected form: {0}")]
pub struct ClassificationShapeError(pub String);

/// Classifies a wait outcome. `None` means the wait reported no error at all.
pub fn classify_wait(status: Option<&WaitStatus>) -> Result<Termination, ClassificationShapeError> {
    match status {
        None | Some(WaitStatus::Exited(0)) => Ok(Termination::CleanExit),
        Some(WaitStatus::Exited(code)) => Ok(Termination::ExitWithCode(*code)),
        Some(WaitStatus::Signaled(sig)) => Ok(Termination::KilledBySignal(*sig)),
        Some(WaitStatus::Unrecognized(desc)) => Err(ClassificationShapeError(desc.clone())),
    }
}

pub fn classify(result: &ProcessResult) -> Result<Termination, ClassificationShapeError> {
    classify_wait(result.wait_error())
}

/// What a run looked like compared with an expected terminating signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalCheck {
    Observed,
    /// The child exited cleanly: the signal was lost somewhere.
    CleanExit,
    Other(Termination),
}

pub fn expect_signal(
    result: &ProcessResult,
    expected: Signal,
) -> Result<SignalCheck, ClassificationShapeError> {
    Ok(match classify(result)? {
        Termination::KilledBySignal(sig) if sig == expected => SignalCheck::Observed,
        Termination::CleanExit => SignalCheck::CleanExit,
        other => SignalCheck::Other(other),
    })
}
