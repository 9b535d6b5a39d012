use sigcheck_contracts::READINESS_TOKEN;

use crate::config::RetryPolicy;
use crate::error::{HarnessError, Result};
use crate::process::{CommandRunner, CommandSpec};
use crate::termination::{expect_signal, Signal, SignalCheck};

/// Launches `spec` repeatedly, sending `signal` once the child reports
/// readiness, until one attempt dies of that signal.
///
/// A signal sent from outside can land on a thread that drops it, so a clean
/// exit only means "try again". Returns the number of attempts used.
pub fn run_signal_trials(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    signal: Signal,
    policy: &RetryPolicy,
) -> Result<u32> {
    for attempt in 1..=policy.attempts {
        let mut child = runner.spawn_supervised(spec, READINESS_TOKEN)?;
        if !policy.grace.is_zero() {
            std::thread::sleep(policy.grace);
        }
        child.signal(signal)?;
        let res = child.wait()?;

        match expect_signal(&res, signal)? {
            SignalCheck::Observed => {
                log::debug!("attempt {attempt}: observed {signal}");
                return Ok(attempt);
            }
            SignalCheck::CleanExit => {
                log::info!(
                    "attempt {attempt}/{}: {} exited cleanly after {signal}; retrying",
                    policy.attempts,
                    res.argv.first().map(String::as_str).unwrap_or("child")
                );
            }
            SignalCheck::Other(observed) => {
                return Err(HarnessError::UnexpectedTermination {
                    step: format!("attempt {attempt}"),
                    expected: format!("killed by {signal}"),
                    observed,
                    output: res.combined_output(),
                });
            }
        }
    }
    Err(HarnessError::RetriesExhausted {
        attempts: policy.attempts,
    })
}
