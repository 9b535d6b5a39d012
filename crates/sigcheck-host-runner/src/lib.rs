//! Build, link, run and judge c-archive signal-handling scenarios.

pub mod catalog;
pub mod config;
pub mod elf_dyn;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod process;
pub mod retry;
pub mod scenario;
pub mod shell_words;
pub mod termination;
pub mod workspace;

pub use config::{ConfigOverrides, HarnessConfig, RetryPolicy};
pub use error::{HarnessError, Result};
pub use process::{
    CommandRunner, CommandSpec, OutputCapture, ProcessResult, SupervisedChild, SystemRunner,
    WaitStatus,
};
pub use scenario::{run_scenario, Scenario, ScenarioOutcome, ScenarioState, ScenarioStatus};
pub use termination::{Signal, Termination};
