use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::HarnessConfig;
use crate::elf_dyn::{DynamicTagSet, DT_TEXTREL};
use crate::error::{HarnessError, Result};
use crate::pipeline::{ArchiveBuild, ExecutableArtifact, LinkStep, Pipeline};
use crate::platform::Applicability;
use crate::process::CommandRunner;
use crate::retry::run_signal_trials;
use crate::termination::{classify, expect_signal, Signal, SignalCheck, Termination};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    CleanExit,
    Signal(Signal),
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expectation::CleanExit => f.write_str("clean exit"),
            Expectation::Signal(sig) => write!(f, "killed by {sig}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One synchronous run compared with a fixed verdict.
    Expect(Expectation),
    /// Supervised runs with an externally delivered signal, retried per the
    /// configured policy.
    SignalTrials { signal: Signal },
}

#[derive(Debug, Clone)]
pub struct RunStep {
    pub args: Vec<String>,
    pub mode: RunMode,
}

impl RunStep {
    pub fn expect(args: &[&str], expected: Expectation) -> Self {
        Self {
            args: args.iter().map(|a| a.to_string()).collect(),
            mode: RunMode::Expect(expected),
        }
    }

    pub fn signal_trials(args: &[&str], signal: Signal) -> Self {
        Self {
            args: args.iter().map(|a| a.to_string()).collect(),
            mode: RunMode::SignalTrials { signal },
        }
    }
}

#[derive(Debug, Clone)]
pub enum SetupStep {
    /// Writes an archiver stand-in named `name` into the workspace. It writes
    /// its output file and drops `marker` next to itself when invoked.
    WriteFakeArchiver { name: String, marker: String },
}

#[derive(Debug, Clone)]
pub enum ArtifactCheck {
    /// No `DT_TEXTREL` entry and no `DF_TEXTREL` bit in the linked executable.
    NoTextRelocations,
    /// Relative to the workspace.
    FileExists { path: String },
}

#[derive(Debug, Clone)]
pub struct Phase {
    pub setup: Vec<SetupStep>,
    pub build: ArchiveBuild,
    pub link: Option<LinkStep>,
    pub runs: Vec<RunStep>,
    pub checks: Vec<ArtifactCheck>,
}

impl Phase {
    pub fn new(build: ArchiveBuild) -> Self {
        Self {
            setup: Vec::new(),
            build,
            link: None,
            runs: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn setup(mut self, step: SetupStep) -> Self {
        self.setup.push(step);
        self
    }

    pub fn link(mut self, step: LinkStep) -> Self {
        self.link = Some(step);
        self
    }

    pub fn run(mut self, step: RunStep) -> Self {
        self.runs.push(step);
        self
    }

    pub fn check(mut self, check: ArtifactCheck) -> Self {
        self.checks.push(check);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: &'static str,
    pub summary: &'static str,
    pub applies: Applicability,
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    NotStarted,
    Built,
    Linked,
    Running,
    Classified,
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug)]
pub struct ScenarioOutcome {
    pub id: String,
    pub status: ScenarioStatus,
    pub state: ScenarioState,
    /// Last non-terminal state reached before a failure.
    pub failed_at: Option<ScenarioState>,
    pub skip_reason: Option<String>,
    /// Supervised attempts used, summed over the scenario's signal-trial steps.
    pub attempts: Option<u32>,
    pub duration: Duration,
    pub error: Option<HarnessError>,
}

struct Progress<'a> {
    id: &'a str,
    state: ScenarioState,
    attempts: Option<u32>,
}

impl Progress<'_> {
    fn advance(&mut self, next: ScenarioState) {
        if self.state != next {
            log::debug!("{}: {:?} -> {:?}", self.id, self.state, next);
            self.state = next;
        }
    }
}

/// Drives one scenario to a terminal state. Never panics on scenario failure;
/// the error is carried in the outcome.
pub fn run_scenario(
    config: &HarnessConfig,
    runner: &dyn CommandRunner,
    scenario: &Scenario,
) -> ScenarioOutcome {
    let started = Instant::now();

    if let Some(reason) = scenario.applies.evaluate(&config.platform) {
        log::info!("{}: {reason}", scenario.id);
        return ScenarioOutcome {
            id: scenario.id.to_string(),
            status: ScenarioStatus::Skip,
            state: ScenarioState::Skipped,
            failed_at: None,
            skip_reason: Some(reason),
            attempts: None,
            duration: started.elapsed(),
            error: None,
        };
    }

    let mut progress = Progress {
        id: scenario.id,
        state: ScenarioState::NotStarted,
        attempts: None,
    };
    let result = execute(config, runner, scenario, &mut progress);
    let reached = progress.state;

    let (status, state, failed_at, error) = match result {
        Ok(()) => {
            progress.advance(ScenarioState::Passed);
            (ScenarioStatus::Pass, ScenarioState::Passed, None, None)
        }
        Err(err) => {
            log::warn!("{}: failed after {:?}: {err}", scenario.id, reached);
            progress.advance(ScenarioState::Failed);
            (
                ScenarioStatus::Fail,
                ScenarioState::Failed,
                Some(reached),
                Some(err),
            )
        }
    };

    ScenarioOutcome {
        id: scenario.id.to_string(),
        status,
        state,
        failed_at,
        skip_reason: None,
        attempts: progress.attempts,
        duration: started.elapsed(),
        error,
    }
}

fn execute(
    config: &HarnessConfig,
    runner: &dyn CommandRunner,
    scenario: &Scenario,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let workspace =
        Workspace::with_fixtures(&format!("sigcheck_{}", scenario.id), &config.fixture_root)?;
    let pipeline = Pipeline::new(config, runner, &workspace);

    for phase in &scenario.phases {
        for step in &phase.setup {
            apply_setup(&workspace, step)?;
        }

        let archive = pipeline.build_archive(&phase.build)?;
        progress.advance(ScenarioState::Built);

        let exe = match &phase.link {
            Some(step) => {
                let exe = pipeline.link(step, &archive)?;
                progress.advance(ScenarioState::Linked);
                Some(exe)
            }
            None => None,
        };

        for step in &phase.runs {
            let exe = require_exe(exe.as_ref(), "run")?;
            progress.advance(ScenarioState::Running);
            run_step(config, runner, &pipeline, &exe.path, step, progress)?;
            progress.advance(ScenarioState::Classified);
        }

        for check in &phase.checks {
            run_check(&workspace, exe.as_ref(), check)?;
        }
    }
    Ok(())
}

fn run_step(
    config: &HarnessConfig,
    runner: &dyn CommandRunner,
    pipeline: &Pipeline<'_>,
    exe: &Path,
    step: &RunStep,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let label = || {
        let name = exe.file_name().map(|n| n.to_string_lossy().into_owned());
        let mut parts = vec![name.unwrap_or_default()];
        parts.extend(step.args.iter().cloned());
        format!("run {}", parts.join(" "))
    };

    match step.mode {
        RunMode::Expect(expected) => {
            let res = pipeline.run(exe, &step.args)?;
            let verdict_ok = match expected {
                Expectation::CleanExit => classify(&res)? == Termination::CleanExit,
                Expectation::Signal(sig) => expect_signal(&res, sig)? == SignalCheck::Observed,
            };
            if !verdict_ok {
                return Err(HarnessError::UnexpectedTermination {
                    step: label(),
                    expected: expected.to_string(),
                    observed: classify(&res)?,
                    output: res.combined_output(),
                });
            }
            Ok(())
        }
        RunMode::SignalTrials { signal } => {
            let spec = pipeline.run_command(exe, &step.args);
            let used = run_signal_trials(runner, &spec, signal, &config.signal_retry)?;
            progress.attempts = Some(progress.attempts.unwrap_or(0) + used);
            Ok(())
        }
    }
}

fn run_check(
    workspace: &Workspace,
    exe: Option<&ExecutableArtifact>,
    check: &ArtifactCheck,
) -> Result<()> {
    match check {
        ArtifactCheck::NoTextRelocations => {
            let exe = require_exe(exe, "text relocation check")?;
            let tags = DynamicTagSet::read(&exe.path)?;
            if tags.has_text_relocations() {
                let how = if tags.contains(DT_TEXTREL) {
                    "DT_TEXTREL flag"
                } else {
                    "DF_TEXTREL in DT_FLAGS"
                };
                return Err(HarnessError::ArtifactCheck {
                    detail: format!("{} has {how}", exe.path.display()),
                });
            }
            Ok(())
        }
        ArtifactCheck::FileExists { path } => match std::fs::metadata(workspace.join(path)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(HarnessError::ArtifactCheck {
                    detail: format!("{path} does not exist after build"),
                })
            }
            Err(err) => Err(HarnessError::io(format!("checking {path}"), err)),
        },
    }
}

fn require_exe<'e>(
    exe: Option<&'e ExecutableArtifact>,
    what: &str,
) -> Result<&'e ExecutableArtifact> {
    exe.ok_or_else(|| HarnessError::ArtifactCheck {
        detail: format!("{what} step has no linked executable"),
    })
}

fn apply_setup(workspace: &Workspace, step: &SetupStep) -> Result<()> {
    match step {
        SetupStep::WriteFakeArchiver { name, marker } => {
            let path = workspace.join(name);
            let script = fake_archiver_script(&workspace.join(marker));
            std::fs::write(&path, script)
                .map_err(|err| HarnessError::io_at("write fake archiver", &path, err))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt as _;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))
                    .map_err(|err| HarnessError::io_at("chmod fake archiver", &path, err))?;
            }
            Ok(())
        }
    }
}

/// Skips leading `-` options, writes its first operand, then leaves `marker`.
fn fake_archiver_script(marker: &Path) -> String {
    format!(
        "#!/usr/bin/env bash\nwhile expr \"$1\" : '[-]' >/dev/null; do\n  shift\ndone\necho \"testar\" > \"$1\"\necho \"testar\" > '{}'\n",
        marker.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_archiver_points_at_the_marker() {
        let script = fake_archiver_script(Path::new("/tmp/ws/testar.ran"));
        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("> '/tmp/ws/testar.ran'"));
    }

    #[test]
    fn expectation_renders_like_termination() {
        assert_eq!(Expectation::CleanExit.to_string(), "clean exit");
        assert_eq!(
            Expectation::Signal(Signal::SIGPIPE).to_string(),
            Termination::KilledBySignal(Signal::SIGPIPE).to_string()
        );
    }
}
