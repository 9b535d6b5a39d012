use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use serde::Serialize;

use sigcheck_contracts::{SIGCHECK_ENV_SCHEMA_VERSION, SIGCHECK_LIST_SCHEMA_VERSION};
use sigcheck_host_runner::catalog;
use sigcheck_host_runner::config::resolve;
use sigcheck_host_runner::shell_words::split_flags;
use sigcheck_host_runner::{
    run_scenario, CommandRunner, ConfigOverrides, HarnessConfig, Scenario, ScenarioOutcome,
    SystemRunner,
};

mod report;

use report::{HostInfo, SigcheckReport};

#[derive(Parser, Debug)]
#[command(name = "sigcheck")]
#[command(about = "Signal-handling checks for c-archive libraries linked into C programs.", long_about = None)]
#[command(version)]
struct Cli {
    /// Log scenario progress and every external command at debug level.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Build, link and run the scenario catalogue.
    Test(TestArgs),
    /// List scenario ids and whether they apply on this host.
    List(ConfigArgs),
    /// Print the resolved harness configuration.
    Env(ConfigArgs),
    /// Tokenize a flags string the way compiler flags are tokenized.
    SplitFlags(SplitFlagsArgs),
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Directory holding the fixture packages and C drivers.
    #[arg(long, value_name = "DIR")]
    fixtures: Option<PathBuf>,

    #[arg(long, value_name = "PROG")]
    toolchain: Option<String>,

    /// Supervised attempts per signal trial.
    #[arg(long, value_name = "N")]
    attempts: Option<u32>,

    /// Pause between readiness and signal delivery.
    #[arg(long, value_name = "MS")]
    grace_ms: Option<u64>,
}

impl ConfigArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            toolchain: self.toolchain.clone(),
            attempts: self.attempts,
            grace_ms: self.grace_ms,
            fixtures: self.fixtures.clone(),
            ..ConfigOverrides::default()
        }
    }

    fn resolve(&self) -> Result<HarnessConfig> {
        let env = ConfigOverrides::from_env().context("read SIGCHECK_* environment")?;
        resolve(&SystemRunner, self.overrides().or(env)).context("resolve harness config")
    }
}

#[derive(Debug, Clone, Args)]
struct TestArgs {
    #[command(flatten)]
    config: ConfigArgs,

    #[arg(long, value_name = "SUBSTR")]
    filter: Option<String>,

    #[arg(long)]
    exact: bool,

    #[arg(long, value_name = "N", default_value_t = 1)]
    jobs: usize,

    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SplitFlagsArgs {
    #[arg(value_name = "STRING", allow_hyphen_values = true)]
    flags: String,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Test(args) => cmd_test(args),
        Command::List(args) => cmd_list(args),
        Command::Env(args) => cmd_env(args),
        Command::SplitFlags(args) => {
            println!("{}", serde_json::to_string(&split_flags(&args.flags))?);
            Ok(std::process::ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn select<'a>(scenarios: &'a [Scenario], filter: Option<&str>, exact: bool) -> Vec<&'a Scenario> {
    let mut out: Vec<&Scenario> = scenarios
        .iter()
        .filter(|s| match filter {
            None => true,
            Some(f) if exact => s.id == f,
            Some(f) => s.id.contains(f),
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(b.id));
    out
}

fn cmd_test(args: TestArgs) -> Result<std::process::ExitCode> {
    let config = args.config.resolve()?;
    let all = catalog::scenarios();
    let selected = select(&all, args.filter.as_deref(), args.exact);

    let started = Instant::now();
    let outcomes = run_scenarios(&config, &SystemRunner, &selected, args.jobs);
    let report = SigcheckReport::new(&config, &outcomes, started.elapsed());
    write_report(&args, &report)
}

fn run_scenarios(
    config: &HarnessConfig,
    runner: &dyn CommandRunner,
    scenarios: &[&Scenario],
    jobs: usize,
) -> Vec<ScenarioOutcome> {
    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<ScenarioOutcome>> = Mutex::new(Vec::with_capacity(scenarios.len()));

    std::thread::scope(|scope| {
        let jobs = jobs.clamp(1, scenarios.len().max(1));
        for _ in 0..jobs {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(scenario) = scenarios.get(idx) else {
                    return;
                };
                log::debug!("scenario: {}", scenario.id);
                let outcome = run_scenario(config, runner, scenario);
                results
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(outcome);
            });
        }
    });

    let mut out = results.into_inner().unwrap_or_else(|e| e.into_inner());
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

fn write_report(args: &TestArgs, report: &SigcheckReport) -> Result<std::process::ExitCode> {
    let exit_code = report.exit_code();
    let json = serde_json::to_string(report)? + "\n";

    if let Some(out_path) = &args.report_out {
        if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create report dir: {}", parent.display()))?;
        }
        std::fs::write(out_path, json.as_bytes())
            .with_context(|| format!("write report: {}", out_path.display()))?;
        eprintln!(
            "sigcheck: passed={} failed={} skipped={} (exit={})",
            report.summary.passed, report.summary.failed, report.summary.skipped, exit_code
        );
    }

    print!("{json}");
    Ok(std::process::ExitCode::from(exit_code))
}

#[derive(Debug, Serialize)]
struct ListReport {
    schema_version: &'static str,
    host: HostInfo,
    scenarios: Vec<ListEntry>,
}

#[derive(Debug, Serialize)]
struct ListEntry {
    id: &'static str,
    summary: &'static str,
    applies: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_reason: Option<String>,
}

fn cmd_list(args: ConfigArgs) -> Result<std::process::ExitCode> {
    let config = args.resolve()?;
    let all = catalog::scenarios();
    let scenarios = select(&all, None, false)
        .into_iter()
        .map(|s| {
            let skip_reason = s.applies.evaluate(&config.platform);
            ListEntry {
                id: s.id,
                summary: s.summary,
                applies: skip_reason.is_none(),
                skip_reason,
            }
        })
        .collect();
    let out = ListReport {
        schema_version: SIGCHECK_LIST_SCHEMA_VERSION,
        host: HostInfo {
            os: config.platform.os.clone(),
            arch: config.platform.arch.clone(),
        },
        scenarios,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(std::process::ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct EnvReport<'a> {
    schema_version: &'static str,
    config: &'a HarnessConfig,
}

fn cmd_env(args: ConfigArgs) -> Result<std::process::ExitCode> {
    let config = args.resolve()?;
    let out = EnvReport {
        schema_version: SIGCHECK_ENV_SCHEMA_VERSION,
        config: &config,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(std::process::ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_is_substring_unless_exact() {
        let all = catalog::scenarios();
        let ids = |v: Vec<&Scenario>| v.iter().map(|s| s.id).collect::<Vec<_>>();
        assert_eq!(
            ids(select(&all, Some("signal_forwarding"), false)),
            ["signal_forwarding", "signal_forwarding_external"]
        );
        assert_eq!(
            ids(select(&all, Some("signal_forwarding"), true)),
            ["signal_forwarding"]
        );
        assert!(select(&all, Some("nope"), false).is_empty());
        assert_eq!(select(&all, None, false).len(), all.len());
    }

    #[test]
    fn every_selected_scenario_gets_exactly_one_outcome() {
        let mut config = HarnessConfig::with_defaults(PathBuf::from("/nonexistent/fixtures"));
        config.platform = sigcheck_host_runner::platform::Platform::new("windows", "amd64");
        let all = catalog::scenarios();
        let skipped: Vec<&Scenario> = select(&all, None, false)
            .into_iter()
            .filter(|s| s.applies.evaluate(&config.platform).is_some())
            .collect();
        assert_eq!(skipped.len(), all.len() - 1);

        for jobs in [0, 1, 3, 64] {
            let outcomes = run_scenarios(&config, &SystemRunner, &skipped, jobs);
            let ids: Vec<&str> = outcomes.iter().map(|o| o.id.as_str()).collect();
            let expected: Vec<&str> = skipped.iter().map(|s| s.id).collect();
            assert_eq!(ids, expected, "jobs={jobs}");
        }
    }

    #[test]
    fn cli_flags_override_environment() {
        let cli = Cli::try_parse_from([
            "sigcheck",
            "test",
            "--attempts",
            "3",
            "--toolchain",
            "go1.22",
            "--jobs",
            "4",
        ])
        .expect("parse");
        let Command::Test(args) = cli.command else {
            panic!("expected test subcommand");
        };
        assert_eq!(args.jobs, 4);
        let env = ConfigOverrides {
            attempts: Some(50),
            grace_ms: Some(7),
            ..ConfigOverrides::default()
        };
        let merged = args.config.overrides().or(env);
        assert_eq!(merged.attempts, Some(3));
        assert_eq!(merged.grace_ms, Some(7));
        assert_eq!(merged.toolchain.as_deref(), Some("go1.22"));
    }

    #[test]
    fn split_flags_accepts_leading_hyphen() {
        let cli = Cli::try_parse_from(["sigcheck", "split-flags", "-m64 -pthread"]).expect("parse");
        let Command::SplitFlags(args) = cli.command else {
            panic!("expected split-flags subcommand");
        };
        assert_eq!(split_flags(&args.flags), ["-m64", "-pthread"]);
    }
}
