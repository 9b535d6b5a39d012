//! Real toolchain runs. Skipped when `go` or `cc` is not on PATH.
#![cfg(unix)]

use std::path::PathBuf;

use sigcheck_host_runner::catalog;
use sigcheck_host_runner::config::{resolve, ConfigOverrides};
use sigcheck_host_runner::platform::find_in_path;
use sigcheck_host_runner::{run_scenario, HarnessConfig, ScenarioStatus, SystemRunner};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../tests/carchive")
}

fn real_config() -> Option<HarnessConfig> {
    if find_in_path("go").is_none() || find_in_path("cc").is_none() {
        eprintln!("skipping: go and cc must both be on PATH");
        return None;
    }
    let overrides = ConfigOverrides {
        fixtures: Some(fixtures_dir()),
        ..Default::default()
    };
    Some(resolve(&SystemRunner, overrides).expect("resolve config"))
}

fn assert_passes(id: &str) {
    let Some(cfg) = real_config() else { return };
    let scenario = catalog::find(id).expect("scenario");
    let outcome = run_scenario(&cfg, &SystemRunner, &scenario);
    if outcome.status == ScenarioStatus::Skip {
        eprintln!("{id}: {}", outcome.skip_reason.unwrap_or_default());
        return;
    }
    let output = outcome
        .error
        .as_ref()
        .and_then(|e| e.captured_output())
        .map(|o| String::from_utf8_lossy(o).into_owned())
        .unwrap_or_default();
    assert_eq!(
        outcome.status,
        ScenarioStatus::Pass,
        "{id}: {:?}\noutput:\n{output}",
        outcome.error
    );
}

#[test]
fn selector_one_dies_of_sigsegv_and_three_of_sigpipe() {
    assert_passes("signal_forwarding");
}

#[test]
fn external_sigsegv_is_observed_within_the_retry_bound() {
    assert_passes("signal_forwarding_external");
}

#[test]
fn os_signal_notify_in_a_library() {
    assert_passes("os_signal");
}

#[test]
fn install_build_from_file_and_build_output_all_link() {
    assert_passes("install");
}

#[test]
fn pie_link_has_no_text_relocations() {
    assert_passes("pie");
}

#[test]
fn external_archiver_is_used_for_the_archive() {
    assert_passes("extar");
}

#[test]
fn archive_compiled_without_shared_forwards_sigpipe() {
    assert_passes("compile_without_shared");
}
