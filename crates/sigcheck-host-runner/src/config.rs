use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};

use sigcheck_contracts as contracts;

use crate::platform::{find_in_path, Platform};
use crate::process::{CommandRunner, CommandSpec};
use crate::shell_words::CompilerInvocation;

pub const DEFAULT_TOOLCHAIN: &str = "go";
pub const DEFAULT_CC: &str = "cc";
pub const DEFAULT_SIGNAL_ATTEMPTS: u32 = 20;
pub const DEFAULT_SIGNAL_GRACE: Duration = Duration::from_millis(1);

const FIXTURES_REL: &str = "tests/carchive";

/// Bounds for the supervised-signal loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(rename = "grace_ms", serialize_with = "serialize_millis")]
    pub grace: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_SIGNAL_ATTEMPTS,
            grace: DEFAULT_SIGNAL_GRACE,
        }
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Resolved once at startup and shared read-only by every scenario.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessConfig {
    pub toolchain: String,
    pub compiler: CompilerInvocation,
    pub platform: Platform,
    pub exec_wrapper: Option<PathBuf>,
    pub workspace_var: String,
    pub build_env: BTreeMap<String, String>,
    pub fixture_root: PathBuf,
    pub signal_retry: RetryPolicy,
}

impl HarnessConfig {
    /// A config that never consults the toolchain; used by tests and as the
    /// base that resolution fills in.
    pub fn with_defaults(fixture_root: PathBuf) -> Self {
        Self {
            toolchain: DEFAULT_TOOLCHAIN.to_string(),
            compiler: CompilerInvocation::new(DEFAULT_CC, ""),
            platform: Platform::host(),
            exec_wrapper: None,
            workspace_var: contracts::WORKSPACE_ENV_VAR.to_string(),
            build_env: default_build_env(),
            fixture_root,
            signal_retry: RetryPolicy::default(),
        }
    }
}

fn default_build_env() -> BTreeMap<String, String> {
    BTreeMap::from([("GO111MODULE".to_string(), "off".to_string())])
}

/// Values that take precedence over toolchain discovery. `None` means "not
/// given at this layer".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub toolchain: Option<String>,
    pub cc: Option<String>,
    pub cc_flags: Option<String>,
    pub goos: Option<String>,
    pub goarch: Option<String>,
    pub attempts: Option<u32>,
    pub grace_ms: Option<u64>,
    pub fixtures: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let attempts = get(contracts::ENV_SIGNAL_ATTEMPTS)
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .with_context(|| format!("{}={v:?}", contracts::ENV_SIGNAL_ATTEMPTS))
            })
            .transpose()?;
        let grace_ms = get(contracts::ENV_SIGNAL_GRACE_MS)
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{}={v:?}", contracts::ENV_SIGNAL_GRACE_MS))
            })
            .transpose()?;
        Ok(Self {
            toolchain: get(contracts::ENV_TOOLCHAIN),
            cc: get(contracts::ENV_CC),
            // An explicitly empty flags string is meaningful.
            cc_flags: lookup(contracts::ENV_CC_FLAGS),
            goos: get(contracts::ENV_GOOS),
            goarch: get(contracts::ENV_GOARCH),
            attempts,
            grace_ms,
            fixtures: get(contracts::ENV_FIXTURES).map(PathBuf::from),
        })
    }

    /// Fields set on `self` win; the gaps are filled from `lower`.
    pub fn or(self, lower: ConfigOverrides) -> Self {
        Self {
            toolchain: self.toolchain.or(lower.toolchain),
            cc: self.cc.or(lower.cc),
            cc_flags: self.cc_flags.or(lower.cc_flags),
            goos: self.goos.or(lower.goos),
            goarch: self.goarch.or(lower.goarch),
            attempts: self.attempts.or(lower.attempts),
            grace_ms: self.grace_ms.or(lower.grace_ms),
            fixtures: self.fixtures.or(lower.fixtures),
        }
    }
}

/// Resolves the harness configuration: explicit overrides first, then
/// `<toolchain> env KEY`, then built-in defaults.
pub fn resolve(runner: &dyn CommandRunner, overrides: ConfigOverrides) -> Result<HarnessConfig> {
    let fixture_root = match overrides.fixtures {
        Some(dir) => {
            anyhow::ensure!(
                dir.is_dir(),
                "fixture directory does not exist: {}",
                dir.display()
            );
            dir
        }
        None => default_fixture_root()?,
    };
    let mut config = HarnessConfig::with_defaults(absolutize(fixture_root));

    if let Some(toolchain) = overrides.toolchain {
        config.toolchain = toolchain;
    }
    let discover = |key: &str| toolchain_env(runner, &config.toolchain, key);

    let cc = overrides
        .cc
        .or_else(|| discover("CC"))
        .unwrap_or_else(|| DEFAULT_CC.to_string());
    let cc_flags = overrides
        .cc_flags
        .or_else(|| discover("GOGCCFLAGS"))
        .unwrap_or_default();
    let os = overrides
        .goos
        .or_else(|| discover("GOOS"))
        .unwrap_or_else(|| config.platform.os.clone());
    let arch = overrides
        .goarch
        .or_else(|| discover("GOARCH"))
        .unwrap_or_else(|| config.platform.arch.clone());

    config.compiler = CompilerInvocation::new(cc, &cc_flags);
    config.platform = Platform::new(os, arch);
    config.exec_wrapper =
        find_in_path(&config.platform.exec_wrapper_name(contracts::EXEC_WRAPPER_PREFIX));

    if let Some(attempts) = overrides.attempts {
        anyhow::ensure!(attempts > 0, "signal attempts must be at least 1");
        config.signal_retry.attempts = attempts;
    }
    if let Some(ms) = overrides.grace_ms {
        config.signal_retry.grace = Duration::from_millis(ms);
    }

    log::debug!(
        "config: toolchain={} cc={:?} platform={}/{} wrapper={:?}",
        config.toolchain,
        config.compiler.argv(),
        config.platform.os,
        config.platform.arch,
        config.exec_wrapper
    );
    Ok(config)
}

fn toolchain_env(runner: &dyn CommandRunner, toolchain: &str, key: &str) -> Option<String> {
    let spec = CommandSpec::new(toolchain)
        .arg("env")
        .arg(key)
        .separate_stderr();
    match runner.run(&spec) {
        Ok(res) if res.success() => Some(String::from_utf8_lossy(&res.output).trim().to_string()),
        Ok(res) => {
            log::warn!(
                "{toolchain} env {key} failed ({:?}): {}",
                res.status,
                String::from_utf8_lossy(&res.stderr).trim()
            );
            None
        }
        Err(err) => {
            log::warn!("{toolchain} env {key}: {err}");
            None
        }
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

pub fn default_fixture_root() -> Result<PathBuf> {
    default_fixture_root_from_exe(std::env::current_exe().ok().as_deref())
}

pub fn default_fixture_root_from_exe(exe: Option<&Path>) -> Result<PathBuf> {
    let mut checked: Vec<PathBuf> = Vec::new();

    let rel = PathBuf::from(FIXTURES_REL);
    checked.push(rel.clone());
    if rel.is_dir() {
        return Ok(rel);
    }

    if let Some(exe_dir) = exe.and_then(Path::parent) {
        for base in [Some(exe_dir), exe_dir.parent()] {
            let Some(base) = base else { continue };
            let cand = base.join(FIXTURES_REL);
            checked.push(cand.clone());
            if cand.is_dir() {
                return Ok(cand);
            }
        }
    }

    let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if let Some(workspace_root) = crate_dir.parent().and_then(|p| p.parent()) {
        let abs = workspace_root.join(FIXTURES_REL);
        checked.push(abs.clone());
        if abs.is_dir() {
            return Ok(abs);
        }
    }

    let checked = checked
        .into_iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "could not locate the c-archive fixtures (expected {FIXTURES_REL})\n\nlooked for:\n{checked}\n\nfix:\n  - pass --fixtures <dir> or set {}, or\n  - run from the repository root",
        contracts::ENV_FIXTURES
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn env_overrides_parse_numbers_and_ignore_blanks() {
        let o = ConfigOverrides::from_lookup(lookup(&[
            ("SIGCHECK_SIGNAL_ATTEMPTS", "5"),
            ("SIGCHECK_SIGNAL_GRACE_MS", " 10 "),
            ("SIGCHECK_CC", "  "),
            ("SIGCHECK_CC_FLAGS", ""),
        ]))
        .unwrap();
        assert_eq!(o.attempts, Some(5));
        assert_eq!(o.grace_ms, Some(10));
        assert_eq!(o.cc, None);
        assert_eq!(o.cc_flags.as_deref(), Some(""));
    }

    #[test]
    fn bad_attempts_value_is_an_error() {
        let err = ConfigOverrides::from_lookup(lookup(&[("SIGCHECK_SIGNAL_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("SIGCHECK_SIGNAL_ATTEMPTS"));
    }

    #[test]
    fn higher_layer_wins() {
        let cli = ConfigOverrides {
            attempts: Some(3),
            ..Default::default()
        };
        let env = ConfigOverrides {
            attempts: Some(7),
            cc: Some("clang".to_string()),
            ..Default::default()
        };
        let merged = cli.or(env);
        assert_eq!(merged.attempts, Some(3));
        assert_eq!(merged.cc.as_deref(), Some("clang"));
    }

    #[test]
    fn defaults_match_the_historical_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 20);
        assert_eq!(policy.grace, Duration::from_millis(1));
        let cfg = HarnessConfig::with_defaults(PathBuf::from("fixtures"));
        assert_eq!(cfg.workspace_var, "GOPATH");
        assert_eq!(cfg.build_env.get("GO111MODULE").map(String::as_str), Some("off"));
    }
}
