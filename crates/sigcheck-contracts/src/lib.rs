//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings and
//! the wire-level conventions shared between the harness and its fixture programs.

pub const SIGCHECK_REPORT_SCHEMA_VERSION: &str = "sigcheck.report@0.1.0";
pub const SIGCHECK_LIST_SCHEMA_VERSION: &str = "sigcheck.list@0.1.0";
pub const SIGCHECK_ENV_SCHEMA_VERSION: &str = "sigcheck.env@0.1.0";

/// Line a supervised fixture writes to stderr once it is ready to receive a signal.
pub const READINESS_TOKEN: &str = "OK\n";

/// Prefix of the per-platform execution wrapper (`<prefix>_<os>_<arch>_exec`).
pub const EXEC_WRAPPER_PREFIX: &str = "go";

/// Environment variable that points the managed toolchain at the scenario workspace.
pub const WORKSPACE_ENV_VAR: &str = "GOPATH";

pub const ENV_TOOLCHAIN: &str = "SIGCHECK_TOOLCHAIN";
pub const ENV_CC: &str = "SIGCHECK_CC";
pub const ENV_CC_FLAGS: &str = "SIGCHECK_CC_FLAGS";
pub const ENV_GOOS: &str = "SIGCHECK_GOOS";
pub const ENV_GOARCH: &str = "SIGCHECK_GOARCH";
pub const ENV_SIGNAL_ATTEMPTS: &str = "SIGCHECK_SIGNAL_ATTEMPTS";
pub const ENV_SIGNAL_GRACE_MS: &str = "SIGCHECK_SIGNAL_GRACE_MS";
pub const ENV_FIXTURES: &str = "SIGCHECK_FIXTURES";
