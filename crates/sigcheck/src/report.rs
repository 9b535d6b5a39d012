use std::time::Duration;

use base64::Engine;
use serde::Serialize;

use sigcheck_contracts::SIGCHECK_REPORT_SCHEMA_VERSION;
use sigcheck_host_runner::{
    HarnessConfig, HarnessError, ScenarioOutcome, ScenarioState, ScenarioStatus,
};

#[derive(Debug, Clone, Serialize)]
pub struct SigcheckReport {
    pub schema_version: String,
    pub tool: ToolInfo,
    pub host: HostInfo,
    pub config: ConfigInfo,
    pub summary: Summary,
    pub scenarios: Vec<ScenarioResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

impl ToolInfo {
    pub fn current() -> Self {
        Self {
            name: "sigcheck".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostInfo {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigInfo {
    pub attempts: u32,
    pub grace_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_wrapper: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub id: String,
    pub status: ScenarioStatus,
    pub state: ScenarioState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<ScenarioState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    pub duration_ms: u64,
    pub diags: Vec<Diag>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diag {
    pub code: String,
    pub message: String,
    /// Verbatim output of the failing tool or program.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_b64: Option<String>,
}

impl Diag {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            output_b64: None,
        }
    }

    fn from_error(err: &HarnessError) -> Self {
        let mut diag = Self::new(err.code(), err.to_string());
        diag.output_b64 = err
            .captured_output()
            .filter(|o| !o.is_empty())
            .map(|o| base64::engine::general_purpose::STANDARD.encode(o));
        diag
    }
}

impl ScenarioResult {
    fn from_outcome(outcome: &ScenarioOutcome) -> Self {
        Self {
            id: outcome.id.clone(),
            status: outcome.status,
            state: outcome.state,
            failed_at: outcome.failed_at,
            skip_reason: outcome.skip_reason.clone(),
            attempts: outcome.attempts,
            duration_ms: millis(outcome.duration),
            diags: outcome.error.iter().map(Diag::from_error).collect(),
        }
    }
}

impl SigcheckReport {
    pub fn new(config: &HarnessConfig, outcomes: &[ScenarioOutcome], elapsed: Duration) -> Self {
        let mut summary = Summary {
            duration_ms: millis(elapsed),
            ..Summary::default()
        };
        for outcome in outcomes {
            match outcome.status {
                ScenarioStatus::Pass => summary.passed += 1,
                ScenarioStatus::Fail => summary.failed += 1,
                ScenarioStatus::Skip => summary.skipped += 1,
            }
        }

        let mut scenarios: Vec<ScenarioResult> =
            outcomes.iter().map(ScenarioResult::from_outcome).collect();
        scenarios.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            schema_version: SIGCHECK_REPORT_SCHEMA_VERSION.to_string(),
            tool: ToolInfo::current(),
            host: HostInfo {
                os: config.platform.os.clone(),
                arch: config.platform.arch.clone(),
            },
            config: ConfigInfo {
                attempts: config.signal_retry.attempts,
                grace_ms: millis(config.signal_retry.grace),
                exec_wrapper: config
                    .exec_wrapper
                    .as_ref()
                    .map(|p| p.display().to_string()),
            },
            summary,
            scenarios,
        }
    }

    pub fn exit_code(&self) -> u8 {
        if self.summary.failed > 0 {
            1
        } else {
            0
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn outcome(id: &str, status: ScenarioStatus, error: Option<HarnessError>) -> ScenarioOutcome {
        let state = match status {
            ScenarioStatus::Pass => ScenarioState::Passed,
            ScenarioStatus::Fail => ScenarioState::Failed,
            ScenarioStatus::Skip => ScenarioState::Skipped,
        };
        ScenarioOutcome {
            id: id.to_string(),
            status,
            state,
            failed_at: (status == ScenarioStatus::Fail).then_some(ScenarioState::Built),
            skip_reason: (status == ScenarioStatus::Skip).then(|| "skipping on x/y".to_string()),
            attempts: None,
            duration: Duration::from_millis(5),
            error,
        }
    }

    #[test]
    fn summary_counts_and_sorted_scenarios() {
        let config = HarnessConfig::with_defaults(PathBuf::from("/fixtures"));
        let outcomes = vec![
            outcome("zeta", ScenarioStatus::Pass, None),
            outcome(
                "alpha",
                ScenarioStatus::Fail,
                Some(HarnessError::RetriesExhausted { attempts: 20 }),
            ),
            outcome("mid", ScenarioStatus::Skip, None),
        ];
        let report = SigcheckReport::new(&config, &outcomes, Duration::from_millis(42));
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.duration_ms, 42);
        assert_eq!(report.exit_code(), 1);
        let ids: Vec<&str> = report.scenarios.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["alpha", "mid", "zeta"]);
        assert_eq!(report.scenarios[0].diags[0].code, "ERETRY");
        assert!(report.scenarios[0].diags[0].output_b64.is_none());
    }

    #[test]
    fn tool_output_is_base64_encoded() {
        let err = HarnessError::ToolInvocation {
            step: "build".to_string(),
            argv: vec!["go".to_string(), "build".to_string()],
            status: "exit status 1".to_string(),
            output: b"cannot find package\n".to_vec(),
        };
        let diag = Diag::from_error(&err);
        assert_eq!(diag.code, "ETOOL");
        let expected = base64::engine::general_purpose::STANDARD.encode(b"cannot find package\n");
        assert_eq!(diag.output_b64.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let config = HarnessConfig::with_defaults(PathBuf::from("/fixtures"));
        let report = SigcheckReport::new(
            &config,
            &[outcome("install", ScenarioStatus::Pass, None)],
            Duration::ZERO,
        );
        let v = serde_json::to_value(&report).expect("serialize report");
        assert_eq!(v["schema_version"], SIGCHECK_REPORT_SCHEMA_VERSION);
        assert_eq!(v["scenarios"][0]["status"], "pass");
        assert_eq!(v["scenarios"][0]["state"], "passed");
        assert!(v["scenarios"][0].get("skip_reason").is_none());
        assert!(v["scenarios"][0].get("attempts").is_none());
        assert!(v["config"].get("exec_wrapper").is_none());
        assert_eq!(report.exit_code(), 0);
    }
}
