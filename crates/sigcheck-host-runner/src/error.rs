use std::path::PathBuf;

use thiserror::Error;

use crate::elf_dyn::ElfInspectError;
use crate::termination::{ClassificationShapeError, Termination};

/// Everything that can abort a single scenario.
///
/// None of these are retried; the only retried outcome in the harness is a
/// supervised child exiting cleanly when a signal was expected, and that is not an
/// error value.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{step} failed ({status}): {}", .argv.join(" "))]
    ToolInvocation {
        step: String,
        argv: Vec<String>,
        status: String,
        output: Vec<u8>,
    },

    #[error("start {program}: {source}")]
    Start {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("did not receive readiness token: {detail}")]
    Synchronization { detail: String },

    #[error(transparent)]
    ClassificationShape(#[from] ClassificationShapeError),

    #[error(transparent)]
    Elf(#[from] ElfInspectError),

    #[error("{step}: got {observed}; expected {expected}")]
    UnexpectedTermination {
        step: String,
        expected: String,
        observed: Termination,
        output: Vec<u8>,
    },

    #[error("program succeeded unexpectedly {attempts} times")]
    RetriesExhausted { attempts: u32 },

    #[error("artifact check failed: {detail}")]
    ArtifactCheck { detail: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(what: &str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::io(format!("{what}: {}", path.display()), source)
    }

    /// Stable diagnostic code used in reports.
    pub fn code(&self) -> &'static str {
        match self {
            HarnessError::ToolInvocation { .. } => "ETOOL",
            HarnessError::Start { .. } => "ESTART",
            HarnessError::Synchronization { .. } => "ESYNC",
            HarnessError::ClassificationShape(_) => "ESHAPE",
            HarnessError::Elf(_) => "EELF",
            HarnessError::UnexpectedTermination { .. } => "EVERDICT",
            HarnessError::RetriesExhausted { .. } => "ERETRY",
            HarnessError::ArtifactCheck { .. } => "ECHECK",
            HarnessError::Io { .. } => "EIO",
        }
    }

    /// Output captured from the external program, exactly as it produced it.
    pub fn captured_output(&self) -> Option<&[u8]> {
        match self {
            HarnessError::ToolInvocation { output, .. }
            | HarnessError::UnexpectedTermination { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

pub(crate) fn missing_artifact(what: &str, path: PathBuf) -> HarnessError {
    HarnessError::ArtifactCheck {
        detail: format!("{what} was not produced: {}", path.display()),
    }
}
