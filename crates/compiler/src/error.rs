//! PGO failure taxonomy. None of these escape the compile session.

use crate::pipeline::StageKind;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tileforge_autotune::DecisionError;
use tileforge_toolchain::{HarnessMode, ToolchainError};

#[derive(Debug, Error)]
pub enum PgoError {
    #[error("{stage} failed: {source}")]
    Compile {
        stage: StageKind,
        #[source]
        source: ToolchainError,
    },
    #[error("{mode} measurement timed out after {after:?}")]
    MeasurementTimeout { mode: HarnessMode, after: Duration },
    #[error("{mode} measurement failed: {detail}")]
    MeasurementFailure { mode: HarnessMode, detail: String },
    #[error("search log {} has no usable entries", path.display())]
    Parse { path: PathBuf },
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PgoError {
    pub fn compile(stage: StageKind) -> impl FnOnce(ToolchainError) -> PgoError {
        move |source| PgoError::Compile { stage, source }
    }

    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> PgoError {
        let context = context.into();
        move |source| PgoError::Io { context, source }
    }

    /// Convert a harness invocation error into a measurement failure.
    pub fn measurement(mode: HarnessMode, err: ToolchainError) -> PgoError {
        match err {
            ToolchainError::TimedOut { after, .. } => PgoError::MeasurementTimeout { mode, after },
            other => PgoError::MeasurementFailure {
                mode,
                detail: other.to_string(),
            },
        }
    }
}
