//! Per-compile PGO report.

use crate::pipeline::{StageKind, StagePipeline, StageRecord};
use crate::timing::TimingEntry;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tileforge_autotune::TilingConfigLine;
use tileforge_toolchain::KernelId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status")]
pub enum PgoOutcome {
    /// PGO switched off; the default kernel was built.
    Disabled,
    /// A converged decision already existed; no measurement ran.
    Cached,
    /// The search ran and committed a decision.
    Converged,
    /// The search failed; the default kernel was built instead. `stage` is
    /// the step that failed, when one was reached.
    Aborted {
        reason: String,
        stage: Option<StageKind>,
    },
}

impl PgoOutcome {
    pub fn is_optimized(&self) -> bool {
        matches!(self, PgoOutcome::Cached | PgoOutcome::Converged)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PgoReport {
    pub kernel: KernelId,
    pub outcome: PgoOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<TilingConfigLine>,
    pub harness_runs: usize,
    pub stages: Vec<StageRecord>,
    pub timings: Vec<TimingEntry>,
    pub total_time: Duration,
    pub generated_at_unix_ms: u128,
}

impl PgoReport {
    pub fn new(
        kernel: KernelId,
        outcome: PgoOutcome,
        decision: Option<TilingConfigLine>,
        stages: &StagePipeline,
    ) -> Self {
        let generated_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis();

        Self {
            kernel,
            outcome,
            decision,
            harness_runs: stages.measurement_runs(),
            stages: stages.records().to_vec(),
            timings: stages.timings().entries().to_vec(),
            total_time: stages.timings().total(),
            generated_at_unix_ms,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
