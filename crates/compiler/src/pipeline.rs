//! Stage pipeline: every compile/measure step runs as a named stage with
//! typed input and output artifacts.

use crate::timing::TimingRecorder;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tileforge_autotune::{Ranking, TilingConfigLine};
use tileforge_toolchain::Artifact;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageKind {
    CompileDefault,
    CompileInstrumented,
    BuildHarness,
    MeasureBroad,
    Rank,
    WriteDecision,
    CompileStatic,
    RelinkHarness,
    MeasureRefine,
    SelectFinal,
    CommitDecision,
    CompileFinal,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::CompileDefault => "compile-default",
            StageKind::CompileInstrumented => "compile-instrumented",
            StageKind::BuildHarness => "build-harness",
            StageKind::MeasureBroad => "measure-broad",
            StageKind::Rank => "rank",
            StageKind::WriteDecision => "write-decision",
            StageKind::CompileStatic => "compile-static",
            StageKind::RelinkHarness => "relink-harness",
            StageKind::MeasureRefine => "measure-refine",
            StageKind::SelectFinal => "select-final",
            StageKind::CommitDecision => "commit-decision",
            StageKind::CompileFinal => "compile-final",
        }
    }

    pub fn is_measurement(&self) -> bool {
        matches!(self, StageKind::MeasureBroad | StageKind::MeasureRefine)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifacts a stage hands to later stages.
pub trait StageOutput {
    fn artifacts(&self) -> Vec<Artifact>;
}

impl StageOutput for Artifact {
    fn artifacts(&self) -> Vec<Artifact> {
        vec![self.clone()]
    }
}

impl StageOutput for () {
    fn artifacts(&self) -> Vec<Artifact> {
        Vec::new()
    }
}

impl StageOutput for Ranking {
    fn artifacts(&self) -> Vec<Artifact> {
        Vec::new()
    }
}

impl StageOutput for TilingConfigLine {
    fn artifacts(&self) -> Vec<Artifact> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub kind: StageKind,
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    pub elapsed: Duration,
    pub ok: bool,
}

/// Runs stages in order and keeps a record of each.
#[derive(Debug, Default)]
pub struct StagePipeline {
    timings: TimingRecorder,
    records: Vec<StageRecord>,
}

impl StagePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<T, E, F>(&mut self, kind: StageKind, inputs: &[Artifact], stage: F) -> Result<T, E>
    where
        T: StageOutput,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        let token = self.timings.start(kind.as_str());
        let result = stage();
        let elapsed = self.timings.stop(token);

        let (ok, outputs) = match &result {
            Ok(value) => (true, value.artifacts()),
            Err(err) => {
                debug!(stage = %kind, error = %err, "stage failed");
                (false, Vec::new())
            }
        };
        debug!(stage = %kind, ok, elapsed = ?elapsed, "stage finished");

        self.records.push(StageRecord {
            kind,
            inputs: inputs.to_vec(),
            outputs,
            elapsed,
            ok,
        });
        result
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn timings(&self) -> &TimingRecorder {
        &self.timings
    }

    pub fn measurement_runs(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.kind.is_measurement())
            .count()
    }

    /// Most recent stage that returned an error.
    pub fn last_failed(&self) -> Option<&StageRecord> {
        self.records.iter().rev().find(|r| !r.ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileforge_toolchain::ArtifactKind;

    #[test]
    fn test_records_inputs_outputs_and_failures() {
        let mut stages = StagePipeline::new();
        let source = Artifact::new(ArtifactKind::KernelSource, "k.cc");
        let dynamic = Artifact::new(ArtifactKind::DynamicKernel, "k.bin");

        let out: Result<Artifact, String> =
            stages.run(StageKind::CompileInstrumented, &[source.clone()], || Ok(dynamic.clone()));
        assert_eq!(out.unwrap(), dynamic);

        let failed: Result<Artifact, String> =
            stages.run(StageKind::MeasureBroad, &[dynamic.clone()], || Err("timeout".into()));
        assert!(failed.is_err());

        let records = stages.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].inputs, vec![source]);
        assert_eq!(records[0].outputs, vec![dynamic]);
        assert!(records[0].ok);
        assert!(!records[1].ok);
        assert!(records[1].outputs.is_empty());

        assert_eq!(stages.measurement_runs(), 1);
        assert_eq!(stages.last_failed().unwrap().kind, StageKind::MeasureBroad);
        assert_eq!(stages.timings().entries().len(), 2);
    }
}
