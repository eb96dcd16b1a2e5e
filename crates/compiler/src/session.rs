//! Kernel compile session: the entry point the surrounding build calls.
//!
//! PGO is an optimisation layer only. Whatever happens inside the search,
//! the session still hands back a kernel, falling back to the default
//! dynamic-tiling build when no decision can be reached.

use crate::config::PgoConfig;
use crate::controller::{DecisionSource, PgoController};
use crate::pipeline::{StageKind, StagePipeline};
use crate::report::{PgoOutcome, PgoReport};
use anyhow::{Context, Result};
use tileforge_autotune::DecisionStore;
use tileforge_toolchain::{
    Artifact, ArtifactDir, DeviceLeases, KernelCompiler, KernelSource, MeasurementHarness,
};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct CompiledKernel {
    pub artifact: Artifact,
    pub report: PgoReport,
}

pub struct KernelCompileSession<C, H> {
    compiler: C,
    harness: H,
    config: PgoConfig,
    leases: DeviceLeases,
}

impl<C, H> KernelCompileSession<C, H>
where
    C: KernelCompiler,
    H: MeasurementHarness,
{
    pub fn new(compiler: C, harness: H, config: PgoConfig) -> Self {
        Self {
            compiler,
            harness,
            config,
            leases: DeviceLeases::global().clone(),
        }
    }

    /// Use a private lease registry instead of the process-wide one.
    pub fn with_leases(mut self, leases: DeviceLeases) -> Self {
        self.leases = leases;
        self
    }

    pub fn config(&self) -> &PgoConfig {
        &self.config
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn harness(&self) -> &H {
        &self.harness
    }

    pub fn controller(&self) -> PgoController<'_, C, H> {
        PgoController::new(&self.compiler, &self.harness, &self.config, &self.leases)
    }

    pub fn decision_store(&self, kernel: &KernelSource) -> DecisionStore {
        self.controller().decision_store(kernel)
    }

    /// Compile `kernel`, using PGO when enabled. Only a failure of the
    /// default build itself is returned as an error.
    pub fn compile(&self, kernel: &KernelSource) -> Result<CompiledKernel> {
        let mut stages = StagePipeline::new();

        if !self.config.tuning.enabled {
            let artifact = self.compile_default(kernel, &mut stages)?;
            let report = PgoReport::new(kernel.id.clone(), PgoOutcome::Disabled, None, &stages);
            return Ok(CompiledKernel { artifact, report });
        }

        match self.controller().optimize(kernel, &mut stages) {
            Ok(optimized) => {
                let outcome = match optimized.source {
                    DecisionSource::Cached => PgoOutcome::Cached,
                    DecisionSource::Searched => PgoOutcome::Converged,
                };
                info!(
                    kernel = %kernel.id,
                    config = optimized.config.as_str(),
                    artifact = %optimized.artifact,
                    "compiled PGO-specialised kernel"
                );
                let report =
                    PgoReport::new(kernel.id.clone(), outcome, Some(optimized.config), &stages);
                Ok(CompiledKernel {
                    artifact: optimized.artifact,
                    report,
                })
            }
            Err(err) => {
                let stage = stages.last_failed().map(|record| record.kind);
                error!(
                    kernel = %kernel.id,
                    stage = ?stage,
                    error = %err,
                    "PGO failed; falling back to dynamic tiling"
                );
                let outcome = PgoOutcome::Aborted {
                    reason: err.to_string(),
                    stage,
                };
                let artifact = self.compile_default(kernel, &mut stages)?;
                let report = PgoReport::new(kernel.id.clone(), outcome, None, &stages);
                Ok(CompiledKernel { artifact, report })
            }
        }
    }

    fn compile_default(
        &self,
        kernel: &KernelSource,
        stages: &mut StagePipeline,
    ) -> Result<Artifact> {
        let layout = ArtifactDir::new(&self.config.work_root, &kernel.id);
        let artifact = stages
            .run(StageKind::CompileDefault, &[kernel.artifact()], || {
                self.compiler.compile_default(kernel, &layout.default_kernel())
            })
            .with_context(|| format!("default compile of kernel {} failed", kernel.id))?;
        Ok(artifact)
    }
}
