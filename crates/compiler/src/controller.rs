//! PGO controller: decides a tiling for one kernel, searching at most once
//! per kernel identity.
//!
//! ```text
//! NoDecision ──▶ Searching ──▶ Converged
//!     │              └───────▶ Aborted
//!     └─ (converged decision on disk) ──▶ Converged
//! ```
//!
//! A search compiles an instrumented kernel, runs the broad measurement pass,
//! ranks the search log, then refines the `top_n` fastest candidates and the
//! baseline with specialised static builds. Any failure during the search
//! rolls back the decision file so the next compile starts over.

use crate::config::PgoConfig;
use crate::error::PgoError;
use crate::pipeline::{StageKind, StagePipeline};
use serde::Serialize;
use std::fmt;
use std::io;
use tileforge_autotune::{
    rank, read_log_lines, select_final, DecisionError, DecisionStore, Ranking, TilingConfigLine,
};
use tileforge_toolchain::{
    Artifact, ArtifactDir, ArtifactKind, DeviceLeases, HarnessEnv, HarnessMode, KernelCompiler,
    KernelSource, MeasurementHarness,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PgoState {
    NoDecision,
    Searching,
    Converged,
    Aborted,
}

impl fmt::Display for PgoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PgoState::NoDecision => "no-decision",
            PgoState::Searching => "searching",
            PgoState::Converged => "converged",
            PgoState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionSource {
    /// Read from a converged decision file.
    Cached,
    /// Produced by a search during this compile.
    Searched,
}

/// Kernel built from a converged decision.
#[derive(Debug, Clone)]
pub struct OptimizedKernel {
    pub config: TilingConfigLine,
    pub source: DecisionSource,
    pub artifact: Artifact,
}

pub struct PgoController<'a, C, H> {
    compiler: &'a C,
    harness: &'a H,
    config: &'a PgoConfig,
    leases: &'a DeviceLeases,
}

impl<'a, C, H> PgoController<'a, C, H>
where
    C: KernelCompiler,
    H: MeasurementHarness,
{
    pub fn new(
        compiler: &'a C,
        harness: &'a H,
        config: &'a PgoConfig,
        leases: &'a DeviceLeases,
    ) -> Self {
        Self {
            compiler,
            harness,
            config,
            leases,
        }
    }

    pub fn decision_store(&self, kernel: &KernelSource) -> DecisionStore {
        DecisionStore::in_dir(&self.config.decision_root.join(kernel.id.dir_name()))
    }

    pub fn layout(&self, kernel: &KernelSource) -> ArtifactDir {
        ArtifactDir::new(&self.config.work_root, &kernel.id)
    }

    /// Resolve the tiling for `kernel` and build its static kernel.
    pub fn optimize(
        &self,
        kernel: &KernelSource,
        stages: &mut StagePipeline,
    ) -> Result<OptimizedKernel, PgoError> {
        let store = self.decision_store(kernel);
        let layout = self.layout(kernel);

        let (config, source) = match self.lookup(kernel, &store)? {
            Some(config) => {
                info!(
                    kernel = %kernel.id,
                    config = config.as_str(),
                    "using converged tiling decision"
                );
                (config, DecisionSource::Cached)
            }
            None => {
                transition(kernel, PgoState::NoDecision, PgoState::Searching);
                let mut attempt = Attempt::default();
                let searched = self.search(kernel, &store, &layout, stages, &mut attempt);
                attempt.discard_transient();
                match searched {
                    Ok(config) => {
                        transition(kernel, PgoState::Searching, PgoState::Converged);
                        (config, DecisionSource::Searched)
                    }
                    Err(err) => {
                        self.rollback(kernel, &store, &err);
                        return Err(err);
                    }
                }
            }
        };

        match self.compile_final(kernel, &store, &layout, &config, stages) {
            Ok(artifact) => Ok(OptimizedKernel {
                config,
                source,
                artifact,
            }),
            Err(err) => {
                // A fresh decision whose kernel cannot be built is not kept.
                if source == DecisionSource::Searched {
                    self.rollback(kernel, &store, &err);
                }
                Err(err)
            }
        }
    }

    /// Converged decision on disk, if any. Provisional or unreadable
    /// leftovers from an interrupted attempt are removed.
    fn lookup(
        &self,
        kernel: &KernelSource,
        store: &DecisionStore,
    ) -> Result<Option<TilingConfigLine>, PgoError> {
        match store.read() {
            Ok(Some(decision)) if decision.converged => Ok(Some(decision.config)),
            Ok(Some(decision)) => {
                warn!(
                    kernel = %kernel.id,
                    config = decision.config.as_str(),
                    "discarding provisional tiling decision from an interrupted search"
                );
                store.remove()?;
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(err @ DecisionError::Malformed { .. }) => {
                warn!(kernel = %kernel.id, error = %err, "discarding malformed tiling decision");
                store.remove()?;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn search(
        &self,
        kernel: &KernelSource,
        store: &DecisionStore,
        layout: &ArtifactDir,
        stages: &mut StagePipeline,
        attempt: &mut Attempt,
    ) -> Result<TilingConfigLine, PgoError> {
        layout
            .ensure()
            .map_err(PgoError::io(format!("creating {}", layout.root().display())))?;

        let source = kernel.artifact();
        let decision = Artifact::new(ArtifactKind::Decision, store.path());
        let env = HarnessEnv {
            search_log: layout.search_log().path,
            refine_log: layout.refine_log().path,
            decision_file: store.path().to_path_buf(),
        };

        let dynamic = stages.run(StageKind::CompileInstrumented, &[source.clone()], || {
            self.compiler
                .compile_instrumented(kernel, &layout.dynamic_kernel())
                .map_err(PgoError::compile(StageKind::CompileInstrumented))
        })?;
        attempt.track(&dynamic);

        let harness = stages.run(StageKind::BuildHarness, &[dynamic.clone()], || {
            self.harness
                .build(kernel, &dynamic, &layout.harness())
                .map_err(PgoError::compile(StageKind::BuildHarness))
        })?;
        attempt.track(&harness);

        let search_log = layout.search_log();
        discard(&search_log)?;
        stages.run(StageKind::MeasureBroad, &[harness.clone()], || {
            self.measure(kernel, &harness, HarnessMode::Broad, &env, &search_log)
        })?;

        let ranking = stages.run(StageKind::Rank, &[search_log.clone()], || {
            rank(search_log.path(), self.top_n()).ok_or_else(|| PgoError::Parse {
                path: search_log.path.clone(),
            })
        })?;
        info!(
            kernel = %kernel.id,
            candidates = ranking.effective_n,
            best = ranking.top.first().map(|c| c.as_str()),
            baseline = ranking.baseline.as_str(),
            "ranked broad measurement pass"
        );

        let refine_log = layout.refine_log();
        discard(&refine_log)?;
        for (index, candidate) in ranking.refine_order().enumerate() {
            debug!(kernel = %kernel.id, index, config = candidate.as_str(), "refining candidate");

            stages.run(StageKind::WriteDecision, &[], || {
                store.write(candidate, false)?;
                Ok::<_, PgoError>(decision.clone())
            })?;

            let specialised = stages.run(
                StageKind::CompileStatic,
                &[source.clone(), decision.clone()],
                || {
                    let out = layout.candidate_kernel(index);
                    self.compiler
                        .compile_static(kernel, store.path(), candidate, &out)
                        .map_err(PgoError::compile(StageKind::CompileStatic))
                },
            )?;
            attempt.track(&specialised);

            let relinked = stages.run(StageKind::RelinkHarness, &[specialised.clone()], || {
                self.harness
                    .build(kernel, &specialised, &layout.harness())
                    .map_err(PgoError::compile(StageKind::RelinkHarness))
            })?;

            stages.run(
                StageKind::MeasureRefine,
                &[relinked.clone(), decision.clone()],
                || self.measure(kernel, &relinked, HarnessMode::Refine, &env, &refine_log),
            )?;

            if let Err(err) = specialised.discard() {
                debug!(artifact = %specialised, error = %err, "could not remove candidate kernel");
            }
        }

        let winner = stages.run(StageKind::SelectFinal, &[refine_log.clone()], || {
            select_winner(&refine_log, &ranking)
        })?;

        stages.run(StageKind::CommitDecision, &[], || {
            store.write(&winner, true)?;
            Ok::<_, PgoError>(decision.clone())
        })?;
        info!(kernel = %kernel.id, config = winner.as_str(), "committed converged tiling decision");

        Ok(winner)
    }

    /// Run the harness under the device lease and wall-clock bound.
    fn measure(
        &self,
        kernel: &KernelSource,
        harness: &Artifact,
        mode: HarnessMode,
        env: &HarnessEnv,
        log: &Artifact,
    ) -> Result<Artifact, PgoError> {
        let _lease = self.leases.acquire(&self.config.device);
        let timeout = self.config.tuning.measure_timeout;

        let output = self
            .harness
            .run(harness, mode, env, timeout)
            .map_err(|err| {
                error!(
                    kernel = %kernel.id,
                    %mode,
                    error = %err,
                    "measurement harness could not run"
                );
                PgoError::measurement(mode, err)
            })?;

        if output.timed_out {
            error!(kernel = %kernel.id, %mode, timeout = ?timeout, "measurement harness timed out");
            return Err(PgoError::MeasurementTimeout {
                mode,
                after: output.elapsed,
            });
        }
        if !output.success() {
            error!(
                kernel = %kernel.id,
                %mode,
                exit_code = ?output.exit_code,
                stderr = output.stderr.trim(),
                "measurement harness failed"
            );
            return Err(PgoError::MeasurementFailure {
                mode,
                detail: format!("exit code {:?}: {}", output.exit_code, output.stderr.trim()),
            });
        }

        debug!(kernel = %kernel.id, %mode, elapsed = ?output.elapsed, "measurement pass finished");
        Ok(log.clone())
    }

    fn compile_final(
        &self,
        kernel: &KernelSource,
        store: &DecisionStore,
        layout: &ArtifactDir,
        config: &TilingConfigLine,
        stages: &mut StagePipeline,
    ) -> Result<Artifact, PgoError> {
        let kernel = match &self.config.tuning.kernel_override {
            Some(path) if path.is_file() => {
                info!(
                    kernel = %kernel.id,
                    path = %path.display(),
                    "substituting kernel source for final compile"
                );
                kernel.with_source(path)
            }
            Some(path) => {
                warn!(
                    kernel = %kernel.id,
                    path = %path.display(),
                    "kernel override not found; ignoring"
                );
                kernel.clone()
            }
            None => kernel.clone(),
        };

        let decision = Artifact::new(ArtifactKind::Decision, store.path());
        stages.run(
            StageKind::CompileFinal,
            &[kernel.artifact(), decision],
            || {
                self.compiler
                    .compile_static(&kernel, store.path(), config, &layout.final_kernel())
                    .map_err(PgoError::compile(StageKind::CompileFinal))
            },
        )
    }

    fn rollback(&self, kernel: &KernelSource, store: &DecisionStore, err: &PgoError) {
        error!(kernel = %kernel.id, error = %err, "PGO search aborted");
        match store.remove() {
            Ok(true) => {
                debug!(kernel = %kernel.id, "removed decision written during aborted attempt")
            }
            Ok(false) => {}
            Err(remove_err) => {
                error!(kernel = %kernel.id, error = %remove_err, "could not remove decision file")
            }
        }
        transition(kernel, PgoState::Searching, PgoState::Aborted);
    }

    fn top_n(&self) -> i64 {
        i64::try_from(self.config.tuning.top_n).unwrap_or(0)
    }
}

/// Cheapest refined entry; the baseline when nothing measured cleanly.
fn select_winner(refine_log: &Artifact, ranking: &Ranking) -> Result<TilingConfigLine, PgoError> {
    let refined = match read_log_lines(refine_log.path()) {
        Ok(lines) => lines,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            return Err(PgoError::Io {
                context: format!("reading {}", refine_log.path().display()),
                source: err,
            })
        }
    };

    match select_final(&refined) {
        Some(winner) if !winner.is_failed() => Ok(winner),
        _ => {
            warn!(
                baseline = ranking.baseline.as_str(),
                refined = refined.len(),
                "no refined candidate measured cleanly; keeping baseline"
            );
            Ok(ranking.baseline.clone())
        }
    }
}

fn discard(artifact: &Artifact) -> Result<(), PgoError> {
    artifact
        .discard()
        .map_err(PgoError::io(format!("removing stale {artifact}")))
}

fn transition(kernel: &KernelSource, from: PgoState, to: PgoState) {
    info!(kernel = %kernel.id, %from, %to, "PGO state transition");
}

/// Transient binaries produced during one search attempt.
#[derive(Debug, Default)]
struct Attempt {
    transient: Vec<Artifact>,
}

impl Attempt {
    fn track(&mut self, artifact: &Artifact) {
        if !self.transient.contains(artifact) {
            self.transient.push(artifact.clone());
        }
    }

    fn discard_transient(&mut self) {
        for artifact in self.transient.drain(..) {
            if let Err(err) = artifact.discard() {
                debug!(%artifact, error = %err, "could not remove transient artifact");
            }
        }
    }
}
