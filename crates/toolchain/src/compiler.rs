//! Kernel compilation collaborator.

use crate::artifact::{Artifact, KernelSource};
use crate::command::ToolchainError;
use std::path::Path;
use tileforge_autotune::TilingConfigLine;

/// Produces kernel binaries for the compile pipeline.
///
/// Implementations write the binary to the path of `out` and return the
/// artifact actually produced.
pub trait KernelCompiler {
    /// Regular build with runtime (dynamic) tiling; the non-PGO path.
    fn compile_default(
        &self,
        kernel: &KernelSource,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError>;

    /// Instrumented dynamic-tiling build the broad measurement pass runs.
    fn compile_instrumented(
        &self,
        kernel: &KernelSource,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError>;

    /// Specialised build with `config` folded in. `decision` is the decision
    /// file currently holding `config`.
    fn compile_static(
        &self,
        kernel: &KernelSource,
        decision: &Path,
        config: &TilingConfigLine,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError>;
}

impl<T: KernelCompiler + ?Sized> KernelCompiler for &T {
    fn compile_default(
        &self,
        kernel: &KernelSource,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError> {
        (**self).compile_default(kernel, out)
    }

    fn compile_instrumented(
        &self,
        kernel: &KernelSource,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError> {
        (**self).compile_instrumented(kernel, out)
    }

    fn compile_static(
        &self,
        kernel: &KernelSource,
        decision: &Path,
        config: &TilingConfigLine,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError> {
        (**self).compile_static(kernel, decision, config, out)
    }
}
