//! TileForge: profile-guided tiling optimisation for generated compute
//! kernels.
//!
//! The pipeline lives in three crates re-exported here:
//!
//! - [`autotune`]: search-log ranking and the persisted decision store,
//! - [`toolchain`]: external compiler/harness collaborators and device leases,
//! - [`compiler`]: the PGO controller and the kernel compile session.

pub use tileforge_autotune as autotune;
pub use tileforge_compiler as compiler;
pub use tileforge_toolchain as toolchain;

pub use tileforge_compiler::{
    CompiledKernel, KernelCompileSession, PgoConfig, PgoOutcome, PgoTuning,
};
pub use tileforge_toolchain::{KernelId, KernelSource};
