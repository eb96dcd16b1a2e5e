//! Collaborators backed by an external native toolchain.
//!
//! The toolchain is described by a JSON file naming the kernel compiler and
//! the harness builder. Stage-specific inputs are appended as flags:
//!
//! ```text
//! <compiler> <args..> --variant default|instrumented|static --kernel <id>
//!            --source <src> --output <bin> [--decision <file> --config <line>]
//! <builder>  <args..> --kernel <id> --kernel-artifact <bin> --output <exe>
//! ```

use crate::artifact::{Artifact, ArtifactKind, KernelSource};
use crate::command::{ToolCommand, ToolchainError};
use crate::compiler::KernelCompiler;
use crate::harness::MeasurementHarness;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tileforge_autotune::TilingConfigLine;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    fn command(&self) -> ToolCommand {
        let mut command = ToolCommand::new(&self.program).args(&self.args);
        for (key, value) in &self.env {
            command = command.env(key, value);
        }
        command
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    pub compiler: CommandSpec,
    pub harness_builder: CommandSpec,
    /// Upper bound for a single compile or link step; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_timeout_secs: Option<u64>,
}

impl ToolchainConfig {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read(path)?;
        let config = serde_json::from_slice(&data)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExternalToolchain {
    config: ToolchainConfig,
}

impl ExternalToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    fn bounded(&self, command: ToolCommand) -> ToolCommand {
        match self.config.compile_timeout_secs {
            Some(secs) if secs > 0 => command.timeout(Duration::from_secs(secs)),
            _ => command,
        }
    }

    fn compile(
        &self,
        stage: &str,
        variant: &str,
        kernel: &KernelSource,
        out: &Artifact,
        extra: impl FnOnce(ToolCommand) -> ToolCommand,
    ) -> Result<Artifact, ToolchainError> {
        ensure_parent(stage, out.path())?;
        let command = self
            .config
            .compiler
            .command()
            .flag("--variant", variant)
            .flag("--kernel", kernel.id.as_str())
            .flag("--source", kernel.source.as_os_str())
            .flag("--output", out.path().as_os_str());
        let command = self.bounded(extra(command));

        let output = command.run(stage)?.check(stage)?;
        debug!(stage, kernel = %kernel.id, elapsed = ?output.elapsed, "kernel compiled");
        Ok(out.clone())
    }
}

impl KernelCompiler for ExternalToolchain {
    fn compile_default(
        &self,
        kernel: &KernelSource,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError> {
        self.compile("compile-default", "default", kernel, out, |c| c)
    }

    fn compile_instrumented(
        &self,
        kernel: &KernelSource,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError> {
        self.compile("compile-instrumented", "instrumented", kernel, out, |c| c)
    }

    fn compile_static(
        &self,
        kernel: &KernelSource,
        decision: &Path,
        config: &TilingConfigLine,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError> {
        self.compile("compile-static", "static", kernel, out, |c| {
            c.flag("--decision", decision.as_os_str())
                .flag("--config", config.as_str())
        })
    }
}

impl MeasurementHarness for ExternalToolchain {
    fn build(
        &self,
        kernel: &KernelSource,
        kernel_artifact: &Artifact,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError> {
        let stage = "build-harness";
        ensure_parent(stage, out.path())?;
        let command = self
            .config
            .harness_builder
            .command()
            .flag("--kernel", kernel.id.as_str())
            .flag("--kernel-artifact", kernel_artifact.path().as_os_str())
            .flag("--output", out.path().as_os_str());

        self.bounded(command).run(stage)?.check(stage)?;
        info!(kernel = %kernel.id, harness = %out.path().display(), "measurement harness linked");
        Ok(Artifact::new(ArtifactKind::Harness, out.path()))
    }
}

fn ensure_parent(stage: &str, path: &Path) -> Result<(), ToolchainError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| ToolchainError::io(stage, e)),
        None => Ok(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactDir, KernelId};
    use crate::harness::{HarnessEnv, HarnessMode};
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Compiler that records its argv into the output file.
    fn recording_toolchain(dir: &Path) -> ExternalToolchain {
        let compiler = script(
            dir,
            "cc.sh",
            r#"out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--output" ]; then out="$a"; fi
  prev="$a"
done
echo "$@" > "$out""#,
        );
        let builder = script(
            dir,
            "ld.sh",
            r#"out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--output" ]; then out="$a"; fi
  prev="$a"
done
printf '#!/bin/sh\necho "$1#1.0" >> "$TILEFORGE_SEARCH_LOG"\n' > "$out"
chmod +x "$out""#,
        );
        ExternalToolchain::new(ToolchainConfig {
            compiler: CommandSpec::new(compiler),
            harness_builder: CommandSpec::new(builder),
            compile_timeout_secs: Some(30),
        })
    }

    #[test]
    fn test_static_compile_passes_decision_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = recording_toolchain(dir.path());
        let kernel = KernelSource::new(KernelId::new("mm").unwrap(), dir.path().join("mm.cc"));
        let layout = ArtifactDir::new(&dir.path().join("work"), &kernel.id);

        let out = layout.candidate_kernel(0);
        let artifact = toolchain
            .compile_static(&kernel, Path::new("/d/pgo_decision.txt"), &"t=4#2.0".into(), &out)
            .unwrap();

        let argv = fs::read_to_string(artifact.path()).unwrap();
        assert!(argv.contains("--variant static"));
        assert!(argv.contains("--decision /d/pgo_decision.txt"));
        assert!(argv.contains("--config t=4#2.0"));
    }

    #[test]
    fn test_failed_compile_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = ExternalToolchain::new(ToolchainConfig {
            compiler: CommandSpec::new(script(dir.path(), "bad.sh", "echo boom >&2; exit 2")),
            harness_builder: CommandSpec::new("/bin/true"),
            compile_timeout_secs: None,
        });
        let kernel = KernelSource::new(KernelId::new("mm").unwrap(), "mm.cc");
        let out = Artifact::new(ArtifactKind::DynamicKernel, dir.path().join("k.bin"));

        let err = toolchain.compile_instrumented(&kernel, &out).unwrap_err();
        match err {
            ToolchainError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_built_harness_runs_in_broad_mode() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = recording_toolchain(dir.path());
        let kernel = KernelSource::new(KernelId::new("mm").unwrap(), "mm.cc");
        let layout = ArtifactDir::new(dir.path(), &kernel.id);

        let dynamic = toolchain
            .compile_instrumented(&kernel, &layout.dynamic_kernel())
            .unwrap();
        let harness = toolchain.build(&kernel, &dynamic, &layout.harness()).unwrap();
        let env = HarnessEnv {
            search_log: layout.search_log().path,
            refine_log: layout.refine_log().path,
            decision_file: dir.path().join("decision"),
        };
        let output = toolchain
            .run(&harness, HarnessMode::Broad, &env, Duration::from_secs(10))
            .unwrap();

        assert!(output.success());
        assert_eq!(fs::read_to_string(&env.search_log).unwrap(), "0#1.0\n");
    }

    #[test]
    fn test_harness_under_relative_work_root() {
        let scratch = tempfile::tempdir().unwrap();
        let toolchain = recording_toolchain(scratch.path());
        let work = tempfile::Builder::new()
            .prefix("tileforge-rel")
            .tempdir_in(".")
            .unwrap();
        assert!(work.path().is_relative());

        let kernel = KernelSource::new(KernelId::new("mm").unwrap(), "mm.cc");
        let layout = ArtifactDir::new(work.path(), &kernel.id);
        let dynamic = toolchain
            .compile_instrumented(&kernel, &layout.dynamic_kernel())
            .unwrap();
        let harness = toolchain.build(&kernel, &dynamic, &layout.harness()).unwrap();
        let env = HarnessEnv {
            search_log: layout.search_log().path,
            refine_log: layout.refine_log().path,
            decision_file: work.path().join("pgo_decision.txt"),
        };

        let output = toolchain
            .run(&harness, HarnessMode::Broad, &env, Duration::from_secs(10))
            .unwrap();
        assert!(output.success(), "{output:?}");
        assert_eq!(fs::read_to_string(&env.search_log).unwrap(), "0#1.0\n");
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolchain.json");
        fs::write(
            &path,
            r#"{
                "compiler": {"program": "tf-cc", "args": ["-O2"]},
                "harness_builder": {"program": "tf-ld"}
            }"#,
        )
        .unwrap();

        let config = ToolchainConfig::load_from_file(&path).unwrap();
        assert_eq!(config.compiler.args, vec!["-O2".to_string()]);
        assert!(config.harness_builder.env.is_empty());
        assert!(config.compile_timeout_secs.is_none());
    }
}
