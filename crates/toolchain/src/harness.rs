//! Measurement harness collaborator.

use crate::artifact::{Artifact, KernelSource};
use crate::command::{CommandOutput, ToolCommand, ToolchainError};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_SEARCH_LOG: &str = "TILEFORGE_SEARCH_LOG";
pub const ENV_REFINE_LOG: &str = "TILEFORGE_REFINE_LOG";
pub const ENV_DECISION_FILE: &str = "TILEFORGE_DECISION_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarnessMode {
    /// Explore every candidate tiling, appending to the search log.
    Broad,
    /// Re-measure the config held by the decision file, appending to the
    /// refine log.
    Refine,
}

impl HarnessMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            HarnessMode::Broad => "0",
            HarnessMode::Refine => "1",
        }
    }
}

impl fmt::Display for HarnessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessMode::Broad => f.write_str("broad"),
            HarnessMode::Refine => f.write_str("refine"),
        }
    }
}

/// Files the harness reads and appends to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessEnv {
    pub search_log: PathBuf,
    pub refine_log: PathBuf,
    pub decision_file: PathBuf,
}

pub trait MeasurementHarness {
    /// Compile and link a harness executable against `kernel_artifact`.
    fn build(
        &self,
        kernel: &KernelSource,
        kernel_artifact: &Artifact,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError>;

    /// Execute a built harness as `harness <mode>`.
    fn run(
        &self,
        harness: &Artifact,
        mode: HarnessMode,
        env: &HarnessEnv,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolchainError> {
        let stage = format!("harness-{mode}");
        harness_command(harness, mode, env, timeout)
            .map_err(|err| ToolchainError::io(&stage, err))?
            .run(&stage)
    }
}

impl<T: MeasurementHarness + ?Sized> MeasurementHarness for &T {
    fn build(
        &self,
        kernel: &KernelSource,
        kernel_artifact: &Artifact,
        out: &Artifact,
    ) -> Result<Artifact, ToolchainError> {
        (**self).build(kernel, kernel_artifact, out)
    }

    fn run(
        &self,
        harness: &Artifact,
        mode: HarnessMode,
        env: &HarnessEnv,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolchainError> {
        (**self).run(harness, mode, env, timeout)
    }
}

/// Command line for one harness run.
///
/// The harness runs inside its own directory, so every path handed to it is
/// resolved against the current directory first.
pub fn harness_command(
    harness: &Artifact,
    mode: HarnessMode,
    env: &HarnessEnv,
    timeout: Duration,
) -> io::Result<ToolCommand> {
    let program = absolute(harness.path())?;
    let mut command = ToolCommand::new(&program)
        .arg(mode.as_arg())
        .env(ENV_SEARCH_LOG, absolute(&env.search_log)?)
        .env(ENV_REFINE_LOG, absolute(&env.refine_log)?)
        .env(ENV_DECISION_FILE, absolute(&env.decision_file)?)
        .timeout(timeout);
    if let Some(dir) = program.parent() {
        command = command.cwd(dir);
    }
    Ok(command)
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use std::ffi::OsString;

    #[test]
    fn test_harness_command_shape() {
        let env = HarnessEnv {
            search_log: "/w/k/pgo_search.log".into(),
            refine_log: "/w/k/pgo_refine.log".into(),
            decision_file: "/d/k/pgo_decision.txt".into(),
        };
        let harness = Artifact::new(ArtifactKind::Harness, "/w/k/pgo_harness");
        let timeout = Duration::from_secs(600);
        let command = harness_command(&harness, HarnessMode::Refine, &env, timeout).unwrap();

        assert_eq!(command.get_args(), &[OsString::from("1")]);
        assert_eq!(
            command.get_env(ENV_DECISION_FILE).unwrap(),
            "/d/k/pgo_decision.txt"
        );
        assert_eq!(command.get_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(HarnessMode::Broad.as_arg(), "0");
    }

    #[test]
    fn test_relative_paths_are_resolved_before_cwd_changes() {
        let env = HarnessEnv {
            search_log: "work/mm/pgo_search.log".into(),
            refine_log: "work/mm/pgo_refine.log".into(),
            decision_file: "decisions/mm/pgo_decision.txt".into(),
        };
        let harness = Artifact::new(ArtifactKind::Harness, "work/mm/pgo_harness");
        let command =
            harness_command(&harness, HarnessMode::Broad, &env, Duration::from_secs(1)).unwrap();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(command.program(), cwd.join("work/mm/pgo_harness"));
        assert_eq!(
            command.get_env(ENV_SEARCH_LOG).unwrap().as_os_str(),
            cwd.join("work/mm/pgo_search.log").as_os_str()
        );
        assert_eq!(
            command.get_env(ENV_DECISION_FILE).unwrap().as_os_str(),
            cwd.join("decisions/mm/pgo_decision.txt").as_os_str()
        );
    }
}
