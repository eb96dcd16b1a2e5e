//! Pipeline configuration and environment tuning parameters.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tileforge_autotune::DEFAULT_TOP_N;
use tracing::warn;

/// Enables the PGO search (`1`, `true`, `yes`, `on`).
pub const ENV_PGO_ENABLE: &str = "TILEFORGE_PGO";
/// Number of ranked candidates to refine; `0` refines the whole pool.
pub const ENV_PGO_TOP_N: &str = "TILEFORGE_PGO_TOPN";
/// Kernel source substituted before the final static compile.
pub const ENV_PGO_KERNEL_OVERRIDE: &str = "TILEFORGE_PGO_KERNEL_OVERRIDE";
/// Wall-clock bound for a single harness run, in seconds.
pub const ENV_PGO_TIMEOUT_SECS: &str = "TILEFORGE_PGO_TIMEOUT_SECS";

pub const DEFAULT_MEASURE_TIMEOUT: Duration = Duration::from_secs(600);

/// Tuning knobs read from the environment (or any key lookup).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PgoTuning {
    pub enabled: bool,
    pub top_n: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_override: Option<PathBuf>,
    pub measure_timeout: Duration,
}

impl Default for PgoTuning {
    fn default() -> Self {
        Self {
            enabled: false,
            top_n: DEFAULT_TOP_N,
            kernel_override: None,
            measure_timeout: DEFAULT_MEASURE_TIMEOUT,
        }
    }
}

impl PgoTuning {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let kernel_override = lookup(ENV_PGO_KERNEL_OVERRIDE)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        Self {
            enabled: lookup(ENV_PGO_ENABLE).as_deref().map_or(false, parse_flag),
            top_n: parse_top_n(lookup(ENV_PGO_TOP_N).as_deref()),
            kernel_override,
            measure_timeout: parse_timeout(lookup(ENV_PGO_TIMEOUT_SECS).as_deref()),
        }
    }
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse a top-N override. Anything that is not a non-negative integer
/// clamps to [`DEFAULT_TOP_N`].
pub fn parse_top_n(raw: Option<&str>) -> usize {
    let Some(raw) = raw else {
        return DEFAULT_TOP_N;
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n >= 0 => usize::try_from(n).unwrap_or(DEFAULT_TOP_N),
        _ => {
            warn!(
                value = raw,
                default = DEFAULT_TOP_N,
                "invalid PGO top-N override; using default"
            );
            DEFAULT_TOP_N
        }
    }
}

fn parse_timeout(raw: Option<&str>) -> Duration {
    match raw.map(|r| r.trim().parse::<u64>()) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
        Some(_) => {
            warn!("invalid PGO measurement timeout; using default");
            DEFAULT_MEASURE_TIMEOUT
        }
        None => DEFAULT_MEASURE_TIMEOUT,
    }
}

#[derive(Debug, Clone)]
pub struct PgoConfig {
    /// Scratch space for per-kernel logs and transient binaries.
    pub work_root: PathBuf,
    /// Where persisted decisions live, one directory per kernel.
    pub decision_root: PathBuf,
    /// Accelerator the harness runs on; harness runs hold its lease.
    pub device: String,
    pub tuning: PgoTuning,
}

impl Default for PgoConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("tileforge");
        Self {
            work_root: root.join("work"),
            decision_root: root.join("decisions"),
            device: "device0".to_string(),
            tuning: PgoTuning::default(),
        }
    }
}

impl PgoConfig {
    pub fn from_env() -> Self {
        Self {
            tuning: PgoTuning::from_env(),
            ..Self::default()
        }
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn with_decision_root(mut self, decision_root: impl Into<PathBuf>) -> Self {
        self.decision_root = decision_root.into();
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_tuning(mut self, tuning: PgoTuning) -> Self {
        self.tuning = tuning;
        self
    }
}
