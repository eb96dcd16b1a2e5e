//! Persisted tiling decision for a single kernel identity.
//!
//! The file holds two lines: a `1`/`0` convergence marker followed by the
//! raw config line. A missing file means no decision has been made yet.

use crate::search_log::TilingConfigLine;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File name used inside a kernel's decision directory.
pub const DECISION_FILE_NAME: &str = "pgo_decision.txt";

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision file {} could not be accessed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("decision file {} is malformed: {detail}", path.display())]
    Malformed { path: PathBuf, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDecision {
    pub converged: bool,
    pub config: TilingConfigLine,
}

#[derive(Debug, Clone)]
pub struct DecisionStore {
    path: PathBuf,
}

impl DecisionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `kernel_dir/pgo_decision.txt`.
    pub fn in_dir(kernel_dir: &Path) -> Self {
        Self::new(kernel_dir.join(DECISION_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the decision file. The contents go to a sibling temp file
    /// that is synced and then renamed over the target.
    pub fn write(&self, config: &TilingConfigLine, converged: bool) -> Result<(), DecisionError> {
        let io_err = |source| DecisionError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let staging = self.staging_path();
        let blob = encode(config, converged);
        {
            let mut file = File::create(&staging).map_err(io_err)?;
            file.write_all(blob.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&staging, &self.path).map_err(io_err)?;

        debug!(
            path = %self.path.display(),
            converged,
            config = config.as_str(),
            "wrote tiling decision"
        );
        Ok(())
    }

    pub fn read(&self) -> Result<Option<PersistedDecision>, DecisionError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(DecisionError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        decode(&text)
            .map(Some)
            .map_err(|detail| DecisionError::Malformed {
                path: self.path.clone(),
                detail,
            })
    }

    /// Delete the decision file. Returns whether a file was removed.
    pub fn remove(&self) -> Result<bool, DecisionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(DecisionError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DECISION_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn encode(config: &TilingConfigLine, converged: bool) -> String {
    format!("{}\n{}\n", if converged { "1" } else { "0" }, config.as_str())
}

fn decode(text: &str) -> Result<PersistedDecision, String> {
    let mut lines = text.lines();
    let converged = match lines.next().map(str::trim) {
        Some("1") => true,
        Some("0") => false,
        Some(other) => return Err(format!("unexpected convergence marker {other:?}")),
        None => return Err("empty file".to_string()),
    };
    let config = lines
        .next()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| "missing config line".to_string())?;

    Ok(PersistedDecision {
        converged,
        config: TilingConfigLine::new(config),
    })
}
