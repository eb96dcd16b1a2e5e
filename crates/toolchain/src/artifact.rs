//! Typed handles for files flowing between pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    KernelSource,
    DefaultKernel,
    DynamicKernel,
    StaticKernel,
    Harness,
    SearchLog,
    RefineLog,
    Decision,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::KernelSource => "kernel-source",
            ArtifactKind::DefaultKernel => "default-kernel",
            ArtifactKind::DynamicKernel => "dynamic-kernel",
            ArtifactKind::StaticKernel => "static-kernel",
            ArtifactKind::Harness => "harness",
            ArtifactKind::SearchLog => "search-log",
            ArtifactKind::RefineLog => "refine-log",
            ArtifactKind::Decision => "decision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the backing file if present.
    pub fn discard(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.path.display())
    }
}

/// Identity of a kernel across builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelId(String);

impl KernelId {
    /// `None` for an empty or whitespace-only identity.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe directory name for this kernel.
    pub fn dir_name(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the surrounding build hands to the compile pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSource {
    pub id: KernelId,
    pub source: PathBuf,
}

impl KernelSource {
    pub fn new(id: KernelId, source: impl Into<PathBuf>) -> Self {
        Self {
            id,
            source: source.into(),
        }
    }

    pub fn artifact(&self) -> Artifact {
        Artifact::new(ArtifactKind::KernelSource, &self.source)
    }

    /// Same kernel identity, different source file.
    pub fn with_source(&self, source: impl Into<PathBuf>) -> Self {
        Self::new(self.id.clone(), source)
    }
}

/// Per-kernel work directory layout.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(work_root: &Path, kernel: &KernelId) -> Self {
        Self {
            root: work_root.join(kernel.dir_name()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn default_kernel(&self) -> Artifact {
        Artifact::new(ArtifactKind::DefaultKernel, self.root.join("kernel_default.bin"))
    }

    pub fn dynamic_kernel(&self) -> Artifact {
        Artifact::new(ArtifactKind::DynamicKernel, self.root.join("kernel_dynamic.bin"))
    }

    /// Static kernel for the `index`-th refine candidate.
    pub fn candidate_kernel(&self, index: usize) -> Artifact {
        Artifact::new(
            ArtifactKind::StaticKernel,
            self.root.join(format!("kernel_static_candidate{index}.bin")),
        )
    }

    /// Static kernel shipped for the converged decision.
    pub fn final_kernel(&self) -> Artifact {
        Artifact::new(ArtifactKind::StaticKernel, self.root.join("kernel_static.bin"))
    }

    pub fn harness(&self) -> Artifact {
        Artifact::new(ArtifactKind::Harness, self.root.join("pgo_harness"))
    }

    pub fn search_log(&self) -> Artifact {
        Artifact::new(ArtifactKind::SearchLog, self.root.join("pgo_search.log"))
    }

    pub fn refine_log(&self) -> Artifact {
        Artifact::new(ArtifactKind::RefineLog, self.root.join("pgo_refine.log"))
    }
}
