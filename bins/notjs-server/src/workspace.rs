/// Scratch Storage - Per-Invocation Workspaces
///
/// **Layout:**
/// `<scratch>/<fragment>/` holds every artifact of one invocation.
///
/// **Uniqueness:**
/// The directory is created with `create_dir`, which fails if it already
/// exists. A colliding fragment is simply regenerated, so two invocations can
/// never share a directory no matter how many sessions compile at once.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FRAGMENT_LEN: usize = 10;
const MAX_ALLOCATION_ATTEMPTS: usize = 16;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Random name fragment; starts with a letter so it can prefix a Java identifier
pub fn name_fragment() -> String {
    let mut rng = rand::rng();
    let mut fragment = String::with_capacity(FRAGMENT_LEN);
    fragment.push(LETTERS[rng.random_range(0..LETTERS.len())] as char);
    fragment.extend(
        (&mut rng)
            .sample_iter(Alphanumeric)
            .take(FRAGMENT_LEN - 1)
            .map(char::from),
    );
    fragment
}

/// Process-wide scratch directory shared by all sessions
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create the scratch root if absent
    pub fn ensure(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        debug!(path = %root.display(), "Scratch directory ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a fresh workspace directory for one invocation
    pub async fn allocate(&self) -> io::Result<Workspace> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let fragment = name_fragment();
            let dir = self.root.join(&fragment);

            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    debug!(path = %dir.display(), "Workspace allocated");
                    return Ok(Workspace {
                        fragment,
                        dir,
                        artifacts: Vec::new(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not allocate a unique workspace directory",
        ))
    }
}

/// One invocation's private directory plus the artifacts created in it
#[derive(Debug)]
pub struct Workspace {
    fragment: String,
    dir: PathBuf,
    artifacts: Vec<PathBuf>,
}

impl Workspace {
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path inside the workspace, registered for teardown
    pub fn artifact(&mut self, file_name: &str) -> PathBuf {
        let path = self.dir.join(file_name);
        self.artifacts.push(path.clone());
        path
    }

    /// Write a source file and register it
    pub async fn write_source(&mut self, file_name: &str, code: &str) -> io::Result<PathBuf> {
        let path = self.artifact(file_name);
        tokio::fs::write(&path, code).await?;
        debug!(path = %path.display(), bytes = code.len(), "Source written");
        Ok(path)
    }

    /// Every registered path, files first, the directory itself last
    pub fn into_artifacts(self) -> Vec<PathBuf> {
        let mut artifacts = self.artifacts;
        artifacts.push(self.dir);
        artifacts
    }

    /// Best-effort removal when no handle will ever own this workspace
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            tracing::warn!(path = %self.dir.display(), error = %e, "Failed to discard workspace");
        }
    }
}
