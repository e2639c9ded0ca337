/// Execution Handle - Owner of One Process and Its Artifacts
///
/// **Ownership:**
/// - Exactly one OS process (compiler or program), watched by a reaper task
/// - The artifact paths created for the invocation
/// - The process stdin and the merged stdout+stderr stream
///
/// **Teardown Guarantee:**
/// `force_teardown` may be called any number of times from any number of
/// tasks. The first caller kills the process (SIGTERM, grace period, then
/// SIGKILL), waits for it, and deletes the artifacts. Everyone else sees the
/// completed flag and returns; a caller that arrives while teardown is in
/// progress waits for it to finish, so "teardown returned" always means
/// "artifacts are gone".

use crate::error::{ExecError, ExecResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deletes artifact paths during teardown
#[async_trait]
pub trait ArtifactRemover: Send + Sync {
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Filesystem remover: files are unlinked, directories removed recursively
#[derive(Debug, Default)]
pub struct FsRemover;

#[async_trait]
impl ArtifactRemover for FsRemover {
    async fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    }
}

/// Output chunks buffered ahead of the consumer before the process blocks
const OUTPUT_QUEUE_CHUNKS: usize = 16;

#[derive(Clone)]
pub struct HandleOptions {
    pub grace: Duration,
    pub output_chunk_bytes: usize,
    pub remover: Arc<dyn ArtifactRemover>,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            output_chunk_bytes: 1024,
            remover: Arc::new(FsRemover),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// Exit code, `None` when terminated by a signal
    Exited(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Performed { removed: usize, failed: usize },
    AlreadyDone,
}

/// Merged stdout+stderr of a process, in the order it was written
#[derive(Debug)]
pub struct OutputSource {
    buffered: VecDeque<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl OutputSource {
    /// Next chunk, `None` once the process closed its output
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if let Some(chunk) = self.buffered.pop_front() {
            return Some(chunk);
        }
        self.rx.recv().await
    }
}

/// A freshly spawned child with its streams already being drained
pub struct SpawnedProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    output: OutputSource,
}

impl SpawnedProcess {
    /// Spawn with stdout and stderr sharing one pipe, so their interleaving
    /// is preserved; `interactive` controls whether stdin is kept
    pub fn spawn(command: &mut Command, interactive: bool, chunk_bytes: usize) -> io::Result<Self> {
        let (reader, writer) = std::io::pipe()?;
        let err_writer = writer.try_clone()?;

        command
            .stdin(if interactive { Stdio::piped() } else { Stdio::null() })
            .stdout(writer)
            .stderr(err_writer)
            .kill_on_drop(true);

        let spawned = command.spawn();
        // The command keeps its Stdio; drop our write ends or EOF never comes
        command.stdout(Stdio::null()).stderr(Stdio::null());
        let mut child = spawned?;

        let reader = pipe::Receiver::from_file(std::fs::File::from(OwnedFd::from(reader)))?;
        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_CHUNKS);
        tokio::spawn(pump(reader, tx, chunk_bytes));

        let stdin = child.stdin.take();
        Ok(Self {
            child,
            stdin,
            output: OutputSource {
                buffered: VecDeque::new(),
                rx,
            },
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to finish. Output is drained into memory
    /// meanwhile, otherwise a chatty process stalls on the full pipe.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        let Self { child, output, .. } = self;
        let mut open = true;
        loop {
            tokio::select! {
                status = child.wait() => return status,
                chunk = output.rx.recv(), if open => match chunk {
                    Some(chunk) => output.buffered.push_back(chunk),
                    None => open = false,
                },
            }
        }
    }
}

/// Blocks on a full queue, which in turn stalls the writer at the pipe
async fn pump<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>, chunk_bytes: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_bytes.max(1)];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output stream read failed");
                break;
            }
        }
    }
}

pub struct ExecutionHandle {
    language: String,
    version: String,
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    output: std::sync::Mutex<Option<OutputSource>>,
    exit: watch::Receiver<ExitState>,
    kill: CancellationToken,
    artifacts: Vec<PathBuf>,
    remover: Arc<dyn ArtifactRemover>,
    teardown_lock: Mutex<()>,
    cleaned_up: AtomicBool,
}

impl ExecutionHandle {
    /// Take ownership of a spawned process and the artifacts behind it
    pub fn new(
        process: SpawnedProcess,
        language: &str,
        version: &str,
        artifacts: Vec<PathBuf>,
        options: &HandleOptions,
    ) -> Self {
        let SpawnedProcess { child, stdin, output } = process;
        let pid = child.id();
        let (state_tx, state_rx) = watch::channel(ExitState::Running);
        let kill = CancellationToken::new();
        tokio::spawn(reap(child, kill.clone(), options.grace, state_tx));

        Self {
            language: language.to_string(),
            version: version.to_string(),
            pid,
            stdin: Mutex::new(stdin),
            output: std::sync::Mutex::new(Some(output)),
            exit: state_rx,
            kill,
            artifacts,
            remover: options.remover.clone(),
            teardown_lock: Mutex::new(()),
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Version the toolchain actually ran with
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn is_alive(&self) -> bool {
        *self.exit.borrow() == ExitState::Running
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::Acquire)
    }

    /// Exit code once the process has exited
    pub fn exit_code(&self) -> Option<i32> {
        match *self.exit.borrow() {
            ExitState::Exited(code) => code,
            ExitState::Running => None,
        }
    }

    /// Take the merged output stream; only the first caller gets it
    pub fn take_output(&self) -> Option<OutputSource> {
        self.output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Wait until the process exits, returning its exit code
    pub async fn await_exit(&self) -> Option<i32> {
        let mut rx = self.exit.clone();
        match rx.wait_for(|s| *s != ExitState::Running).await.map(|s| *s) {
            Ok(ExitState::Exited(code)) => code,
            _ => None,
        }
    }

    /// Write raw bytes to process stdin
    pub async fn write_input(&self, data: &[u8]) -> ExecResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ExecError::InputClosed)?;

        let written = async {
            stdin.write_all(data).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            // Broken pipe: the process is gone or closed its input
            *guard = None;
            return Err(ExecError::StdinWrite(e));
        }
        Ok(())
    }

    /// Write one line of input, appending the terminator
    pub async fn write_line(&self, line: &str) -> ExecResult<()> {
        let mut data = String::with_capacity(line.len() + 1);
        data.push_str(line);
        data.push('\n');
        self.write_input(data.as_bytes()).await
    }

    /// Kill the process if alive, wait for it, delete every artifact. Idempotent.
    pub async fn force_teardown(&self) -> TeardownOutcome {
        if self.is_cleaned_up() {
            return TeardownOutcome::AlreadyDone;
        }

        let _guard = self.teardown_lock.lock().await;
        if self.is_cleaned_up() {
            return TeardownOutcome::AlreadyDone;
        }

        if self.is_alive() {
            info!(language = %self.language, pid = ?self.pid, "Terminating running process");
        }
        self.kill.cancel();
        let exit_code = self.await_exit().await;

        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }

        let (removed, failed) = remove_artifacts(self.remover.as_ref(), &self.artifacts).await;
        self.cleaned_up.store(true, Ordering::Release);

        info!(
            language = %self.language,
            pid = ?self.pid,
            exit_code = ?exit_code,
            removed,
            failed,
            "Execution torn down"
        );
        TeardownOutcome::Performed { removed, failed }
    }
}

/// Best-effort cleanup when a handle is dropped without teardown
impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        if self.is_cleaned_up() {
            return;
        }

        self.kill.cancel();
        let artifacts = std::mem::take(&mut self.artifacts);
        if artifacts.is_empty() {
            return;
        }

        let remover = self.remover.clone();
        let mut exit = self.exit.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _ = exit.wait_for(|s| *s != ExitState::Running).await;
                    remove_artifacts(remover.as_ref(), &artifacts).await;
                });
            }
            Err(_) => {
                warn!(count = artifacts.len(), "Handle dropped outside a runtime; artifacts left behind");
            }
        }
    }
}

async fn reap(
    mut child: Child,
    kill: CancellationToken,
    grace: Duration,
    state: watch::Sender<ExitState>,
) {
    let status = tokio::select! {
        biased;
        status = child.wait() => status,
        _ = kill.cancelled() => terminate(&mut child, grace).await,
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(error = %e, "Failed to wait for process");
            None
        }
    };
    state.send_replace(ExitState::Exited(code));
}

async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    request_exit(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid = ?child.id(), grace_ms = grace.as_millis() as u64, "Process ignored termination, killing");
            child.start_kill()?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid is our own child and has not been reaped yet
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!(pid, error = %io::Error::last_os_error(), "SIGTERM failed");
        }
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.start_kill();
}

async fn remove_artifacts(remover: &dyn ArtifactRemover, artifacts: &[PathBuf]) -> (usize, usize) {
    let mut removed = 0;
    let mut failed = 0;

    for path in artifacts {
        match remover.remove(path).await {
            Ok(()) => {
                removed += 1;
                debug!(path = %path.display(), "Artifact deleted");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Never created (e.g. no binary after a failed compile)
                debug!(path = %path.display(), "Artifact already absent");
            }
            Err(e) => {
                failed += 1;
                warn!(path = %path.display(), error = %e, "Failed to delete artifact");
            }
        }
    }

    (removed, failed)
}
