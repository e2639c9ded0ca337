/// Language Executors - Compile-and-Run Strategies
///
/// **Core Responsibility:**
/// Turn source text into a running process and hand back an ExecutionHandle.
///
/// **Shape shared by every language:**
/// 1. Resolve the version (absent -> default, unknown -> UnsupportedVersion)
/// 2. Allocate a private workspace under the scratch directory
/// 3. Write the source and plan the compile/run commands
/// 4. Compile (if the language has a separate build step); a failing compiler
///    is returned as `Launch::CompileFailed` so its diagnostics flow through
///    the normal output path
/// 5. Spawn the program and return `Launch::Started`
///
/// Validation failures never touch the filesystem. Spawn failures discard the
/// workspace before returning, so there is nothing for the caller to clean up.

mod go;
mod java;
mod native;

pub use java::{rewrite_type_name, RewrittenSource};

use crate::error::{ExecError, ExecResult};
use crate::handle::{ExecutionHandle, HandleOptions, SpawnedProcess};
use crate::workspace::{ScratchDir, Workspace};
use anyhow::bail;
use notjs_common::{ToolchainDescriptor, ToolchainError, ToolchainRegistry, VersionProfile};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// The closed set of supported strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorKind {
    C,
    Cpp,
    Go,
    Rust,
    Java,
}

impl ExecutorKind {
    /// Static registration table: language key -> strategy
    pub fn from_language(language: &str) -> Option<Self> {
        match language {
            "c" => Some(ExecutorKind::C),
            "cpp" => Some(ExecutorKind::Cpp),
            "go" => Some(ExecutorKind::Go),
            "rust" => Some(ExecutorKind::Rust),
            "java" => Some(ExecutorKind::Java),
            _ => None,
        }
    }

    pub fn source_extension(&self) -> &'static str {
        match self {
            ExecutorKind::C => "c",
            ExecutorKind::Cpp => "cpp",
            ExecutorKind::Go => "go",
            ExecutorKind::Rust => "rs",
            ExecutorKind::Java => "java",
        }
    }
}

/// Result of starting an execution
pub enum Launch {
    /// The compiler exited non-zero; the handle wraps the finished compiler
    /// and its output is the diagnostic
    CompileFailed(ExecutionHandle),
    /// The program is running
    Started(ExecutionHandle),
}

impl Launch {
    pub fn handle(&self) -> &ExecutionHandle {
        match self {
            Launch::CompileFailed(handle) | Launch::Started(handle) => handle,
        }
    }

    pub fn into_handle(self) -> ExecutionHandle {
        match self {
            Launch::CompileFailed(handle) | Launch::Started(handle) => handle,
        }
    }

    pub fn is_compile_failure(&self) -> bool {
        matches!(self, Launch::CompileFailed(_))
    }
}

/// Program plus arguments, built before anything is spawned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    fn to_command(&self, cwd: &Path, profile: &VersionProfile) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(cwd).envs(&profile.env);
        command
    }

    /// Human-readable form for logs
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }
}

/// Compile step (optional) and run step for one invocation
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub compile: Option<CommandSpec>,
    pub run: CommandSpec,
}

/// Run the produced binary, behind the toolchain's launcher if it has one
pub(crate) fn run_binary(descriptor: &ToolchainDescriptor, binary: &Path, arguments: &[String]) -> CommandSpec {
    let mut spec = match descriptor.launcher.split_first() {
        Some((program, rest)) => {
            let mut spec = CommandSpec::new(program);
            spec.args(rest).arg(binary);
            spec
        }
        None => CommandSpec::new(binary),
    };
    spec.args(arguments);
    spec
}

/// Shared collaborators of every executor
#[derive(Clone)]
pub struct ExecContext {
    pub scratch: ScratchDir,
    pub handle: HandleOptions,
}

pub struct LanguageExecutor {
    kind: ExecutorKind,
    descriptor: ToolchainDescriptor,
    ctx: ExecContext,
}

impl LanguageExecutor {
    pub fn new(kind: ExecutorKind, descriptor: ToolchainDescriptor, ctx: ExecContext) -> Self {
        Self { kind, descriptor, ctx }
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    pub fn language(&self) -> &str {
        &self.descriptor.language
    }

    pub fn descriptor(&self) -> &ToolchainDescriptor {
        &self.descriptor
    }

    pub fn default_version(&self) -> &str {
        &self.descriptor.default_version
    }

    pub fn available_versions(&self) -> Vec<String> {
        self.descriptor.available_versions()
    }

    /// Compile (if needed) and start `code`
    #[instrument(skip(self, code, arguments), fields(language = %self.descriptor.language))]
    pub async fn execute(&self, code: &str, version: Option<&str>, arguments: &[String]) -> ExecResult<Launch> {
        let profile = self.descriptor.resolve_version(version)?;

        let mut workspace = self
            .ctx
            .scratch
            .allocate()
            .await
            .map_err(|e| ExecError::start("allocate workspace", e))?;

        info!(
            version = %profile.version,
            workspace = %workspace.dir().display(),
            args = arguments.len(),
            "Preparing execution"
        );

        let launched = match self.plan(&mut workspace, code, profile, arguments).await {
            Ok(plan) => self.launch(&workspace, plan, profile).await,
            Err(e) => Err(ExecError::start("write source", e)),
        };

        let (process, compile_failed) = match launched {
            Ok(launched) => launched,
            Err(e) => {
                workspace.discard().await;
                return Err(e);
            }
        };

        let handle = ExecutionHandle::new(
            process,
            &self.descriptor.language,
            &profile.version,
            workspace.into_artifacts(),
            &self.ctx.handle,
        );

        Ok(if compile_failed {
            Launch::CompileFailed(handle)
        } else {
            Launch::Started(handle)
        })
    }

    async fn plan(
        &self,
        workspace: &mut Workspace,
        code: &str,
        profile: &VersionProfile,
        arguments: &[String],
    ) -> std::io::Result<BuildPlan> {
        match self.kind {
            ExecutorKind::C | ExecutorKind::Cpp | ExecutorKind::Rust => {
                native::plan(self.kind, &self.descriptor, profile, workspace, code, arguments).await
            }
            ExecutorKind::Go => go::plan(&self.descriptor, profile, workspace, code, arguments).await,
            ExecutorKind::Java => java::plan(&self.descriptor, profile, workspace, code, arguments).await,
        }
    }

    /// Returns the process to wrap and whether it is a failed compiler
    async fn launch(
        &self,
        workspace: &Workspace,
        plan: BuildPlan,
        profile: &VersionProfile,
    ) -> ExecResult<(SpawnedProcess, bool)> {
        let chunk = self.ctx.handle.output_chunk_bytes;

        if let Some(compile) = plan.compile {
            info!(command = %compile.display(), "Compiling");
            let mut compiler = SpawnedProcess::spawn(&mut compile.to_command(workspace.dir(), profile), false, chunk)
                .map_err(|e| ExecError::start(format!("spawn {}", compile.program.display()), e))?;

            let status = compiler
                .wait()
                .await
                .map_err(|e| ExecError::start("wait for compiler", e))?;

            if !status.success() {
                warn!(exit_code = ?status.code(), "Compilation failed");
                return Ok((compiler, true));
            }
            info!("Compilation successful");
        }

        let program = SpawnedProcess::spawn(&mut plan.run.to_command(workspace.dir(), profile), true, chunk)
            .map_err(|e| ExecError::start(format!("spawn {}", plan.run.program.display()), e))?;

        info!(pid = ?program.pid(), command = %plan.run.display(), "Process started");
        Ok((program, false))
    }
}

/// Executors for every configured language
pub struct ExecutorSet {
    executors: HashMap<String, LanguageExecutor>,
}

impl ExecutorSet {
    /// One executor per registry entry; unknown language keys are a startup error
    pub fn from_registry(registry: &ToolchainRegistry, ctx: ExecContext) -> anyhow::Result<Self> {
        let mut executors = HashMap::new();

        for descriptor in registry.descriptors() {
            let Some(kind) = ExecutorKind::from_language(&descriptor.language) else {
                bail!(
                    "No executor for language '{}' (known: c, cpp, go, rust, java)",
                    descriptor.language
                );
            };
            executors.insert(
                descriptor.language.clone(),
                LanguageExecutor::new(kind, descriptor.clone(), ctx.clone()),
            );
        }

        Ok(Self { executors })
    }

    pub fn get(&self, language: &str) -> Result<&LanguageExecutor, ToolchainError> {
        self.executors
            .get(&language.trim().to_lowercase())
            .ok_or_else(|| {
                let mut supported: Vec<String> = self.executors.keys().cloned().collect();
                supported.sort();
                ToolchainError::UnknownLanguage {
                    language: language.to_string(),
                    supported,
                }
            })
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.executors.keys().cloned().collect();
        languages.sort();
        languages
    }
}
