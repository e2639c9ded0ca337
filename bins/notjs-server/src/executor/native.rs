// C, C++ and Rust: one compiler invocation, then run the produced binary

use super::{run_binary, BuildPlan, CommandSpec, ExecutorKind};
use crate::workspace::Workspace;
use notjs_common::{ToolchainDescriptor, VersionProfile};
use std::io;

/// Version -> dialect flag (`17` -> `-std=c17`, `20` -> `-std=c++20`)
pub(super) fn dialect_flag(kind: ExecutorKind, version: &str) -> Option<String> {
    match kind {
        ExecutorKind::C => Some(format!("-std=c{}", version)),
        ExecutorKind::Cpp => Some(format!("-std=c++{}", version)),
        // rustc versions select a toolchain home, not a flag
        _ => None,
    }
}

pub(super) async fn plan(
    kind: ExecutorKind,
    descriptor: &ToolchainDescriptor,
    profile: &VersionProfile,
    workspace: &mut Workspace,
    code: &str,
    arguments: &[String],
) -> io::Result<BuildPlan> {
    let stem = workspace.fragment().to_string();
    let source = workspace
        .write_source(&format!("{}.{}", stem, kind.source_extension()), code)
        .await?;
    let binary = workspace.artifact(&format!("{}.out", stem));

    let mut compile = CommandSpec::new(descriptor.compiler_for(profile));
    if let Some(flag) = dialect_flag(kind, &profile.version) {
        compile.arg(flag);
    }
    compile.arg("-o").arg(&binary).arg(&source);

    Ok(BuildPlan {
        compile: Some(compile),
        run: run_binary(descriptor, &binary, arguments),
    })
}
