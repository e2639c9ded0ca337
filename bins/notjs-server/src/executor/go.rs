// Go: `go build` into the workspace, then run the binary

use super::{run_binary, BuildPlan, CommandSpec, ExecutorKind};
use crate::workspace::Workspace;
use notjs_common::{ToolchainDescriptor, VersionProfile};
use std::io;

pub(super) async fn plan(
    descriptor: &ToolchainDescriptor,
    profile: &VersionProfile,
    workspace: &mut Workspace,
    code: &str,
    arguments: &[String],
) -> io::Result<BuildPlan> {
    let stem = workspace.fragment().to_string();
    let source = workspace
        .write_source(&format!("{}.{}", stem, ExecutorKind::Go.source_extension()), code)
        .await?;
    let binary = workspace.artifact(&format!("{}.out", stem));

    let mut compile = CommandSpec::new(descriptor.compiler_for(profile));
    compile.arg("build").arg("-o").arg(&binary).arg(&source);

    Ok(BuildPlan {
        compile: Some(compile),
        run: run_binary(descriptor, &binary, arguments),
    })
}
