// Java: single-file source launch (11+), javac + java for older releases
//
// The top-level type name becomes the file and class name, so it is prefixed
// with the invocation fragment before anything is written.

use super::{BuildPlan, CommandSpec};
use crate::workspace::Workspace;
use notjs_common::{ToolchainDescriptor, VersionProfile};
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Type name assumed when the source declares none (implicit classes)
pub const DEFAULT_TYPE_NAME: &str = "Main";

/// First release able to run a source file directly
const SOURCE_LAUNCH_SINCE: u32 = 11;
/// First release started with `--enable-preview`
const PREVIEW_SINCE: u32 = 21;

static PUBLIC_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bpublic\s+class\s+([^\s{<]+)").expect("valid regex"));
static BARE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bclass\s+([^\s{<]+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenSource {
    /// Name found in the source, or the default
    pub original: String,
    /// Fragment-prefixed name used for the file and the run command
    pub type_name: String,
    pub source: String,
}

/// First `public class X`, else first `class X`
fn declared_type_name(code: &str) -> Option<&str> {
    PUBLIC_CLASS
        .captures(code)
        .or_else(|| BARE_CLASS.captures(code))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Rename the top-level type to `<fragment>_<name>`
///
/// Lexical, not a parse: only occurrences directly after `class`,
/// `interface`, `enum` or `record` are replaced. References such as
/// `new Main()` are left alone, and a match inside a string literal or
/// comment is rewritten like any other.
pub fn rewrite_type_name(code: &str, fragment: &str) -> RewrittenSource {
    let original = declared_type_name(code).unwrap_or(DEFAULT_TYPE_NAME).to_string();
    let type_name = format!("{}_{}", fragment, original);

    let pattern = format!(
        r"\b(class|interface|enum|record)(\s+){}",
        regex::escape(&original)
    );
    let Ok(declaration) = Regex::new(&pattern) else {
        return RewrittenSource {
            original,
            type_name,
            source: code.to_string(),
        };
    };

    let mut source = String::with_capacity(code.len() + fragment.len() + 1);
    let mut last = 0;
    for caps in declaration.captures_iter(code) {
        let (Some(whole), Some(keyword), Some(space)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        // Whole word only: `class MainHelper` must not match `Main`
        if code[whole.end()..].chars().next().is_some_and(is_identifier_char) {
            continue;
        }
        source.push_str(&code[last..whole.start()]);
        source.push_str(keyword.as_str());
        source.push_str(space.as_str());
        source.push_str(&type_name);
        last = whole.end();
    }
    source.push_str(&code[last..]);

    RewrittenSource {
        original,
        type_name,
        source,
    }
}

/// Leading major number of a Java version string (`"21"`, `"1.8"` -> 8)
fn major_version(version: &str) -> Option<u32> {
    let mut parts = version.split('.');
    let first: u32 = parts.next()?.trim().parse().ok()?;
    if first == 1 {
        return parts.next().and_then(|p| p.parse().ok());
    }
    Some(first)
}

/// `javac` next to the configured `java`
fn javac_path(descriptor: &ToolchainDescriptor, profile: &VersionProfile) -> PathBuf {
    if profile.home.is_some() {
        return descriptor.tool_path(profile, "javac");
    }
    match Path::new(&descriptor.compiler_path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("javac"),
        _ => PathBuf::from("javac"),
    }
}

pub(super) async fn plan(
    descriptor: &ToolchainDescriptor,
    profile: &VersionProfile,
    workspace: &mut Workspace,
    code: &str,
    arguments: &[String],
) -> io::Result<BuildPlan> {
    let rewritten = rewrite_type_name(code, workspace.fragment());
    debug!(original = %rewritten.original, rewritten = %rewritten.type_name, "Java type renamed");

    let source = workspace
        .write_source(&format!("{}.java", rewritten.type_name), &rewritten.source)
        .await?;
    let java = descriptor.compiler_for(profile);
    let major = major_version(&profile.version);

    if major.is_some_and(|m| m < SOURCE_LAUNCH_SINCE) {
        workspace.artifact(&format!("{}.class", rewritten.type_name));

        let mut compile = CommandSpec::new(javac_path(descriptor, profile));
        compile.arg("-d").arg(workspace.dir()).arg(&source);

        let mut run = CommandSpec::new(java);
        run.arg("-cp")
            .arg(workspace.dir())
            .arg(&rewritten.type_name)
            .args(arguments);

        return Ok(BuildPlan {
            compile: Some(compile),
            run,
        });
    }

    let mut run = CommandSpec::new(java);
    if major.is_some_and(|m| m >= PREVIEW_SINCE) {
        run.arg("--enable-preview");
    }
    run.arg("--source")
        .arg(&profile.version)
        .arg(&source)
        .args(arguments);

    Ok(BuildPlan { compile: None, run })
}
