// Built-in toolchain table, used when no toolchains.json is present

use crate::toolchain::{ToolchainDescriptor, VersionProfile};

const SDKMAN_JAVA_PATH: &str = "/root/.sdkman/candidates/java";

/// Short Java version -> SDKMAN candidate directory
const JAVA_CANDIDATES: &[(&str, &str)] = &[
    ("8", "8.0.402-tem"),
    ("11", "11.0.23-tem"),
    ("17", "17.0.11-tem"),
    ("21", "21.0.3-tem"),
    ("25", "25.0.1-tem"),
];

fn plain(language: &str, compiler: &str, default: &str, versions: &[&str]) -> ToolchainDescriptor {
    ToolchainDescriptor {
        language: language.to_string(),
        compiler_path: compiler.to_string(),
        default_version: default.to_string(),
        versions: versions.iter().map(|v| VersionProfile::new(v)).collect(),
        launcher: Vec::new(),
    }
}

pub(crate) fn builtin_toolchains() -> Vec<ToolchainDescriptor> {
    let mut go = plain("go", "go", "1.21", &["1.19", "1.20", "1.21", "1.22", "1.23"]);
    // Unbuffered stdout so interactive prompts show up before reads
    go.launcher = vec!["stdbuf".to_string(), "-o0".to_string()];

    let java = ToolchainDescriptor {
        language: "java".to_string(),
        compiler_path: "java".to_string(),
        default_version: "25".to_string(),
        versions: JAVA_CANDIDATES
            .iter()
            .map(|(short, full)| {
                VersionProfile::new(short).with_home(format!("{}/{}", SDKMAN_JAVA_PATH, full))
            })
            .collect(),
        launcher: Vec::new(),
    };

    vec![
        plain("c", "gcc", "17", &["89", "99", "11", "17", "23"]),
        plain("cpp", "g++", "11", &["98", "11", "14", "17", "20", "23"]),
        go,
        java,
        plain("rust", "rustc", "1.63.0", &["1.63.0"]),
    ]
}
