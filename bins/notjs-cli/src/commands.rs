// CLI commands for managing the toolchain configuration
use anyhow::{bail, Context, Result};
use notjs_common::{ToolchainRegistry, ToolchainsFile, VersionProfile};
use std::fs;
use std::path::{Path, PathBuf};

fn read_config(path: &Path) -> Result<ToolchainsFile> {
    if !path.exists() {
        bail!(
            "Config file not found: {} (run `notjs-cli init` first)",
            path.display()
        );
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_config(path: &Path, file: &ToolchainsFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(file)
        .context("Failed to serialize toolchains.json")?;
    fs::write(path, json_content + "\n")
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

/// Write the built-in table as a starting config
pub fn init_config(project: &Path, force: bool) -> Result<PathBuf> {
    let path = project.join("config").join("toolchains.json");
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    write_config(&path, &ToolchainRegistry::builtin().to_file())?;
    println!("✅ Wrote built-in toolchains to {}", path.display());
    Ok(path)
}

pub fn list_toolchains(config: &Path) -> Result<()> {
    let registry = ToolchainRegistry::load_or_builtin(config)?;
    if !config.exists() {
        println!("(no {}, showing built-in toolchains)", config.display());
    }

    for descriptor in registry.descriptors() {
        println!(
            "{:<6} default {:<7} versions: {}",
            descriptor.language,
            descriptor.default_version,
            descriptor.available_versions().join(", ")
        );
    }
    Ok(())
}

/// Resolve a program the way the OS would when spawning it
fn find_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Every program a registry needs that cannot be found
pub fn missing_programs(registry: &ToolchainRegistry) -> Vec<(String, String, PathBuf)> {
    let mut missing = Vec::new();

    for descriptor in registry.descriptors() {
        for profile in &descriptor.versions {
            let compiler = descriptor.compiler_for(profile);
            if find_executable(&compiler).is_none() {
                missing.push((descriptor.language.clone(), profile.version.clone(), compiler));
            }
        }
        if let Some(launcher) = descriptor.launcher.first() {
            let launcher = PathBuf::from(launcher);
            if find_executable(&launcher).is_none() {
                missing.push((descriptor.language.clone(), "launcher".to_string(), launcher));
            }
        }
    }

    missing
}

pub fn validate_config(config: &Path) -> Result<()> {
    let registry = ToolchainRegistry::load(config)?;
    println!("✅ {} is well-formed ({} languages)", config.display(), registry.list_languages().len());

    let missing = missing_programs(&registry);
    if missing.is_empty() {
        println!("✅ All toolchains found");
        return Ok(());
    }

    for (language, version, program) in &missing {
        println!("❌ {} {}: {} not found", language, version, program.display());
    }
    bail!("{} toolchain programs missing", missing.len());
}

pub fn add_version(
    config: &Path,
    language: &str,
    version: &str,
    home: Option<PathBuf>,
    make_default: bool,
) -> Result<()> {
    let mut file = read_config(config)?;
    let key = language.trim().to_lowercase();
    let version = version.trim();

    let Some(descriptor) = file.toolchains.iter_mut().find(|d| d.language == key) else {
        bail!("Language '{}' is not configured in {}", key, config.display());
    };
    if descriptor.supports(version) {
        bail!("Language '{}' already has version '{}'", key, version);
    }

    let mut profile = VersionProfile::new(version);
    if let Some(home) = home {
        profile = profile.with_home(home);
    }
    descriptor.versions.push(profile);
    if make_default {
        descriptor.default_version = version.to_string();
    }

    // Refuse to write a file the server would reject
    ToolchainRegistry::from_descriptors(file.toolchains.clone())
        .context("Resulting configuration is invalid")?;
    write_config(config, &file)?;

    println!("✅ Added {} {} to {}", key, version, config.display());
    if make_default {
        println!("   {} is now the default", version);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_builtin() {
        let tmp = tempfile::tempdir().unwrap();
        let path = init_config(tmp.path(), false).unwrap();

        let registry = ToolchainRegistry::load(&path).unwrap();
        assert_eq!(registry.list_languages(), ToolchainRegistry::builtin().list_languages());

        assert!(init_config(tmp.path(), false).is_err());
        assert!(init_config(tmp.path(), true).is_ok());
    }

    #[test]
    fn test_add_version_and_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = init_config(tmp.path(), false).unwrap();

        add_version(&path, "Go", "1.24", Some(PathBuf::from("/usr/local/go1.24")), true).unwrap();

        let registry = ToolchainRegistry::load(&path).unwrap();
        let go = registry.describe("go").unwrap();
        assert_eq!(go.default_version, "1.24");
        let profile = go.profile("1.24").unwrap();
        assert_eq!(go.compiler_for(profile), PathBuf::from("/usr/local/go1.24/bin/go"));
    }

    #[test]
    fn test_add_version_rejects_duplicates_and_unknown() {
        let tmp = tempfile::tempdir().unwrap();
        let path = init_config(tmp.path(), false).unwrap();

        assert!(add_version(&path, "c", "17", None, false).is_err());
        assert!(add_version(&path, "python", "3.12", None, false).is_err());
        assert!(add_version(&tmp.path().join("missing.json"), "c", "2y", None, false).is_err());
    }

    #[test]
    fn test_missing_programs_reported() {
        let registry = ToolchainRegistry::from_descriptors(vec![notjs_common::ToolchainDescriptor {
            language: "c".to_string(),
            compiler_path: "/nonexistent/bin/gcc".to_string(),
            default_version: "17".to_string(),
            versions: vec![VersionProfile::new("17")],
            launcher: vec!["sh".to_string()],
        }])
        .unwrap();

        let missing = missing_programs(&registry);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].2, PathBuf::from("/nonexistent/bin/gcc"));
    }
}
