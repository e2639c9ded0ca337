// Toolchain registry
// Loads and validates toolchains from toolchains.json, falls back to the built-in table

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Client-input errors raised while resolving a language or version
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolchainError {
    #[error("Language '{language}' is not supported. Supported languages: {}", .supported.join(", "))]
    UnknownLanguage {
        language: String,
        supported: Vec<String>,
    },

    #[error(
        "Unsupported version '{version}' for language '{language}'. Available versions: [{}]",
        .available.join(", ")
    )]
    UnsupportedVersion {
        language: String,
        version: String,
        available: Vec<String>,
    },
}

/// One installable version of a toolchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionProfile {
    pub version: String,

    /// Toolchain installation root; binaries are looked up in `{home}/bin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,

    /// Extra environment for both the compiler and the program
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl VersionProfile {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            home: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }
}

/// Static description of one language's toolchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainDescriptor {
    pub language: String,
    pub compiler_path: String,
    pub default_version: String,
    pub versions: Vec<VersionProfile>,

    /// Command prefix for the produced program (e.g. `stdbuf -o0`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launcher: Vec<String>,
}

impl ToolchainDescriptor {
    /// Versions in configuration order
    pub fn available_versions(&self) -> Vec<String> {
        self.versions.iter().map(|p| p.version.clone()).collect()
    }

    pub fn profile(&self, version: &str) -> Option<&VersionProfile> {
        self.versions.iter().find(|p| p.version == version)
    }

    pub fn supports(&self, version: &str) -> bool {
        self.profile(version).is_some()
    }

    /// Resolve a requested version: absent or blank means the default
    pub fn resolve_version(&self, requested: Option<&str>) -> Result<&VersionProfile, ToolchainError> {
        let version = match requested.map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => self.default_version.as_str(),
        };

        self.profile(version)
            .ok_or_else(|| ToolchainError::UnsupportedVersion {
                language: self.language.clone(),
                version: version.to_string(),
                available: self.available_versions(),
            })
    }

    /// Location of `binary` for a version: `{home}/bin/{binary}` when the
    /// profile has a home, otherwise the bare name (resolved through PATH)
    pub fn tool_path(&self, profile: &VersionProfile, binary: &str) -> PathBuf {
        match &profile.home {
            Some(home) => home.join("bin").join(binary),
            None => PathBuf::from(binary),
        }
    }

    /// Compiler executable for a version
    pub fn compiler_for(&self, profile: &VersionProfile) -> PathBuf {
        match &profile.home {
            Some(_) => {
                let name = Path::new(&self.compiler_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| self.compiler_path.clone());
                self.tool_path(profile, &name)
            }
            None => PathBuf::from(&self.compiler_path),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.language.trim().is_empty() {
            bail!("Toolchain with empty language name");
        }
        if self.language != self.language.to_lowercase() {
            bail!("Language key '{}' must be lower-case", self.language);
        }
        if self.compiler_path.trim().is_empty() {
            bail!("Language '{}' has an empty compiler_path", self.language);
        }
        if self.versions.is_empty() {
            bail!("Language '{}' declares no versions", self.language);
        }

        let mut seen = HashSet::new();
        for profile in &self.versions {
            if profile.version.trim().is_empty() {
                bail!("Language '{}' declares a blank version", self.language);
            }
            if !seen.insert(profile.version.as_str()) {
                bail!(
                    "Language '{}' declares version '{}' twice",
                    self.language,
                    profile.version
                );
            }
        }

        if !self.supports(&self.default_version) {
            bail!(
                "Default version '{}' of language '{}' is not in its version list {:?}",
                self.default_version,
                self.language,
                self.available_versions()
            );
        }

        Ok(())
    }
}

/// On-disk shape of toolchains.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainsFile {
    pub toolchains: Vec<ToolchainDescriptor>,
}

/// Registry of configured toolchains
///
/// Read-only after construction; safe to share across any number of sessions.
#[derive(Debug, Clone)]
pub struct ToolchainRegistry {
    toolchains: BTreeMap<String, ToolchainDescriptor>,
}

impl ToolchainRegistry {
    /// Build a registry, rejecting invalid or duplicate descriptors
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ToolchainDescriptor>) -> Result<Self> {
        let mut toolchains = BTreeMap::new();

        for descriptor in descriptors {
            descriptor.validate()?;
            let key = descriptor.language.clone();
            if toolchains.insert(key.clone(), descriptor).is_some() {
                bail!("Language '{}' is configured twice", key);
            }
        }

        if toolchains.is_empty() {
            bail!("No toolchains configured");
        }

        Ok(Self { toolchains })
    }

    /// Load toolchain configuration from a toolchains.json file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Toolchain config file not found: {}", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let file: ToolchainsFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let registry = Self::from_descriptors(file.toolchains)
            .with_context(|| format!("Invalid toolchain config in {}", path.display()))?;

        debug!(path = %path.display(), languages = ?registry.list_languages(), "Toolchain config loaded");
        Ok(registry)
    }

    /// Load the file if it exists, otherwise use the built-in table
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        info!(path = %path.display(), "Toolchain config not found, using built-in toolchains");
        Ok(Self::builtin())
    }

    /// Built-in toolchains (gcc, g++, go, rustc, SDKMAN Java)
    pub fn builtin() -> Self {
        let toolchains = crate::defaults::builtin_toolchains()
            .into_iter()
            .map(|d| (d.language.clone(), d))
            .collect();
        Self { toolchains }
    }

    /// All supported language identifiers, sorted
    pub fn list_languages(&self) -> Vec<String> {
        self.toolchains.keys().cloned().collect()
    }

    /// Descriptor for a language (case-insensitive)
    pub fn describe(&self, language: &str) -> Result<&ToolchainDescriptor, ToolchainError> {
        self.toolchains
            .get(&language.trim().to_lowercase())
            .ok_or_else(|| ToolchainError::UnknownLanguage {
                language: language.to_string(),
                supported: self.list_languages(),
            })
    }

    pub fn is_supported(&self, language: &str) -> bool {
        self.describe(language).is_ok()
    }

    /// Absent or blank versions are always valid (they resolve to the default)
    pub fn is_version_valid(&self, language: &str, version: Option<&str>) -> Result<bool, ToolchainError> {
        let descriptor = self.describe(language)?;
        Ok(match version.map(str::trim) {
            Some(v) if !v.is_empty() => descriptor.supports(v),
            _ => true,
        })
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolchainDescriptor> {
        self.toolchains.values()
    }

    pub fn to_file(&self) -> ToolchainsFile {
        ToolchainsFile {
            toolchains: self.toolchains.values().cloned().collect(),
        }
    }
}
