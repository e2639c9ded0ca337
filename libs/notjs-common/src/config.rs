// Runtime settings for the NotJS server
// Every value comes from an environment variable with a sensible default

use anyhow::{bail, Context, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TOOLCHAINS_PATH: &str = "config/toolchains.json";
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp/notjs";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub scratch_dir: PathBuf,
    pub toolchains_path: PathBuf,
    /// Time a terminated process gets before it is killed outright
    pub teardown_grace: Duration,
    pub output_chunk_bytes: usize,
    pub max_source_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            toolchains_path: PathBuf::from(DEFAULT_TOOLCHAINS_PATH),
            teardown_grace: Duration::from_millis(5000),
            output_chunk_bytes: 1024,
            max_source_bytes: 1024 * 1024, // 1MB
        }
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let settings = Self {
            bind_addr: lookup("NOTJS_BIND").unwrap_or(defaults.bind_addr),
            scratch_dir: lookup("NOTJS_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            toolchains_path: lookup("NOTJS_TOOLCHAINS")
                .map(PathBuf::from)
                .unwrap_or(defaults.toolchains_path),
            teardown_grace: Duration::from_millis(parse_var(
                &lookup,
                "NOTJS_TEARDOWN_GRACE_MS",
                defaults.teardown_grace.as_millis() as u64,
            )?),
            output_chunk_bytes: parse_var(&lookup, "NOTJS_OUTPUT_CHUNK_BYTES", defaults.output_chunk_bytes)?,
            max_source_bytes: parse_var(&lookup, "NOTJS_MAX_SOURCE_BYTES", defaults.max_source_bytes)?,
        };

        if settings.output_chunk_bytes == 0 {
            bail!("NOTJS_OUTPUT_CHUNK_BYTES must be greater than zero");
        }

        Ok(settings)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value '{}' for {}", raw, key)),
        None => Ok(default),
    }
}
