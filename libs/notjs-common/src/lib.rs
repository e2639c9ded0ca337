pub mod config;
mod defaults;
pub mod toolchain;
pub mod types;

pub use config::Settings;
pub use toolchain::{ToolchainDescriptor, ToolchainError, ToolchainRegistry, ToolchainsFile, VersionProfile};
pub use types::ExecutionRequest;
