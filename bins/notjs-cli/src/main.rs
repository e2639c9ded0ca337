mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use notjs_common::config::DEFAULT_TOOLCHAINS_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "notjs-cli")]
#[command(about = "NotJS CLI - Manage toolchain configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the built-in toolchain table to <path>/config/toolchains.json
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Print every configured language with its versions
    List {
        /// Toolchain config file (built-in table if absent)
        #[arg(short, long, default_value = DEFAULT_TOOLCHAINS_PATH)]
        config: PathBuf,
    },

    /// Validate the config file and check that every compiler can be found
    Validate {
        #[arg(short, long, default_value = DEFAULT_TOOLCHAINS_PATH)]
        config: PathBuf,
    },

    /// Register a new version for a language
    AddVersion {
        /// Language key (e.g., c, java)
        #[arg(short, long)]
        language: String,

        /// Version string (e.g., 23, 1.24)
        #[arg(short, long)]
        version: String,

        /// Toolchain home; binaries are taken from <home>/bin
        #[arg(long)]
        home: Option<PathBuf>,

        /// Make this the language's default version
        #[arg(long, default_value = "false")]
        make_default: bool,

        #[arg(short, long, default_value = DEFAULT_TOOLCHAINS_PATH)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, force } => {
            commands::init_config(&path, force)?;
        }
        Commands::List { config } => {
            commands::list_toolchains(&config)?;
        }
        Commands::Validate { config } => {
            commands::validate_config(&config)?;
        }
        Commands::AddVersion {
            language,
            version,
            home,
            make_default,
            config,
        } => {
            commands::add_version(&config, &language, &version, home, make_default)?;
        }
    }

    Ok(())
}
