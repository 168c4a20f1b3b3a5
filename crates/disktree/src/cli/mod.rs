//! CLI command definitions and handlers.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use disktree_common::paths::SCRATCH_ENV;
use disktree_common::{DisktreeError, DisktreePaths};

use crate::config::InspectConfig;
use crate::host::SystemHost;
use crate::report::default_readers;
use crate::target::classify;

/// Environment variable holding the tree path for `exec` commands.
pub const TREE_ENV: &str = "DISKTREE_TREE";

/// disktree - read-only disk image inspection
#[derive(Parser)]
#[command(name = "disktree")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory for converted images, extracted archives and mount points
    #[arg(long, global = true, env = SCRATCH_ENV, default_value = "/var/tmp")]
    pub scratch_dir: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// disktree commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Mount a target read-only and print its report as JSON
    Inspect {
        /// Disk image, directory, tarball, compressed file or OSTree tree
        target: PathBuf,

        /// Print compact JSON on one line
        #[arg(long)]
        compact: bool,
    },

    /// Mount a target read-only and run a command inside the tree
    Exec {
        /// Disk image, directory, tarball, compressed file or OSTree tree
        target: PathBuf,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<OsString>,
    },

    /// Print how a target would be prepared
    Classify {
        /// Disk image, directory, tarball, compressed file or OSTree tree
        target: PathBuf,
    },
}

impl Cli {
    /// The inspection configuration these arguments describe.
    #[must_use]
    pub fn config(&self) -> InspectConfig {
        InspectConfig {
            paths: DisktreePaths::with_scratch(&self.scratch_dir),
            ..InspectConfig::default()
        }
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the command.
    pub fn execute(self) -> Result<ExitCode> {
        let config = self.config();
        let host = SystemHost::new();

        match self.command {
            Commands::Inspect { target, compact } => {
                let report = crate::inspect(&host, &config, &target, &default_readers())?;
                let json = if compact {
                    serde_json::to_string(&report)?
                } else {
                    serde_json::to_string_pretty(&report)?
                };
                println!("{json}");
                Ok(ExitCode::SUCCESS)
            }

            Commands::Exec { target, command } => {
                let code = crate::with_tree(&host, &config, &target, |prepared, _| {
                    let Some((program, args)) = command.split_first() else {
                        return Ok(0);
                    };
                    let status = Command::new(program)
                        .args(args)
                        .current_dir(&prepared.tree)
                        .env(TREE_ENV, &prepared.tree)
                        .status()
                        .map_err(|source| DisktreeError::ToolSpawn {
                            program: program.to_string_lossy().into_owned(),
                            source,
                        })?;
                    tracing::debug!(%status, "Command finished");
                    Ok(status.code().unwrap_or(1))
                })?;
                Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
            }

            Commands::Classify { target } => {
                println!("{}", classify(&target)?);
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
