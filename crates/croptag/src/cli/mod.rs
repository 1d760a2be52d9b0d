//! Command-line interface for croptag.
//!
//! This module provides the CLI structure for the `croptag` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, FormArgs, HistoryCommand, NormalizeCommand, RegisterCommand, ScanCommand,
    TraceCommand,
};

/// croptag - Scan and register RFID-tagged crop bags
///
/// Collects bag tags from a keyboard-wedge RFID reader into a scan session
/// and registers the batch with the marketplace backend.
#[derive(Debug, Parser)]
#[command(name = "croptag")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open a scan session on stdin and register the batch
    Scan(ScanCommand),

    /// Register a batch from a file of EPCs
    Register(RegisterCommand),

    /// Show how raw scanner strings normalize
    Normalize(NormalizeCommand),

    /// List recent registrations from the local log
    History(HistoryCommand),

    /// Find the registrations that carried a tag
    Trace(TraceCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
