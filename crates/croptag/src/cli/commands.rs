//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::registration::RegistrationForm;

/// Registration form fields shared by `scan` and `register`.
#[derive(Debug, Clone, Args)]
pub struct FormArgs {
    /// Crop identifier
    #[arg(long)]
    pub crop_id: String,

    /// Crop display name
    #[arg(long)]
    pub crop_name: Option<String>,

    /// Packaging date (YYYY-MM-DD)
    #[arg(long)]
    pub packaging_date: String,

    /// Expiry date (YYYY-MM-DD)
    #[arg(long)]
    pub expiry_date: String,

    /// Capacity of each bag
    #[arg(long)]
    pub bag_capacity: String,

    /// Number of bags in the batch (0 for no limit)
    #[arg(long)]
    pub total_bags: String,
}

impl From<FormArgs> for RegistrationForm {
    fn from(args: FormArgs) -> Self {
        Self {
            crop_id: args.crop_id,
            crop_name: args.crop_name.unwrap_or_default(),
            packaging_date: args.packaging_date,
            expiry_date: args.expiry_date,
            bag_capacity: args.bag_capacity,
            total_bags: args.total_bags,
        }
    }
}

/// Scan command arguments.
#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Registration form fields
    #[command(flatten)]
    pub form: FormArgs,
}

/// Register command arguments.
#[derive(Debug, Args)]
pub struct RegisterCommand {
    /// File with one EPC per line
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Registration form fields
    #[command(flatten)]
    pub form: FormArgs,
}

/// Normalize command arguments.
#[derive(Debug, Args)]
pub struct NormalizeCommand {
    /// Raw scanner strings
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<String>,
}

/// History command arguments.
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Maximum number of entries
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Trace command arguments.
#[derive(Debug, Args)]
pub struct TraceCommand {
    /// The EPC to look up (any formatting)
    pub epc: String,

    /// Maximum number of entries
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_args() -> FormArgs {
        FormArgs {
            crop_id: "CROP-7".to_string(),
            crop_name: None,
            packaging_date: "2026-10-01".to_string(),
            expiry_date: "2027-01-01".to_string(),
            bag_capacity: "50".to_string(),
            total_bags: "3".to_string(),
        }
    }

    #[test]
    fn test_form_args_into_form() {
        let form = RegistrationForm::from(form_args());
        assert_eq!(form.crop_id, "CROP-7");
        assert_eq!(form.crop_name, "");
        assert_eq!(form.expected_count(), Some(3));
    }

    #[test]
    fn test_form_args_keeps_crop_name() {
        let mut args = form_args();
        args.crop_name = Some("Maize".to_string());
        assert_eq!(RegistrationForm::from(args).crop_name, "Maize");
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_history_command_debug() {
        let cmd = HistoryCommand {
            limit: 5,
            json: true,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("limit"));
        assert!(debug_str.contains("json"));
    }
}
