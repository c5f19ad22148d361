//! Argument parsing and dispatch

pub mod commands;
pub mod context;
pub mod handlers;

use crate::cli::commands::Commands;
use crate::error::Result;
use campaign_common::logging::LogFormat;
use clap::Parser;
use clap_verbosity_flag::{OffLevel, Verbosity};
use std::path::PathBuf;

/// Campaign Hub CLI - talk to the dashboard backends from a terminal
#[derive(Parser, Debug)]
#[command(
    name = "campaign",
    author = "Campaign Hub Team",
    version,
    about = "Campaign Hub CLI - talk to the dashboard backends from a terminal",
    long_about = "Command-line front-end for the Campaign Hub dashboard backends.

SESSION:
  campaign login                    # Sign in (prompts for missing fields)
  campaign whoami                   # Show the signed-in user
  campaign logout                   # Sign out and forget stored tokens
  campaign register                 # Create an account

SERVICES:
  campaign health                   # Probe every backend
  campaign request campaign /campaigns -q status=active

CONFIGURATION:
  campaign config show              # Show the effective configuration
  campaign config init              # Write an example config file"
)]
pub struct Args {
    /// Configuration file path (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "CAMPAIGN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit diagnostics as JSON lines on stderr (with -v or RUST_LOG)
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<OffLevel>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    pub fn log_format(&self) -> LogFormat {
        if self.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }

    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let config_path = self.config;

        match self.command {
            Commands::Login { email, password } => {
                handlers::auth::handle_login(config_path, email, password, self.json).await
            }
            Commands::Logout => handlers::auth::handle_logout(config_path).await,
            Commands::Whoami => handlers::auth::handle_whoami(config_path, self.json).await,
            Commands::Register {
                email,
                full_name,
                role,
            } => handlers::auth::handle_register(config_path, email, full_name, role).await,

            Commands::Health => handlers::services::handle_health(config_path, self.json).await,
            Commands::Request(request) => {
                handlers::services::handle_request(config_path, request).await
            }

            Commands::Config { action } => handlers::config::handle_config(action, config_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_flag() {
        let args = Args::try_parse_from(["campaign", "whoami"]).unwrap();
        assert_eq!(args.log_format(), LogFormat::Compact);

        let args = Args::try_parse_from(["campaign", "-v", "whoami", "--json-logs"]).unwrap();
        assert_eq!(args.log_format(), LogFormat::Json);
        assert!(!args.json);
    }
}
