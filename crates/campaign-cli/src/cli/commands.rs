use campaign_sdk::ServiceKind;
use clap::{Args, Subcommand, ValueEnum};

/// Main CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,

        /// Read from the environment rather than the shell history
        #[arg(long, env = "CAMPAIGN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Sign out and forget stored tokens
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Create an account; it must be verified before signing in
    Register {
        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        full_name: Option<String>,

        /// Account type
        #[arg(long)]
        role: Option<String>,
    },

    /// Probe the health endpoint of every backend service
    Health,

    /// Send an authenticated request to one service
    Request(RequestArgs),

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Target service: user, campaign, analytics, payment or integration
    pub service: ServiceKind,

    /// Path relative to the service base URL
    pub path: String,

    #[arg(short = 'X', long, value_enum, default_value_t = HttpVerb::Get)]
    pub method: HttpVerb,

    /// Query parameter as key=value; repeat for more
    #[arg(short, long = "query", value_name = "KEY=VALUE")]
    pub query: Vec<String>,

    /// JSON request body
    #[arg(short, long)]
    pub data: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write an example configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the resolved file locations
    Path,
}
