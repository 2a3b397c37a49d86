//! CLI entry point for Keygate.

pub mod auth;
pub mod serve;

use clap::{Parser, Subcommand};

/// Keygate device-login CLI
#[derive(Parser, Debug)]
#[command(name = "keygate", version, about = "Keygate: log a CLI in through a browser")]
pub struct Cli {
    /// Server URL (overrides KEYGATE_SERVER_URL)
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Directory holding the saved key (overrides KEYGATE_CREDENTIAL_DIR)
    #[arg(long, global = true)]
    pub credential_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the authorization server
    Serve(ServeArgs),
    /// Log this machine in and store the issued key
    Login(LoginArgs),
    /// Approve a pending login by its user code
    Approve(ApproveArgs),
    /// Show whether a key is stored
    Status,
    /// Forget the stored key
    Logout,
}

/// Arguments for `keygate serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides KEYGATE_BIND)
    #[arg(long)]
    pub bind: Option<std::net::SocketAddr>,

    /// Keep authorizations in memory instead of on disk
    #[arg(long)]
    pub in_memory: bool,

    /// Also mount the approval endpoints. Only do this behind an authenticating proxy.
    #[arg(long)]
    pub with_approval: bool,
}

/// Arguments for `keygate login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Name shown on the approval page
    #[arg(short, long)]
    pub name: Option<String>,
}

/// Arguments for `keygate approve`.
#[derive(Parser, Debug)]
pub struct ApproveArgs {
    /// Code shown by `keygate login`, e.g. BCDF-GHJK
    pub user_code: String,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
