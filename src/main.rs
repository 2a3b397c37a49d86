//! Keygate CLI binary entry point.

use clap::Parser;
use keygate::cli::{Cli, Commands};
use keygate::config::KeygateConfig;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match KeygateConfig::from_env() {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, mut config: KeygateConfig) -> keygate::error::Result<()> {
    if let Some(server) = cli.server {
        config = config.with_server_url(server.trim_end_matches('/'));
    }
    if let Some(dir) = cli.credential_dir {
        config = config.with_credential_dir(dir);
    }

    match cli.command {
        Commands::Serve(args) => {
            if let Some(bind) = args.bind {
                config = config.with_bind(bind);
            }
            keygate::cli::serve::handle_serve(&config, args.in_memory, args.with_approval).await
        }
        Commands::Login(args) => keygate::cli::auth::handle_login(&config, args.name.as_deref()).await,
        Commands::Approve(args) => keygate::cli::auth::handle_approve(&config, &args.user_code).await,
        Commands::Status => keygate::cli::auth::handle_status(&config).await,
        Commands::Logout => keygate::cli::auth::handle_logout(&config).await,
    }
}
