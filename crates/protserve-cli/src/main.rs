//! protserve CLI
//!
//! Command-line interface for the model cache and the inference service client.

mod commands;

use clap::{Parser, Subcommand};
use protserve_core::{LoggingConfig, ServeConfig};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// protserve - memory-bounded model cache and resilient inference client
#[derive(Parser, Debug)]
#[command(name = "protserve")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); PROTSERVE__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the health of the inference service
    Health,

    /// Send a request through the resilient client
    Request {
        /// HTTP method (GET, POST, ...)
        method: String,

        /// Path relative to the service base URL, e.g. /models/status
        path: String,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },

    /// List registered models
    Models,

    /// Load models into the cache through the inference service
    Load {
        /// Model keys to load, in order
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

fn init_logging(logging: &LoggingConfig, level: Option<&str>, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        level.unwrap_or(logging.level.as_str())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = if logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ServeConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging, cli.log_level.as_deref(), cli.verbose);

    let output = commands::Output { json: cli.json };

    match cli.command {
        Commands::Health => {
            if !commands::health(&config, &output).await? {
                std::process::exit(1);
            }
        }
        Commands::Request { method, path, body } => {
            commands::request(&config, &output, &method, &path, body.as_deref()).await?;
        }
        Commands::Models => {
            commands::models(&config, &output)?;
        }
        Commands::Load { keys } => {
            commands::load(&config, &output, &keys).await?;
        }
        Commands::Config => {
            commands::show_config(&config, &output)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_request_with_global_flags() {
        let cli = Cli::try_parse_from([
            "protserve",
            "request",
            "post",
            "/generate",
            "--body",
            r#"{"length": 50}"#,
            "--json",
            "-v",
        ])
        .unwrap();

        assert!(cli.json);
        assert!(cli.verbose);
        match cli.command {
            Commands::Request { method, path, body } => {
                assert_eq!(method, "post");
                assert_eq!(path, "/generate");
                assert_eq!(body.as_deref(), Some(r#"{"length": 50}"#));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_load_requires_keys() {
        assert!(Cli::try_parse_from(["protserve", "load"]).is_err());
        let cli = Cli::try_parse_from(["protserve", "--config", "serve.toml", "load", "a", "b"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("serve.toml")));
        assert!(matches!(cli.command, Commands::Load { ref keys } if keys.len() == 2));
    }
}
