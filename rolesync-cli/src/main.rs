//! Rolesync CLI
//!
//! Syncs IAM roles tagged `eks/<cluster>/...` into each EKS cluster's aws-auth ConfigMap

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use output::OutputFormat;
use rolesync_core::{RolesyncConfig, RunStatus};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Write the mappings to every cluster instead of only printing them
    #[arg(long)]
    update: bool,

    /// Output format (table, json, yaml)
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IAM path the tagged roles live under
    #[arg(long)]
    path_prefix: Option<String>,

    /// Clusters updated at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// AWS profile
    #[arg(long)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a sample configuration file
    Config,
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    /// Load configuration and layer the command-line overrides on top
    fn load_config(&self) -> Result<RolesyncConfig> {
        let mut config = RolesyncConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(prefix) = &self.path_prefix {
            config.discovery.path_prefix = prefix.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.apply.concurrency = concurrency;
        }
        if let Some(region) = &self.region {
            config.aws.region = Some(region.clone());
        }
        if let Some(profile) = &self.profile {
            config.aws.profile = Some(profile.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunStatus> {
    match &cli.command {
        Some(Commands::Config) => {
            commands::config::handle_config_command();
            return Ok(RunStatus::Done);
        }
        Some(Commands::Completions { shell }) => {
            generate_completions(*shell);
            return Ok(RunStatus::Done);
        }
        None => {}
    }

    let config = cli.load_config()?;

    // Held until exit so buffered file output is flushed
    let _log_guard = config
        .logging
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    commands::sync::handle_sync_command(&config, cli.update, cli.output).await
}

/// Generate shell completions
fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
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
    fn test_defaults_to_dry_run() {
        let cli = Cli::try_parse_from(["rolesync"]).unwrap();
        assert!(!cli.update);
        assert_eq!(cli.output, OutputFormat::Table);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_overrides_parse() {
        let cli = Cli::try_parse_from([
            "rolesync",
            "--update",
            "-o",
            "yaml",
            "--path-prefix",
            "/platform/",
            "--concurrency",
            "2",
        ])
        .unwrap();

        assert!(cli.update);
        assert_eq!(cli.output, OutputFormat::Yaml);
        assert_eq!(cli.path_prefix.as_deref(), Some("/platform/"));
        assert_eq!(cli.concurrency, Some(2));
    }

    #[test]
    fn test_completions_subcommand() {
        let cli = Cli::try_parse_from(["rolesync", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Completions { .. })));
    }
}
