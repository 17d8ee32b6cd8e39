// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Valet - An always-on personal assistant gateway.
//!
//! This is the binary entry point for the Valet agent.

use clap::{Parser, Subcommand};

mod console;
mod serve;
mod status;

/// Valet - An always-on personal assistant gateway.
#[derive(Parser, Debug)]
#[command(name = "valet", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the agent with the console front end.
    Serve,
    /// Show usage totals and recent sessions.
    Status {
        /// User id to report on.
        #[arg(long, default_value = serve::CONSOLE_USER)]
        user: String,
    },
    /// Print the resolved configuration.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match valet_config::load_and_validate() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("valet: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Status { user }) => status::run_status(&config, &user).await,
        Some(Commands::Config) => match toml::to_string_pretty(&config) {
            Ok(rendered) => {
                println!("{rendered}");
                Ok(())
            }
            Err(e) => Err(valet_core::ValetError::Internal(format!(
                "failed to render config: {e}"
            ))),
        },
        None => {
            println!("valet: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("valet: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_validates() {
        let config = valet_config::ValetConfig::default();
        assert!(valet_config::validate(&config).is_ok());
    }
}
