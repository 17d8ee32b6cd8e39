// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `valet serve` command implementation.
//!
//! Wires the configured provider backend, SQLite storage, and the console
//! front end into a `MessageGateway`, starts the background schedulers
//! (daily memory consolidation, hourly history reaper), and runs the
//! read-eval loop until EOF or Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};
use valet_agent::MessageGateway;
use valet_anthropic::tools::NoTools;
use valet_anthropic::AnthropicGateway;
use valet_config::ValetConfig;
use valet_core::traits::QueryProvider;
use valet_core::ValetError;
use valet_openai::OpenAiGateway;
use valet_storage::Database;

use crate::console::ConsoleTransport;

/// User and chat identity of the console front end.
pub const CONSOLE_USER: &str = "console";

const CONSOLIDATION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const REAPER_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// The closed backend set, resolved from configuration exactly once.
enum Backend {
    Anthropic(Arc<AnthropicGateway>),
    OpenAi(Arc<OpenAiGateway>),
}

impl Backend {
    fn resolve(config: &ValetConfig, db: &Database) -> Result<Self, ValetError> {
        match config.provider.backend.as_str() {
            "anthropic" => Ok(Backend::Anthropic(Arc::new(AnthropicGateway::new(
                config,
                Some(db.clone()),
                Arc::new(NoTools),
            )?))),
            "openai" => Ok(Backend::OpenAi(Arc::new(OpenAiGateway::new(config)?))),
            // Unreachable after config validation, but resolve defensively.
            other => Err(ValetError::Config(format!("unknown backend \"{other}\""))),
        }
    }

    fn provider(&self) -> Arc<dyn QueryProvider> {
        match self {
            Backend::Anthropic(gateway) => Arc::clone(gateway) as Arc<dyn QueryProvider>,
            Backend::OpenAi(gateway) => Arc::clone(gateway) as Arc<dyn QueryProvider>,
        }
    }
}

/// Runs the `valet serve` command.
pub async fn run_serve(config: ValetConfig) -> Result<(), ValetError> {
    init_tracing(&config.agent.log_level);
    info!("starting valet serve");

    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;
    let backend = Backend::resolve(&config, &db)?;
    let provider = backend.provider();
    info!(provider = provider.name(), "backend resolved");

    let transport = Arc::new(ConsoleTransport::new());
    let gateway = Arc::new(MessageGateway::new(
        Arc::clone(&provider),
        transport,
        db.clone(),
        &config,
    ));

    start_schedulers(&config, &backend, &provider, &db);

    println!(
        "{} ready. Type a message; /new starts a fresh conversation, /stop cancels, /quit exits.",
        config.agent.name
    );
    run_console_loop(&gateway).await;

    info!("valet serve shutting down");
    Ok(())
}

fn start_schedulers(
    config: &ValetConfig,
    backend: &Backend,
    provider: &Arc<dyn QueryProvider>,
    db: &Database,
) {
    if config.memory.enabled {
        let provider = Arc::clone(provider);
        let db = db.clone();
        let min_facts = config.memory.consolidation_min_facts.max(1) as usize;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CONSOLIDATION_INTERVAL);
            // The first tick fires immediately; skip it so consolidation
            // runs a day after startup, not during it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match valet_memory::consolidation::run_consolidation(
                    provider.as_ref(),
                    &db,
                    min_facts,
                )
                .await
                {
                    Ok(merged) => info!(merged, "memory consolidation sweep finished"),
                    Err(e) => warn!(error = %e, "memory consolidation sweep failed"),
                }
            }
        });
    }

    if let Backend::OpenAi(openai) = backend {
        let openai = Arc::clone(openai);
        let idle = Duration::from_secs(openai_idle_hours_secs(config));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAPER_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = openai.reap_idle(idle);
                if reaped > 0 {
                    info!(reaped, "reaped idle conversation histories");
                }
            }
        });
    }
}

fn openai_idle_hours_secs(config: &ValetConfig) -> u64 {
    config.openai.history_idle_hours * 60 * 60
}

async fn run_console_loop(gateway: &Arc<MessageGateway>) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };

        let input = line.trim();
        match input {
            "" => {}
            "/quit" | "/exit" => break,
            "/stop" => {
                if !gateway.stop(CONSOLE_USER) {
                    println!("Nothing in flight to stop.");
                }
            }
            "/new" => match gateway.reset_session(CONSOLE_USER).await {
                Ok(()) => println!("Started a fresh conversation."),
                Err(e) => error!(error = %e, "failed to reset session"),
            },
            _ => {
                gateway
                    .handle_message(CONSOLE_USER, CONSOLE_USER, input)
                    .await;
            }
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("valet={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = ValetConfig::default();
        config.provider.backend = "bard".into();
        // Resolution never reaches the network; it only needs a database
        // handle, so run it against an in-memory store.
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let db = Database::open_in_memory().await.unwrap();
                Backend::resolve(&config, &db).err()
            });
        assert!(matches!(result, Some(ValetError::Config(_))));
    }

    #[test]
    fn idle_hours_convert_to_seconds() {
        let mut config = ValetConfig::default();
        config.openai.history_idle_hours = 3;
        assert_eq!(openai_idle_hours_secs(&config), 3 * 60 * 60);
    }
}
