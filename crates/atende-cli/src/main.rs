//! Atende CLI
//!
//! Command-line interface for the Atende customer-service bot

mod console;
mod logging;

use anyhow::{Context, Result};
use atende_billing::{BillingApi, HttpBillingClient};
use atende_config::Config;
use atende_core::testing::{MemoryBilling, DEMO_DOCUMENT};
use atende_core::{extract_digits, is_valid_cpf, AtendeRuntime, InboundPipeline, SqliteMessageLog};
use atende_ipc::EventBus;
use atende_storage::Storage;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

const DB_FILE: &str = "atende.db";

#[derive(Parser)]
#[command(name = "atende")]
#[command(about = "ISP customer-service chat bot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (defaults to core.log_level, then info)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the bot from the terminal
    Console {
        /// Chat id the messages appear to come from
        #[arg(long, default_value = "5500000000000@s.whatsapp.net")]
        chat_id: String,

        /// Display name of the customer
        #[arg(long, default_value = "Cliente")]
        name: String,

        /// Use a built-in billing backend with one demo customer
        #[arg(long)]
        demo: bool,
    },

    /// Load and validate the configuration
    CheckConfig,

    /// Validate a CPF number
    Cpf { document: String },

    /// Show the logged messages of a chat
    History {
        chat_id: String,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Delete logged messages older than this many days first
        #[arg(long)]
        prune_days: Option<u32>,
    },

    /// Log file management
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    /// List log files
    List,
    /// Print the last lines of today's log
    Tail {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
    /// Remove log files older than the retention period
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Console {
            chat_id,
            name,
            demo,
        } => {
            let config = if demo {
                load_config(cli.config.clone()).unwrap_or_else(|_| demo_config())
            } else {
                load_config(cli.config.clone())?
            };
            let data_dir = config.data_dir()?;
            fs::create_dir_all(&data_dir)?;
            let level = cli
                .log_level
                .clone()
                .unwrap_or_else(|| config.log_level().to_string());
            let _logging_guard = logging::init_logging(&data_dir.join("logs"), &level, true)?;

            let billing: Arc<dyn BillingApi> = if demo {
                println!("Modo demonstração: CPF de teste {}", DEMO_DOCUMENT);
                Arc::new(MemoryBilling::demo())
            } else {
                Arc::new(HttpBillingClient::new(
                    &config.billing.base_url,
                    config.billing.token.clone(),
                    Duration::from_secs(config.billing.request_timeout_secs),
                )?)
            };
            let storage = Arc::new(Mutex::new(Storage::new(data_dir.join(DB_FILE))?));
            let transport = Arc::new(console::ConsoleTransport::new(data_dir.join("outbox"))?);
            let pipeline = Arc::new(InboundPipeline::new(
                &config,
                billing,
                transport,
                Arc::new(SqliteMessageLog::new(storage)),
            ));
            let runtime = Arc::new(AtendeRuntime::from_config(
                pipeline,
                EventBus::new(),
                &config.pipeline,
            ));

            info!(chat_id = %chat_id, demo = demo, "Starting console session");
            println!(
                "Conversando como {} ({}). Ctrl+D para sair, /estado para ver o estado.",
                name, chat_id
            );
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            console::run_console(runtime, stdin, &chat_id, &name).await?;
        }

        Commands::CheckConfig => {
            let path = config_path(cli.config)?;
            match Config::load(&path) {
                Ok(config) => {
                    println!("Configuration is valid: {}", path.display());
                    println!("  Company: {}", config.core.company_name);
                    println!("  Billing: {}", config.billing.base_url);
                    println!(
                        "  Token: {}",
                        if config.billing.token.is_some() {
                            "set"
                        } else {
                            "not set"
                        }
                    );
                    println!("  Data dir: {}", config.data_dir()?.display());
                }
                Err(e) => anyhow::bail!("Configuration is invalid: {:#}", e),
            }
        }

        Commands::Cpf { document } => {
            let digits = extract_digits(&document);
            if is_valid_cpf(&digits) {
                println!("{} is a valid CPF", digits);
            } else {
                anyhow::bail!("{} is not a valid CPF", document);
            }
        }

        Commands::History {
            chat_id,
            limit,
            prune_days,
        } => {
            let config = load_config(cli.config)?;
            let db_path = config.data_dir()?.join(DB_FILE);
            if !db_path.exists() {
                println!("No message log at {}", db_path.display());
                return Ok(());
            }
            let storage = Storage::new(&db_path)?;
            if let Some(days) = prune_days {
                let removed =
                    storage.prune_before(prune_cutoff_millis(atende_storage::now_millis(), days))?;
                println!("Pruned {} message(s) older than {} day(s)", removed, days);
            }
            let messages = storage.recent_messages(&chat_id, limit)?;
            if messages.is_empty() {
                println!("No messages for {}", chat_id);
            }
            for message in messages {
                let when = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(message.timestamp)
                    .map(|ts| {
                        ts.with_timezone(&chrono::Local)
                            .format("%Y-%m-%d %H:%M:%S")
                            .to_string()
                    })
                    .unwrap_or_else(|| message.timestamp.to_string());
                let who = match message.direction {
                    atende_storage::Direction::Incoming => {
                        message.display_name.as_deref().unwrap_or("cliente").to_string()
                    }
                    atende_storage::Direction::Outgoing => "bot".to_string(),
                };
                let attachment = message
                    .attachment
                    .map(|a| format!(" [{}]", a.file_name.unwrap_or(a.kind)))
                    .unwrap_or_default();
                println!("{} {}{}: {}", when, who, attachment, message.text);
            }
        }

        Commands::Logs { action } => {
            let config = load_config(cli.config).unwrap_or_default();
            let manager = logging::LogManager::new(config.data_dir()?.join("logs"));
            match action {
                LogCommands::List => {
                    let files = manager.log_files()?;
                    println!(
                        "Log files ({} total):\n",
                        logging::LogManager::format_size(manager.total_size()?)
                    );
                    for file in files {
                        let metadata = fs::metadata(&file)?;
                        let modified: chrono::DateTime<chrono::Local> = metadata.modified()?.into();
                        println!(
                            "  {} ({}, modified {})",
                            file.display(),
                            logging::LogManager::format_size(metadata.len()),
                            modified.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                LogCommands::Tail { lines } => {
                    let current = manager.current_log_path();
                    if current.exists() {
                        let content = fs::read_to_string(&current)?;
                        let all: Vec<&str> = content.lines().collect();
                        for line in &all[all.len().saturating_sub(lines)..] {
                            println!("{}", line);
                        }
                    } else {
                        println!("No log file found at {}", current.display());
                    }
                }
                LogCommands::Clean => {
                    let removed = manager.cleanup_old_logs()?;
                    println!("Cleaned {} old log file(s)", removed);
                }
            }
        }
    }

    Ok(())
}

fn config_path(config_path: Option<String>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Config::default_path().context("No config directory on this platform"),
    }
}

fn load_config(config_path_arg: Option<String>) -> Result<Config> {
    let path = config_path(config_path_arg)?;
    Config::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn prune_cutoff_millis(now_millis: i64, days: u32) -> i64 {
    now_millis - i64::from(days) * 24 * 60 * 60 * 1000
}

fn demo_config() -> Config {
    let mut config = Config::default();
    config.billing.base_url = "http://localhost".to_string();
    config
}
