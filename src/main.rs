//! PocketAgent CLI
//!
//! Runs the Telegram bot, a console REPL against the same bot core, and
//! telemetry queries.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use pocket_agent::transport::{ConsoleTransport, Dispatcher, TelegramTransport};
use pocket_agent::{planner_from_config, Config, PocketAgent, SessionId, Telemetry};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "pocket-agent")]
#[command(about = "PocketAgent - a chat bot front end for a planning agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: $XDG_CONFIG_HOME/pocket-agent/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// LLM model used for routing and clarifications
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL for a custom OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// API key - overrides auth.json and env vars
    #[arg(long)]
    api_key: Option<String>,

    /// Planner service URL - overrides PLANNER_URL
    #[arg(long)]
    planner_url: Option<String>,

    /// Data directory (default: ~/.pocket_agent or $XDG_DATA_HOME/pocket-agent)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// OpenTelemetry collector endpoint (e.g., http://localhost:4318)
    #[arg(long)]
    otel_endpoint: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot (long polling)
    Serve,

    /// Chat with the bot in the terminal
    Repl {
        /// Replay a scripted plan instead of calling the planner service
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// Show telemetry statistics
    Stats {
        /// Number of recent turns to show
        #[arg(short = 'n', long, default_value = "20")]
        turns: usize,
    },
}

/// Build configuration - priority: CLI flags > env vars > auth.json > config file
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?.with_verbose(cli.verbose);

    if let Some(ref model) = cli.model {
        config = config.with_model(model.clone());
    }
    if let Some(ref base_url) = cli.base_url {
        config.llm.base_url = Some(base_url.clone());
    }
    if let Some(ref api_key) = cli.api_key {
        config = config.with_api_key(api_key.clone());
    }
    if let Some(ref url) = cli.planner_url {
        config.planner.base_url = Some(url.clone());
    }
    if let Some(ref data_dir) = cli.data_dir {
        config = config.with_log_dir(data_dir.clone());
    }
    if let Some(ref endpoint) = cli.otel_endpoint {
        config.telemetry.otel_endpoint = Some(endpoint.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    std::fs::create_dir_all(&config.telemetry.log_dir)?;

    match cli.command {
        Some(Commands::Serve) => serve(config).await,
        Some(Commands::Stats { turns }) => {
            let telemetry = Telemetry::open(config.telemetry.log_dir.clone())?;
            show_stats(&telemetry, turns)
        }
        Some(Commands::Repl { script }) => run_repl(config, script.as_deref()).await,
        None => run_repl(config, None).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let telemetry = Arc::new(Telemetry::init(
        config.telemetry.log_dir.clone(),
        config.telemetry.verbose,
        config.telemetry.otel_endpoint.as_deref(),
        "telegram",
        Some(&config.llm.model),
        Some(config.llm.provider.as_str()),
    )?);

    let token = config
        .telegram
        .bot_token
        .as_deref()
        .ok_or_else(|| anyhow!("No bot token: set TELEGRAM_BOT_TOKEN or add a telegram entry to auth.json"))?;
    let transport = Arc::new(TelegramTransport::new(
        token,
        &config.telegram.api_base,
        Duration::from_secs(config.telegram.poll_timeout_secs),
    )?);

    let planner = planner_from_config(&config, None)?;
    let bot = Arc::new(PocketAgent::new(&config, planner, transport.clone(), telemetry)?);
    let dispatcher = Dispatcher::with_idle_timeout(bot.adapter().clone(), config.chat_idle_timeout());
    let cancel = CancellationToken::new();

    let sweeper = {
        let bot = bot.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bot.sweep_until_cancelled(SWEEP_INTERVAL, cancel).await })
    };
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                cancel.cancel();
            }
        })
    };

    println!("PocketAgent is running. Press Ctrl-C to stop.");
    let result = transport.run(&dispatcher, cancel.clone()).await;

    cancel.cancel();
    dispatcher.shutdown().await;
    let _ = sweeper.await;
    ctrl_c.abort();

    println!("\nSession summary: {}", bot.telemetry().stats());
    Ok(result?)
}

fn show_stats(telemetry: &Telemetry, turn_limit: usize) -> Result<()> {
    println!("Telemetry Database: {}\n", telemetry.db_path().display());

    println!("Routes:");
    println!("{:-<80}", "");
    let routes = telemetry.route_stats()?;
    if routes.is_empty() {
        println!("  No turns recorded.");
    } else {
        for r in routes {
            println!(
                "  {:12} | {:5} turns | {:8.1}ms avg | {} failed",
                r.route, r.turn_count, r.avg_duration_ms, r.failure_count
            );
        }
    }

    println!("\nRecent Turns (last {}):", turn_limit);
    println!("{:-<80}", "");
    let turns = telemetry.recent_turns(turn_limit)?;
    if turns.is_empty() {
        println!("  No turns recorded.");
    } else {
        for t in turns {
            println!(
                "  {} | chat {} | {} -> {} | {}ms",
                t.timestamp, t.chat_id, t.route, t.outcome, t.duration_ms
            );
            if let Some(ref input) = t.input {
                println!("    In:  {}", preview(input));
            }
            if let Some(ref error) = t.error {
                println!("    Err: {}", preview(error));
            }
        }
    }

    Ok(())
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 70 {
        format!("{}...", line.chars().take(70).collect::<String>())
    } else {
        line.to_string()
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /quit, /exit  - Exit the REPL");
    println!("  /cancel       - Drop the pending clarification");
    println!("  /stats        - Show session statistics");
    println!("  /help         - Show this help");
    println!();
    println!("When options are listed, type a number to pick one.");
}

async fn run_repl(config: Config, script: Option<&Path>) -> Result<()> {
    let telemetry = Arc::new(Telemetry::init_for_repl(
        config.telemetry.log_dir.clone(),
        config.telemetry.verbose,
        config.telemetry.otel_endpoint.as_deref(),
        Some(&config.llm.model),
        Some(config.llm.provider.as_str()),
    )?);

    let planner = planner_from_config(&config, script)?;
    let console = Arc::new(ConsoleTransport::new());
    let bot = PocketAgent::new(&config, planner, console.clone(), telemetry)?;

    println!("PocketAgent REPL");
    println!("Model: {}", config.llm.model);
    println!("Session: {}", bot.telemetry().session_id());
    println!("Database: {}", bot.telemetry().db_path().display());
    println!();
    print_help();
    println!();

    let mut rl = DefaultEditor::new()?;
    let history_path = config.telemetry.log_dir.join("history.txt");
    let _ = rl.load_history(&history_path);

    let session = SessionId::from(&ConsoleTransport::chat_id());

    loop {
        let prompt = if bot.coordinator().has_pending(&session).await {
            "pocket-agent?> "
        } else {
            "pocket-agent> "
        };

        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match line {
                    "/quit" | "/exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    "/stats" => {
                        println!("{}", bot.telemetry().stats());
                        continue;
                    }
                    "/help" => {
                        print_help();
                        continue;
                    }
                    _ => {}
                }

                if let Err(e) = bot.adapter().handle_event(console.inbound(line)).await {
                    eprintln!("Error: {}\n", e);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    println!("\nSession summary: {}", bot.telemetry().stats());

    Ok(())
}
