#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unnecessary_wraps,
    dead_code
)]

use anyhow::{bail, Result};
use chatdesk::gateway::{self, AppState};
use chatdesk::{observability, providers, Config};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Opening request sent before the first user turn; not recorded in history.
const GREETING_PROMPT: &str =
    "Hello there. Please introduce yourself and state how you can help me.";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// `chatdesk` - customer-support chat sessions over a hosted completion model.
#[derive(Parser, Debug)]
#[command(name = "chatdesk")]
#[command(version)]
#[command(about = "Customer-support chat gateway with per-session transcripts.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP chat gateway
    #[command(long_about = "\
Start the HTTP chat gateway.

Serves POST /api/chat and POST /api/save_log/{session_id}. Bind address \
defaults to the values in your config file (gateway.host / gateway.port).

Examples:
  chatdesk serve                  # use config defaults
  chatdesk serve -p 8080          # listen on port 8080
  chatdesk serve --host 0.0.0.0   # bind to all interfaces
  chatdesk serve -p 0             # random available port")]
    Serve {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Chat with the assistant in the terminal
    #[command(long_about = "\
Chat with the assistant in the terminal.

Type 'exit' to end the conversation; the session transcript is saved \
to the configured log directory on exit.

Examples:
  chatdesk chat
  chatdesk chat --session support_42")]
    Chat {
        /// Session id to use; generated when omitted
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Show resolved configuration
    Status,

    /// List supported completion providers
    Providers,

    /// Manage configuration
    #[command(long_about = "\
Manage chatdesk configuration.

Use 'schema' to dump the full JSON Schema for the config file, which \
documents every available key, type, and default value.

Examples:
  chatdesk config schema              # print JSON Schema to stdout
  chatdesk config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `chatdesk`.

The script is printed to stdout so it can be sourced directly:

Examples:
  source <(chatdesk completions bash)
  chatdesk completions zsh > ~/.zfunc/_chatdesk
  chatdesk completions fish > ~/.config/fish/completions/chatdesk.fish")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var("CHATDESK_CONFIG_DIR", config_dir);
    }

    // Completions and schema must remain stdout-only and should not load config or initialize logging.
    match &cli.command {
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout().lock();
            write_shell_completion(*shell, &mut stdout)?;
            return Ok(());
        }
        Commands::Config {
            config_command: ConfigCommands::Schema,
        } => {
            let schema = schemars::schema_for!(Config);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load_or_init().await?;
    observability::init_tracing(&config.observability, config.log_file_path().as_deref())?;

    match cli.command {
        Commands::Completions { .. } | Commands::Config { .. } => unreachable!(),

        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting chatdesk gateway on {host} (random port)");
            } else {
                info!("Starting chatdesk gateway on {host}:{port}");
            }
            gateway::run_gateway(&host, port, config).await
        }

        Commands::Chat { session } => run_chat(config, session).await,

        Commands::Status => {
            print_status(&config);
            Ok(())
        }

        Commands::Providers => {
            let providers = providers::list_providers();
            let current = config.provider_name().trim().to_ascii_lowercase();
            println!("Supported providers ({} total):\n", providers.len());
            println!("  ID (use in config)  DESCRIPTION");
            println!("  ------------------- -----------");
            for p in &providers {
                let is_active = p.name.eq_ignore_ascii_case(&current)
                    || p.aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(&current));
                let marker = if is_active { " (active)" } else { "" };
                let aliases = if p.aliases.is_empty() {
                    String::new()
                } else {
                    format!("  (aliases: {})", p.aliases.join(", "))
                };
                println!(
                    "  {:<19} {}{}{}  [default model: {}]",
                    p.name, p.display_name, marker, aliases, p.default_model
                );
            }
            Ok(())
        }
    }
}

fn print_status(config: &Config) {
    println!("chatdesk status");
    println!();
    println!("Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("Config:      {}", config.config_path.display());
    println!();
    println!("Provider:    {}", config.provider_name());
    println!("  Model:       {}", config.model_name());
    println!("  Temperature: {}", config.default_temperature);
    println!(
        "  API key:     {}",
        if config.api_key.is_some() { "set in config/env" } else { "from provider env (if any)" }
    );
    println!(
        "  Reliability: timeout {}s, {} retries, {}ms backoff",
        config.reliability.request_timeout_secs,
        config.reliability.max_retries,
        config.reliability.base_backoff_ms
    );
    println!();
    println!("Gateway:     {}:{}", config.gateway.host, config.gateway.port);
    println!();
    println!("Sessions:");
    println!("  History kept:    {}", config.sessions.max_history_messages);
    println!("  Prompt window:   {}", config.sessions.prompt_history_window);
    println!("  Transcripts:     {}", config.log_dir().display());
    println!(
        "  Persona:         {}",
        config
            .persona_path()
            .map_or_else(|| "(built-in)".to_string(), |p| p.display().to_string())
    );
    println!(
        "  Log file:        {}",
        config
            .log_file_path()
            .map_or_else(|| "(disabled)".to_string(), |p| p.display().to_string())
    );
}

/// Terminal conversation: greeting, then one turn per input line until `exit`.
async fn run_chat(config: Config, session_id: Option<String>) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    let assistant = config.sessions.assistant_name.as_str();
    let handle = state.sessions.create(session_id.as_deref()).await?;

    println!("Type 'exit' to end\n");
    {
        let session = handle.lock().await;
        let welcome = state.chat.generate(&session, GREETING_PROMPT).await;
        println!("{assistant}: {welcome}");
        info!(session_id = %session.id(), "Chat session started");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let input = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read input: {e}");
                break;
            }
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        let mut session = handle.lock().await;
        let reply = state.chat.respond(&mut session, input).await;
        println!("{assistant}: {}", reply.response);
    }

    println!("{assistant}: Goodbye! Thank you for chatting with us.");
    let session = handle.lock().await;
    match state.logger.save(&session).await {
        Some(path) => println!("Session log saved to {}", path.display()),
        None => eprintln!("Session log could not be saved; see the log for details."),
    }
    Ok(())
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}
