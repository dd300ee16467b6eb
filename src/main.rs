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
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use tracing_subscriber::{fmt, EnvFilter};

use panelbot::backend::create_resource_client;
use panelbot::config::{resolve_config_path, Config};
use panelbot::security::{redact, redact_opt};
use panelbot::ConfigCommands;

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

/// `panelbot` - chat console for a remote panel backend.
#[derive(Parser, Debug)]
#[command(name = "panelbot")]
#[command(version)]
#[command(about = "Chat-driven admin console for a remote panel backend.", long_about = None)]
struct Cli {
    /// Config file path (overrides PANELBOT_CONFIG)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the console (chat polling, routing, session sweeper)
    #[command(long_about = "\
Start the console.

Long-polls the chat platform for operator events, routes each one \
through the admin gate and the console state machine, and replies \
with the rendered view. Idle sessions are swept in the background.

Examples:
  panelbot run
  panelbot --config ./panelbot.toml run
  RUST_LOG=panelbot=debug panelbot run")]
    Run,

    /// Check backend reachability once, path by path
    Probe,

    /// Show the effective configuration with secrets redacted
    Status,

    /// Manage configuration
    #[command(long_about = "\
Inspect configuration.

Use 'schema' to dump the full JSON Schema for the config file, which \
documents every available key, type, and default value.

Examples:
  panelbot config schema              # print JSON Schema to stdout
  panelbot config schema > schema.json
  panelbot config path")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `panelbot`.

The script is printed to stdout so it can be sourced directly:

Examples:
  source <(panelbot completions bash)
  panelbot completions zsh > ~/.zfunc/_panelbot
  panelbot completions fish > ~/.config/fish/completions/panelbot.fish")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config) = &cli.config {
        if config.trim().is_empty() {
            bail!("--config cannot be empty");
        }
    }

    // Completions must remain stdout-only and should not load config or initialize logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let explicit = cli.config.as_deref();
    match cli.command {
        Commands::Completions { .. } => Ok(()),

        Commands::Run => {
            let config = Config::load(explicit).await?;
            panelbot::runtime::run(config).await
        }

        Commands::Probe => {
            let config = load_unvalidated(explicit).await?;
            let client = create_resource_client(&config.backend)?;
            println!("Backend: {}", config.backend.base_url);
            let mut reachable = false;
            for path in client.probe_paths() {
                match client.probe_path(path).await {
                    Ok(()) => {
                        reachable = true;
                        println!("  ✅ {path}");
                    }
                    Err(err) => println!("  ❌ {path}  ({err})"),
                }
            }
            if !reachable {
                bail!("backend unreachable on every probe path");
            }
            println!("Reachable.");
            Ok(())
        }

        Commands::Status => {
            let config = load_unvalidated(explicit).await?;
            print_status(&config);
            if let Err(err) = config.validate() {
                println!();
                println!("⚠️  Config is not runnable: {err}");
            }
            Ok(())
        }

        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => {
                let schema = schemars::schema_for!(Config);
                println!("{}", serde_json::to_string_pretty(&schema)?);
                Ok(())
            }
            ConfigCommands::Path => {
                println!("{}", resolve_config_path(explicit)?.display());
                Ok(())
            }
        },
    }
}

/// Parse the config file and apply env overrides, without the startup checks.
async fn load_unvalidated(explicit: Option<&str>) -> Result<Config> {
    let path = resolve_config_path(explicit)?;
    let mut config = Config::load_file(&path).await?;
    config.apply_env_overrides()?;
    Ok(config)
}

fn print_status(config: &Config) {
    println!("🛠  panelbot status");
    println!();
    println!("Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("Config:      {}", config.config_path.display());
    println!(
        "Admins:      {}",
        if config.admin_ids.is_empty() {
            "(none)".to_string()
        } else {
            config
                .admin_ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    println!();
    println!("Backend:");
    println!("  URL:               {}", config.backend.base_url);
    println!("  Token:             {}", redact_opt(config.backend.api_token.as_deref()));
    println!(
        "  Timeouts:          request {}s, connect {}s, probe {}s",
        config.backend.request_timeout_secs,
        config.backend.connect_timeout_secs,
        config.backend.probe_timeout_secs
    );
    println!("  Probe paths:       {}", config.backend.probe_paths.join(", "));
    for (name, value) in &config.backend.forwarded_headers {
        println!("  Header:            {name}: {value}");
    }
    println!();
    println!("Bot:");
    println!("  API:               {}", config.bot.api_url);
    println!(
        "  Token:             {}",
        config.bot.token.as_deref().map_or_else(|| "(not set)".to_string(), redact)
    );
    println!("  Poll timeout:      {}s", config.bot.poll_timeout_secs);
    println!();
    println!("Console:");
    println!("  Page size:         {}", config.console.page_size);
    println!("  Label max chars:   {}", config.console.label_max_chars);
    println!("  Default expiry:    {} days", config.console.default_expiry_days);
    println!(
        "  Session idle TTL:  {}s (sweep every {}s)",
        config.sessions.idle_ttl_secs, config.sessions.sweep_interval_secs
    );
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name, writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name, writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name, writer),
        CompletionShell::PowerShell => generate(shells::PowerShell, &mut cmd, bin_name, writer),
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}
