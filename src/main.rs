#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::needless_pass_by_value,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ircbot::channels::outbound::{FormatMode, OutboundFormatter};
use ircbot::config::Config;
use ircbot::prompt::{PromptMode, PromptTemplates};
use ircbot::{daemon, providers};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

/// IRC assistant bot that answers chat commands with LLM completions.
#[derive(Parser, Debug)]
#[command(name = "ircbot")]
#[command(version)]
#[command(about = "IRC-over-TLS assistant bot backed by a chat completions API.", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.ircbot/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect, join the configured channels and serve commands until Ctrl-C
    Run,

    /// Load and validate the configuration, then print a summary
    CheckConfig,

    /// Run one completion locally and print the chat lines it would produce
    Ask {
        /// Use the code template and the explanation + code layout
        #[arg(long)]
        code: bool,

        /// Question text
        #[arg(required = true)]
        text: Vec<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load_or_init(),
    }
}

fn print_summary(config: &Config) {
    let irc = &config.irc;
    println!("Config:     {}", config.config_path.display());
    println!("Server:     {}:{} (verify TLS: {})", irc.server, irc.port, irc.verify_tls);
    println!("Nickname:   {} (user {})", irc.nickname, irc.effective_username());
    println!("Channels:   {}", irc.channels.join(", "));
    println!("Provider:   {} model {}", config.provider.base_url, config.provider.model);
    println!(
        "API key:    {}",
        if config.api_key.is_some() { "set" } else { "missing" }
    );
    println!(
        "Limits:     {}/min, {}/day, {}/user/day",
        config.limits.per_minute, config.limits.per_day, config.limits.per_identity_daily
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS.
    // reqwest and tokio-rustls both need a process-level CryptoProvider.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run => {
            config.validate()?;
            daemon::run(config).await
        }

        Commands::CheckConfig => {
            config.validate()?;
            print_summary(&config);
            println!("Configuration OK");
            Ok(())
        }

        Commands::Ask { code, text } => {
            config.validate()?;
            let provider = providers::create_provider(&config)?;
            let templates = PromptTemplates::from(&config.prompts);
            let (mode, layout) = if code {
                (PromptMode::Code, FormatMode::Split)
            } else {
                (PromptMode::Ask, FormatMode::Prose)
            };

            let prompt = templates.render(mode, text.join(" ").trim());
            let reply = provider
                .complete(&prompt)
                .await
                .context("Completion failed")?;

            let formatter = OutboundFormatter::new(&config.irc.nickname, config.irc.max_line_len);
            for chunk in formatter.format(&reply, layout) {
                println!("{}", chunk.line());
            }
            Ok(())
        }
    }
}
