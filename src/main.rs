mod buttons;
mod commands;
mod export;
mod gateway;
mod handshake;
mod reply;
mod tasks;

use clap::{Parser, Subcommand};
use coachline_channels::telegram::TelegramChannel;
use coachline_core::{
    config::{self, shellexpand},
    context::Context,
    model::Role,
    traits::{Channel, Provider},
};
use coachline_providers::{anthropic::AnthropicProvider, openai::OpenAiProvider};
use coachline_store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "coachline",
    version,
    about = "Coachline: trainers, clients and their daily habits, over chat"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot.
    Start,
    /// Check configuration, store and classifier availability.
    Status,
    /// Run the intent classifier once on a message and print its decision.
    Classify {
        /// Role the message is classified for.
        #[arg(long, default_value = "client")]
        role: String,
        /// The message to classify.
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    // Stderr plus a daily-rotated file under the data dir.
    let log_dir = std::path::PathBuf::from(shellexpand(&cfg.coachline.data_dir)).join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let (file_writer, _log_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "coachline.log"));
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.coachline.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    match cli.command {
        Commands::Start => {
            let provider = build_provider(&cfg)?;
            if let Some(p) = &provider {
                if !p.is_available().await {
                    tracing::warn!(
                        "classifier '{}' is not available; free text gets the generic reply",
                        p.name()
                    );
                }
            }

            let mut channels: HashMap<String, Arc<dyn Channel>> = HashMap::new();
            if let Some(ref tg) = cfg.channel.telegram {
                if tg.enabled {
                    if tg.bot_token.is_empty() {
                        anyhow::bail!(
                            "Telegram is enabled but bot_token is empty. Set it in config.toml."
                        );
                    }
                    channels.insert("telegram".to_string(), Arc::new(TelegramChannel::new(tg.clone())));
                }
            }
            if channels.is_empty() {
                anyhow::bail!("No channels enabled. Enable at least one channel in config.toml.");
            }

            let store = Store::new(&cfg.store).await?;
            let exporter = Arc::new(export::CsvExporter::new(&cfg.export.dir));

            println!("{} - starting...", cfg.coachline.name);
            let gw = gateway::Gateway::new(&cfg, store, provider, channels, exporter)?;
            Arc::new(gw).run().await?;
        }
        Commands::Status => {
            println!("{} - status\n", cfg.coachline.name);
            println!("Config: {}", cli.config);
            println!("Classifier: {}", cfg.provider.default);

            let store = Store::new(&cfg.store).await?;
            println!(
                "Store: {} ({} bytes)",
                shellexpand(&cfg.store.db_path),
                store.db_size().await?
            );

            match build_provider(&cfg)? {
                Some(p) => println!(
                    "  {}: {}",
                    p.name(),
                    if p.is_available().await {
                        "available"
                    } else {
                        "unavailable"
                    }
                ),
                None => println!("  no classifier, free text gets the generic reply"),
            }

            if let Some(ref tg) = cfg.channel.telegram {
                println!(
                    "  telegram: {}",
                    if tg.enabled && !tg.bot_token.is_empty() {
                        "configured"
                    } else if tg.enabled {
                        "enabled but missing bot_token"
                    } else {
                        "disabled"
                    }
                );
            } else {
                println!("  telegram: not configured");
            }
        }
        Commands::Classify { role, text } => {
            if text.is_empty() {
                anyhow::bail!("no message provided. Usage: coachline classify <message>");
            }
            let role = Role::parse(&role)
                .ok_or_else(|| anyhow::anyhow!("role must be 'trainer' or 'client', got '{role}'"))?;
            let Some(provider) = build_provider(&cfg)? else {
                anyhow::bail!("no classifier configured (provider.default = \"none\")");
            };

            let registry =
                commands::CommandRegistry::new(commands::COMMANDS, &tasks::forms::BuiltinForms)?;
            let system = gateway::classifier_prompt(role, &registry.describe(role), &[]);
            let mut context = Context::new(&system, &text.join(" "));
            context.model = cfg.intent.model.clone();

            let response =
                tokio::time::timeout(cfg.intent.timeout(), provider.complete(&context))
                    .await
                    .map_err(|_| {
                        anyhow::anyhow!("classifier timed out after {}s", cfg.intent.timeout_secs)
                    })??;
            match gateway::parse_classification(&response.text) {
                Some(gateway::Intent::StartTask {
                    command,
                    confidence,
                }) => println!("task {command} (confidence {confidence:.2})"),
                Some(gateway::Intent::Conversation { reply }) => {
                    println!("conversation: {}", reply.unwrap_or_default())
                }
                None => println!("unparseable: {}", response.text),
            }
        }
    }

    Ok(())
}

/// Build the configured classifier backend. `None` when set to "none".
fn build_provider(cfg: &config::Config) -> anyhow::Result<Option<Arc<dyn Provider>>> {
    match cfg.provider.default.as_str() {
        "none" => Ok(None),
        "anthropic" => {
            let ac = cfg
                .provider
                .anthropic
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("provider.anthropic section missing"))?;
            Ok(Some(Arc::new(AnthropicProvider::from_config(
                ac.api_key.clone(),
                ac.model.clone(),
            ))))
        }
        "openai" => {
            let oc = cfg
                .provider
                .openai
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("provider.openai section missing"))?;
            Ok(Some(Arc::new(OpenAiProvider::from_config(
                oc.base_url.clone(),
                oc.api_key.clone(),
                oc.model.clone(),
            ))))
        }
        other => anyhow::bail!("unsupported provider: {other}"),
    }
}
