//! llm-relay - chat-completion relay for OpenRouter and Google Gemini
//!
//! Forwards chat requests to the selected provider, rotating through a pool
//! of API keys, and normalizes the answer into a single response shape.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_relay::config::Config;
use llm_relay::provider::Provider;
use llm_relay::proxy::run_server;

#[derive(Parser)]
#[command(name = "llm-relay")]
#[command(about = "Chat-completion relay for OpenRouter and Google Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file (environment only when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and show credential pools
    Check {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is the normal case in production.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            if let Some(path) = &config {
                tracing::info!(config = %path.display(), "Loading configuration");
            }
            let mut config = Config::load(config.as_deref())?;

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            run_server(config).await
        }

        Commands::Check { config } => {
            let config = Config::load(config.as_deref())?;

            println!("Configuration OK");
            println!("  listen:     {}", config.server.listen);
            println!("  mode:       {}", config.server.mode.as_str());
            println!("  timeout:    {}ms", config.server.timeout_ms);
            println!("  rate limit: {}/min", config.server.rate_limit_per_minute);
            for provider in Provider::ALL {
                let section = config.providers.get(provider);
                println!(
                    "  {:<11} {} key(s) from {}, {}",
                    format!("{}:", provider),
                    section.api_keys.len(),
                    section.key_source,
                    section.base_url
                );
            }
            Ok(())
        }
    }
}
