use std::{path::PathBuf, sync::Arc};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod api;
mod config;
mod controller;
mod events;
mod model;
mod prompts;
mod providers;

use config::{AppCfg, ProviderCfg, ProviderKind};
use controller::Controller;
use model::Field;
use providers::{CopyGenerator, GeminiProvider, MockProvider};

#[derive(Parser)]
#[command(name = "adcopy", version, about = "Generate three styles of ad copy from product details")]
struct Cli {
    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the configured provider
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderKind>,
    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Serve the web form (default)
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Generate once from the command line and print the result
    Generate {
        #[arg(long, default_value = "")]
        product_name: String,
        #[arg(long, default_value = "")]
        target_audience: String,
        /// Repeat once per feature
        #[arg(long = "key-feature")]
        key_features: Vec<String>,
        #[arg(long)]
        json: bool,
    },
}

fn build_generator(cfg: &ProviderCfg) -> Arc<dyn CopyGenerator> {
    match cfg.kind {
        ProviderKind::Mock => Arc::new(MockProvider),
        ProviderKind::Gemini => {
            let key = cfg.resolve_api_key(|k| std::env::var(k).ok()).unwrap_or_else(|| {
                tracing::warn!("no Gemini API key found; generation requests will fail until one is set");
                String::new()
            });
            Arc::new(GeminiProvider::new(
                key,
                cfg.model().to_string(),
                cfg.base_url().to_string(),
                cfg.system_instruction().to_string(),
            ))
        }
    }
}

async fn generate_once(
    generator: Arc<dyn CopyGenerator>,
    input: [(Field, String); 3],
    json: bool,
) -> Result<()> {
    let (tx, _rx) = broadcast::channel(16);
    let ctl = Controller::new(Uuid::new_v4(), generator, tx);
    for (field, value) in input {
        ctl.update_field(field, value);
    }
    tracing::debug!(session_id = %ctl.session_id(), "one-shot session");
    ctl.submit()?.finished().await;

    let snap = ctl.snapshot();
    if let Some(message) = snap.generation.error() {
        bail!(message.to_string());
    }
    let Some(copy) = snap.generation.copy() else {
        bail!("generation ended in unexpected state: {:?}", snap.generation.status());
    };
    if json {
        println!("{}", serde_json::to_string_pretty(copy)?);
    } else {
        println!("== Professional ==\n{}\n", copy.professional);
        println!("== Fun & Casual ==\n{}\n", copy.casual);
        println!("== Urgent & Sales ==\n{}", copy.urgent);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = AppCfg::load(cli.config.as_deref()).await?;
    if let Some(kind) = cli.provider {
        cfg.provider.kind = kind;
    }
    let generator = build_generator(&cfg.provider);
    tracing::info!(provider = generator.name(), model = cfg.provider.model(), "provider ready");

    match cli.cmd.unwrap_or(Cmd::Serve { bind: None }) {
        Cmd::Serve { bind } => {
            let ttl = cfg.server.session_ttl();
            api::serve(bind.unwrap_or(cfg.server.bind), ttl, generator).await
        }
        Cmd::Generate { product_name, target_audience, key_features, json } => {
            let input = [
                (Field::ProductName, product_name),
                (Field::TargetAudience, target_audience),
                (Field::KeyFeatures, key_features.join("\n")),
            ];
            generate_once(generator, input, json).await
        }
    }
}
