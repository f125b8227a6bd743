//! Local Ludo server for development.
//!
//! Players authenticate with the static tokens from the `[tokens]` table
//! of the config file. Wallets live in memory and vanish on exit.
//!
//! ```text
//! cargo run -p dev-server -- --config demos/dev-server/ludo.toml
//! RUST_LOG=ludo_room=debug cargo run -p dev-server
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use ludo_server::prelude::*;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dev-server", about = "Run a local Ludo server")]
struct Args {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `bind_addr` from the config and the environment.
    #[arg(short, long)]
    bind: Option<String>,

    /// Extra `token=user` pairs, on top of the config's `[tokens]`.
    #[arg(short, long = "token", value_parser = parse_token)]
    tokens: Vec<(String, String)>,
}

/// The part of the config file only this binary reads.
#[derive(Debug, Default, Deserialize)]
struct DevTokens {
    #[serde(default)]
    tokens: HashMap<String, String>,
}

fn parse_token(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((token, user)) if !token.is_empty() && !user.is_empty() => {
            Ok((token.to_string(), user.to_string()))
        }
        _ => Err(format!("expected token=user, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (mut config, mut tokens) = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let dev: DevTokens = toml::from_str(&raw)?;
            (ServerConfig::load(path)?, dev.tokens)
        }
        None => (ServerConfig::default().with_env_overrides(), HashMap::new()),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    tokens.extend(args.tokens);
    if tokens.is_empty() {
        tokens.insert("dev-token".to_string(), "dev".to_string());
    }

    let auth: StaticTokenAuthenticator = tokens
        .into_iter()
        .map(|(token, user)| (token, UserId::new(user)))
        .collect();
    let wallet = InMemoryWallet::new();

    let server = LudoServerBuilder::new()
        .config(config)
        .build(auth, wallet)
        .await?;
    info!(addr = %server.local_addr()?, "dev server listening");

    server.run().await?;
    Ok(())
}
