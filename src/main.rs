// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use webfetch_proxy::{api::start_server, proxy::ProxyConfig, version};

/// Mediating HTTP fetch proxy
#[derive(Parser, Debug)]
#[command(name = "webfetch-proxy")]
#[command(version = version::VERSION)]
#[command(about = "HTTP fetch proxy with caching, rate limiting and domain policy", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, short, env = "WEBFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides the config file
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let mut config = ProxyConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!("Starting {}", version::get_version_string());
    tracing::debug!("Effective configuration: {:?}", config.sanitized());

    start_server(config).await
}
