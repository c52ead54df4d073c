// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use agentlink::config::{Config, LogFormat};

#[tokio::main]
async fn main() {
    let config = Config::parse();
    agentlink::ensure_crypto();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    if let Err(e) = agentlink::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
