//! AgroTech Gateway Binary
//!
//! Standalone WebSocket gateway for the crop assessment agents.
//!
//! # Usage
//! ```bash
//! agrotech-gateway [--port 8000] [--host 0.0.0.0] [--config gateway.json] [--verbose]
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use agrotech_gateway::{Gateway, GatewayConfig};

/// AgroTech Gateway - Multi-Agent Crop Monitoring over WebSocket
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides config and AGROTECH_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config and AGROTECH_HOST)
    #[arg(long)]
    host: Option<String>,

    /// JSON configuration file; environment variables are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ollama server root (overrides OLLAMA_URL)
    #[arg(long)]
    ollama_url: Option<String>,

    /// Text model (overrides OLLAMA_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(args.verbose)
        .init();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GatewayConfig::from_env().context("Invalid environment configuration")?,
    };
    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(url) = args.ollama_url {
        config = config.with_ollama_url(url);
    }
    if let Some(model) = args.model {
        config = config.with_model(model);
    }

    if let Some(path) = args.dump_config {
        config
            .to_file(&path)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    print_banner(&config);

    let gateway = Gateway::new(config).context("Failed to initialise gateway")?;
    let state = gateway.state();
    let shutdown_tx = state.shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    gateway.start().await.context("Gateway stopped with an error")?;

    Ok(())
}

fn print_banner(config: &GatewayConfig) {
    println!();
    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║                                                               ║");
    println!("║            🌾  AGROTECH AI — CROP MONITORING AGENTS  🌾         ║");
    println!("║                                                               ║");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();
    println!("📡 WebSocket Server");
    println!("   └─ ws://{}:{}/ws", config.host, config.port);
    println!();
    println!("🔗 HTTP Endpoints");
    println!("   ├─ GET  /         — Service info");
    println!("   ├─ GET  /health   — Ollama reachability");
    println!("   ├─ GET  /status   — Active sessions");
    println!("   └─ WS   /ws       — Scenario analysis stream");
    println!();
    println!("🤖 Inference");
    println!("   ├─ Ollama: {}", config.ollama.url);
    println!("   ├─ Text model: {}", config.ollama.model);
    println!("   └─ Vision model: {}", config.ollama.vision_model);
    println!();
    println!("─────────────────────────────────────────────────────────────────");
    println!("Press Ctrl+C to stop the gateway");
    println!();
}
