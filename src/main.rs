use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use runbridge::{
    builder::{build_app, serve},
    config::{BridgeConfig, DEFAULT_SCROLLBACK_LINES},
    console::run_remote,
    protocol, RunRequest,
};
use std::path::PathBuf;
use tokio::net::TcpListener;

const DEFAULT_LOG_FILTER: &str = "runbridge=info,tower_http=info,hyper=off,tokio=off";

/// Run allow-listed scripts over WebSocket and stream their output
#[derive(Parser, Debug)]
#[command(name = "runbridge", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the bridge server (default)
    Serve(ServeArgs),
    /// Run one script through a bridge and print its output
    Run(RunArgs),
    /// Print the JSON schema of the wire protocol
    Schema,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config
    #[arg(short, long)]
    bind: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Script name or path as listed by the server
    path: String,

    /// Parameter string, split with shell quoting rules
    #[arg(short, long)]
    params: Option<String>,

    /// Sub-function passed as the first argument
    #[arg(short, long)]
    function: Option<String>,

    /// Bridge WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:4444/ws")]
    url: String,
}

fn init_tracing(configured: Option<&str>) {
    // RUST_LOG wins, then the config file, then the built-in default
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(configured.unwrap_or(DEFAULT_LOG_FILTER))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (silently ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => run_server(args).await,
        Command::Run(args) => {
            init_tracing(Some("runbridge=warn"));
            let request = RunRequest {
                path: args.path,
                params: args.params,
                function: args.function,
            };
            let scrollback = BridgeConfig::discover(None)
                .map(|config| config.scrollback_lines)
                .unwrap_or(DEFAULT_SCROLLBACK_LINES);
            let outcome = run_remote(&args.url, request, scrollback).await?;
            std::process::exit(outcome.process_exit_code());
        }
        Command::Schema => {
            let schema = protocol::schema()?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = BridgeConfig::discover(args.config.as_deref())?;
    config.apply_env_overrides();
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    config.validate()?;

    init_tracing(config.log_filter.as_deref());

    let addr = config.bind_addr()?;
    tracing::info!("Allow-listed scripts ({}):", config.scripts.len());
    let app = build_app(&config);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Script bridge started at http://{}", addr);
    tracing::info!("WebSocket endpoint: ws://{}/ws", addr);
    if !addr.ip().is_loopback() {
        tracing::warn!("Listening on a non-loopback address; any client that can reach it may run the allow-listed scripts");
    }

    serve(listener, app, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    })
    .await?;

    Ok(())
}
