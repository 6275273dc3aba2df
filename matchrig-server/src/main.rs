use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod context;
mod control;
mod platform;
mod server;

#[derive(Parser, Debug, Clone)]
#[command(name = "matchrig")]
#[command(author, version, about = "MatchRig - multi-account match orchestration server")]
pub struct Args {
    /// Path to the JSON config file (defaults are used if it does not exist)
    #[arg(long, default_value = "matchrig.json")]
    pub config: String,

    /// Override the telemetry bind address from the config
    #[arg(long)]
    pub bind: Option<String>,

    /// Start searching automatically once enough clients are arranged
    #[arg(long, default_value = "false")]
    pub auto_search: bool,
}

fn init_tracing() {
    // Route log-crate records from dependencies through tracing first.
    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::from_default_env()
        .add_directive("matchrig=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub)
        .expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    info!("MatchRig starting. config={}, auto_search={}", args.config, args.auto_search);

    if let Err(e) = server::run_server(args).await {
        error!("Server error: {:?}", e);
    }

    info!("Main finished. Goodbye!");
    Ok(())
}
