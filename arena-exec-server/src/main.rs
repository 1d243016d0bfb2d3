use arena_exec::{sweep_orphans, LimitsConfig, ServiceConfig};
use arena_exec_server::{create_app, run_server};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Maximum number of concurrent executions
    #[arg(short, long, default_value = "10")]
    max_concurrent: usize,

    /// How long a request may queue for a slot, milliseconds
    #[arg(long, default_value = "2000")]
    queue_wait_ms: u64,

    /// Run-phase wall-clock limit, milliseconds
    #[arg(long, default_value = "5000")]
    run_timeout_ms: u64,

    /// Compile-phase wall-clock limit, milliseconds
    #[arg(long, default_value = "10000")]
    compile_timeout_ms: u64,

    /// Memory limit per execution, bytes
    #[arg(long, default_value = "268435456")] // 256MB
    memory_limit: u64,

    /// Cap on each of stdout/stderr, bytes
    #[arg(long, default_value = "65536")] // 64KB
    max_output_bytes: usize,

    /// Maximum accepted source size, bytes
    #[arg(long, default_value = "65536")] // 64KB
    max_source_bytes: usize,

    /// Maximum accepted stdin size, bytes
    #[arg(long, default_value = "65536")] // 64KB
    max_stdin_bytes: usize,

    /// Directory workspaces are created under
    #[arg(long)]
    workspace_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = ServiceConfig {
        max_concurrent: args.max_concurrent,
        queue_wait_ms: args.queue_wait_ms,
        max_source_bytes: args.max_source_bytes,
        max_stdin_bytes: args.max_stdin_bytes,
        workspace_root: args
            .workspace_root
            .unwrap_or_else(|| ServiceConfig::default().workspace_root),
    };
    let limits = LimitsConfig {
        compile_timeout_ms: args.compile_timeout_ms,
        run_timeout_ms: args.run_timeout_ms,
        memory_limit_bytes: args.memory_limit,
        max_output_bytes: args.max_output_bytes,
        ..LimitsConfig::default()
    };

    // Crash backstop: reclaim workspaces a previous run left behind
    sweep_orphans(&config.workspace_root);

    let app = create_app(config, limits);
    run_server(app, args.addr).await?;

    Ok(())
}
