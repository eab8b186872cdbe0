//! Correlation ID service entry point
//!
//! Serves the demo endpoints, or inspects how incoming IDs and settings
//! would be handled.

use clap::{Parser, Subcommand};
use correlation_id::{
    detect_tracker, init_tracing, CorrelationIdLayer, CorrelationSettings, IdResolver,
};
use correlation_id_server::{create_router, register_tasks, AppState, ChainCollector};
use correlation_id_tasks::{TaskQueue, TaskRegistry, TaskSignals};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "correlation-id-server")]
#[command(about = "Correlation ID propagation from HTTP requests into background tasks")]
#[command(version)]
struct Cli {
    /// Settings file (TOML); environment variables are used when omitted
    #[arg(short, long, global = true, env = "CORRELATION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080", env = "PORT")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },

    /// Resolve a header value the way the middleware would
    Resolve {
        /// Incoming header value; omit to simulate a missing header
        value: Option<String>,

        /// Accept any non-empty value
        #[arg(long)]
        no_validate: bool,
    },

    /// Print the effective settings as TOML
    Config,
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<CorrelationSettings> {
    let settings = match path {
        Some(path) => CorrelationSettings::from_file(path)?,
        None => CorrelationSettings::from_env(),
    };
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { port, host } => {
            init_tracing(&settings.logging)?;

            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            let tracker = detect_tracker();
            let correlation = CorrelationIdLayer::from_settings(&settings.http)?;

            let chains = ChainCollector::new();
            let mut registry = TaskRegistry::new();
            register_tasks(&mut registry, chains.clone());
            let signals = TaskSignals::from_settings_with_generator(
                &settings.tasks,
                tracker,
                correlation.resolver().generator(),
            );
            let queue = TaskQueue::new(registry, signals);
            let workers = queue.spawn_workers(settings.tasks.workers);

            let state = Arc::new(
                AppState::new(queue.clone(), chains)
                    .with_header_name(correlation.header_name().clone()),
            );
            let router = create_router(state, correlation);

            tracing::info!("Starting correlation ID service on {}", addr);
            tracing::info!(
                header = %settings.http.header_name,
                workers = settings.tasks.workers,
                "Propagating correlation IDs"
            );

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;

            tracing::info!("Shutting down task workers");
            queue.shutdown();
            for worker in workers {
                worker.await?;
            }
        }

        Commands::Resolve { value, no_validate } => {
            let resolver = if no_validate || !settings.http.validate_uuid {
                IdResolver::new().without_validation()
            } else {
                IdResolver::new()
            };
            let resolution = resolver.resolve(value.as_deref());

            let output = serde_json::json!({
                "id": resolution.id,
                "source": resolution.source.label(),
                "rejected": value.filter(|_| resolution.was_rejected()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Config => {
            print!("{}", settings.to_toml_string()?);
        }
    }

    Ok(())
}
