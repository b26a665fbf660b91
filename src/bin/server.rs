//! classroom-server: the HTTP API over PostgreSQL (or an in-memory store with `--memory`).

use clap::Parser;
use classroom_api::{app, AppState, MemoryStore, PgStore, Settings};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "classroom-server", version, about = "Classroom REST API")]
struct Args {
    /// Serve from an in-memory store instead of PostgreSQL. Data is lost on exit.
    #[arg(long)]
    memory: bool,
    /// Overrides BIND_ADDR.
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("classroom_api=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;

    let state = if args.memory {
        tracing::warn!("using in-memory store");
        AppState::new(MemoryStore::new())
    } else {
        AppState::new(PgStore::connect(&settings).await?)
    };

    let router = app(state, settings.body_limit);
    let listener = TcpListener::bind(args.bind.unwrap_or(settings.bind_addr)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
