use std::net::SocketAddr;

use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fluxo_rs::{AppState, build_router, graceful_shutdown};

/// The REST API server for the fluxo cash-flow ledger.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The secret used to sign and verify auth tokens.
    #[arg(long, env = "FLUXO_SECRET", hide_env_values = true)]
    secret: String,

    /// The address to bind the server to.
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .expect("Could not parse the bind address");

    let connection = Connection::open(&args.db_path).expect("Could not open the database file");
    let state =
        AppState::new(connection, &args.secret).expect("Could not initialize the database");

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    tracing::info!("HTTP server listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(build_router(state).into_make_service())
        .await
        .expect("Server stopped unexpectedly");
}
