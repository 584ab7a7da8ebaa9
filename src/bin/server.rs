use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    extract::{MatchedPath, Request},
};
use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use pocketbook::{AppState, build_router, db, graceful_shutdown, provider::HttpProviderClient};

/// The sync API server for pocketbook.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// Base URL of the account-aggregation provider API.
    #[arg(long)]
    provider_url: String,

    /// Seconds to wait on a provider fetch before failing the sync run.
    #[arg(long, default_value_t = 30)]
    provider_timeout: u64,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();
    let provider_timeout = Duration::from_secs(args.provider_timeout);

    let provider = HttpProviderClient::new(&args.provider_url, provider_timeout)
        .expect("Could not create provider client");

    let connection = Connection::open(&args.db_path).expect("Could not open database");
    db::initialize(&connection).expect("Could not initialize database");

    let mut state = AppState::new(Arc::new(Mutex::new(connection)), Arc::new(provider));
    state.provider_timeout = provider_timeout;

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(build_router(state));
    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    tracing::info!("sync API listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .expect("Server stopped unexpectedly");
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty().with_filter(filter))
        .init();
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // Run-level sync errors are logged where they happen, so the default
        // 5xx failure logging would duplicate them.
        .on_failure(());

    router.layer(tracing_layer)
}
