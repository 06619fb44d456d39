use std::error::Error;
use std::future::IntoFuture;
use std::process::exit;

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use azure_cost_exporter::azure::{AzureCostClient, TransportError};
use azure_cost_exporter::config::Config;
use azure_cost_exporter::core::poll::Poller;
use azure_cost_exporter::output::prometheus::{PrometheusSink, CONTENT_TYPE};
use log::{error, info};

mod args;

#[derive(Clone)]
struct AppState {
    sink: PrometheusSink,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = args::parse();
    env_logger::Builder::new()
        .filter_level(args.loglevel.filter())
        .parse_default_env()
        .init();

    let config = Config::load(&args.config).unwrap_or_else(|e| {
        error!("Azure Cost Exporter config error: {e}");
        exit(1);
    });
    let token = Config::access_token().unwrap_or_else(|e| {
        error!("{e}");
        exit(1);
    });
    let sink = PrometheusSink::new(config.label_schema())?;

    info!("Starting HTTP server at {}", config.exporter_port);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.exporter_port)).await?;

    let poll_sink = sink.clone();
    let endpoint = config.azure_management_endpoint.clone();
    let target = config.target();
    let grouping = config.group_by.clone();
    let interval = config.polling_interval();
    // The query client blocks for the whole cycle, keep it off the async workers.
    let poller = tokio::task::spawn_blocking(move || -> Result<(), TransportError> {
        let client = AzureCostClient::new(&endpoint, token)?;
        Poller::new(client, poll_sink, target, grouping, interval).run()
    });

    let app = Router::new()
        .route("/", get(metrics))
        .route("/metrics", get(metrics))
        .route("/health", get(healthcheck))
        .with_state(AppState { sink });

    tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            if let Err(e) = served {
                error!("HTTP server stopped: {e}");
                exit(1);
            }
        }
        polled = poller => {
            if let Err(e) = polled? {
                error!("cannot start the Azure cost client: {e}");
                exit(1);
            }
        }
    }
    Ok(())
}

async fn metrics(State(state): State<AppState>) -> Result<Response, String> {
    let body = state
        .sink
        .render()
        .map_err(|e| format!("Could not encode metrics: {e}"))?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE))],
        body,
    )
        .into_response())
}

async fn healthcheck() -> &'static str {
    "OK"
}
