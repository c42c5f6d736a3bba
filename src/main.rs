mod config;
mod engine;
mod error;
mod linear_engine;
mod types;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    response::Json,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use engine::Engine;
use error::PredictError;
use linear_engine::{LinearConfig, LinearEngine};
use types::{FeatureRow, PredictResponse};

pub const HOME_MESSAGE: &str = "Breast Cancer Detection API is running.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!("Starting inference server with config: {:?}", config);

    if config.model_id.is_none() && config.model_path.is_none() {
        anyhow::bail!("Either --model-id or --model-path must be provided");
    }

    let linear_config = LinearConfig {
        model_id: config.model_id.clone(),
        model_path: config.model_path.clone(),
        revision: config.model_revision.clone(),
        cpu: config.cpu_only,
        id2label: config.parse_id2label(),
    };

    tracing::info!("Loading classifier...");
    let engine = LinearEngine::new(linear_config).await?;
    tracing::info!(num_features = engine.num_features(), "Model loaded successfully");

    let app = app_with_metrics(AppState::new(Arc::new(engine)));

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// [`app`] with `/metrics` and the Prometheus request layer.
///
/// Installs the global metrics recorder, so call it at most once per process.
fn app_with_metrics(state: AppState) -> Router {
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let metrics = Router::new().route("/metrics", get(|| async move { metric_handle.render() }));
    app(state, metrics).layer(prometheus_layer)
}

/// Inference routes plus any stateless `extra` routes, all behind the CORS and
/// trace layers.
fn app(state: AppState, extra: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(home_handler))
        .route("/predict", post(predict_handler))
        .with_state(state)
        .merge(extra)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

#[derive(Clone)]
struct AppState {
    engine: Arc<dyn Engine + Send + Sync>,
}

impl AppState {
    fn new(engine: Arc<dyn Engine + Send + Sync>) -> Self {
        Self { engine }
    }
}

async fn home_handler() -> &'static str {
    HOME_MESSAGE
}

#[tracing::instrument(skip(state, body), fields(features = tracing::field::Empty))]
async fn predict_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PredictResponse>, PredictError> {
    counter!("prediction_requests_total").increment(1);

    let result = predict(&state, &body).await;
    match &result {
        Ok(prediction) => {
            let label = prediction.prediction;
            let name = state.engine.label_name(label).unwrap_or("unknown");
            counter!("predictions_total", "label" => label.to_string()).increment(1);
            tracing::debug!(label, label_name = name, "Prediction completed");
        }
        Err(e) => {
            counter!("prediction_errors_total", "kind" => e.kind()).increment(1);
            match e {
                PredictError::InvalidInput => tracing::warn!("Rejected predict request: {}", e),
                PredictError::Execution(_) => tracing::error!(error = %e, "Prediction failed"),
            }
        }
    }

    result.map(Json)
}

/// Decode the body, reshape `features` into one row and run the classifier.
///
/// The body is decoded by hand rather than through `Json<T>` so that a
/// wrongly typed `features` field maps to a 400 while an undecodable body
/// or a non-numeric feature still lands in the 500 path.
async fn predict(state: &AppState, body: &[u8]) -> Result<PredictResponse, PredictError> {
    let body: Value =
        serde_json::from_slice(body).map_err(|e| anyhow::anyhow!("Failed to decode JSON object: {e}"))?;
    let row = FeatureRow::from_body(&body)?;
    tracing::Span::current().record("features", row.len());
    let prediction = state.engine.predict(row).await?;
    Ok(PredictResponse { prediction })
}
