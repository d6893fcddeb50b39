//! HTTP Server for Visage-DB
//!
//! Exposes the entity store and similarity engine over HTTP using axum.
//!
//! # Endpoints
//!
//! - `POST /add_person` - Register an entity
//! - `GET /get_similar_person` - Top-N most similar entities
//! - `GET /health` - Store size and configuration
//! - `GET /metrics` - Prometheus text counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, RawQuery, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use visage_core::entity::validate_features;
use visage_core::{Entity, SimilarityEngine, StoreError, VectorStore};

use crate::model::{
    AddPersonRequest, ErrorBody, HealthResponse, MatchBody, SimilarPersonsResponse,
    StatusResponse,
};

#[derive(Default)]
pub struct Metrics {
    pub add_total: AtomicU64,
    pub add_rejected_total: AtomicU64,
    pub query_total: AtomicU64,
    pub query_rejected_total: AtomicU64,
}

/// Shared application state
///
/// The store and engine are constructed once at startup and injected here;
/// handlers run store/engine calls on the blocking pool so durability I/O and
/// scoring never stall the async runtime.
pub struct AppState {
    pub store: Arc<VectorStore>,
    pub engine: Arc<SimilarityEngine>,
    pub default_top_n: usize,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(store: Arc<VectorStore>, engine: Arc<SimilarityEngine>, default_top_n: usize) -> Self {
        Self {
            store,
            engine,
            default_top_n,
            metrics: Metrics::default(),
        }
    }

    pub fn render_metrics(&self) -> String {
        format!(
            concat!(
                "# TYPE visage_add_requests_total counter\n",
                "visage_add_requests_total {}\n",
                "# TYPE visage_add_rejected_total counter\n",
                "visage_add_rejected_total {}\n",
                "# TYPE visage_query_requests_total counter\n",
                "visage_query_requests_total {}\n",
                "# TYPE visage_query_rejected_total counter\n",
                "visage_query_rejected_total {}\n",
                "# TYPE visage_entities gauge\n",
                "visage_entities {}\n",
                "# TYPE visage_capacity gauge\n",
                "visage_capacity {}\n"
            ),
            self.metrics.add_total.load(Ordering::Relaxed),
            self.metrics.add_rejected_total.load(Ordering::Relaxed),
            self.metrics.query_total.load(Ordering::Relaxed),
            self.metrics.query_rejected_total.load(Ordering::Relaxed),
            self.store.count(),
            self.store.capacity(),
        )
    }
}

/// POST /add_person - Persist and register an entity
async fn add_person(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AddPersonRequest>, JsonRejection>,
) -> Response {
    state.metrics.add_total.fetch_add(1, Ordering::Relaxed);

    let entity: Entity = match payload {
        Ok(Json(body)) => body.into(),
        Err(rejection) => {
            state.metrics.add_rejected_total.fetch_add(1, Ordering::Relaxed);
            return error_response(
                StatusCode::BAD_REQUEST,
                "bad_request",
                format!("Invalid request payload: {}", rejection.body_text()),
            );
        }
    };

    if let Err(e) = entity.validate(state.store.dim()) {
        state.metrics.add_rejected_total.fetch_add(1, Ordering::Relaxed);
        return error_response(StatusCode::BAD_REQUEST, "bad_request", e.to_string());
    }

    let name = entity.name.clone();
    let state_bg = state.clone();
    let result = tokio::task::spawn_blocking(move || state_bg.store.add(entity)).await;

    match result {
        Ok(Ok(())) => {
            tracing::debug!("Added entity {:?}", name);
            (
                StatusCode::OK,
                Json(StatusResponse {
                    status: "success".to_string(),
                }),
            )
                .into_response()
        }
        Ok(Err(e)) => {
            state.metrics.add_rejected_total.fetch_add(1, Ordering::Relaxed);
            let (status, code) = classify_store_error(&e);
            if status.is_server_error() {
                tracing::error!("Failed to add entity {:?}: {}", name, e);
            }
            error_response(status, code, format!("Failed to add person: {}", e))
        }
        Err(e) => {
            state.metrics.add_rejected_total.fetch_add(1, Ordering::Relaxed);
            tracing::error!("add_person join error: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "add join error".to_string(),
            )
        }
    }
}

/// GET /get_similar_person - Rank stored entities against a query vector
///
/// Query string: `features` repeated once per component, optional `top_n`.
async fn get_similar_person(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Response {
    state.metrics.query_total.fetch_add(1, Ordering::Relaxed);

    let parsed = parse_similar_query(query.as_deref().unwrap_or(""), state.default_top_n)
        .and_then(|q| {
            validate_features(&q.features, state.store.dim())
                .map(|_| q)
                .map_err(|e| format!("Invalid features: {}", e))
        });
    let SimilarQuery { features, top_n } = match parsed {
        Ok(q) => q,
        Err(message) => {
            state
                .metrics
                .query_rejected_total
                .fetch_add(1, Ordering::Relaxed);
            return error_response(StatusCode::BAD_REQUEST, "bad_request", message);
        }
    };

    let state_bg = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        let snapshot = state_bg.store.snapshot();
        state_bg.engine.rank(&features, &snapshot, top_n)
    })
    .await;

    match result {
        Ok(Ok(matches)) => {
            let response = SimilarPersonsResponse {
                persons: matches.into_iter().map(MatchBody::from).collect(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(Err(e)) => {
            state
                .metrics
                .query_rejected_total
                .fetch_add(1, Ordering::Relaxed);
            error_response(StatusCode::BAD_REQUEST, "bad_request", e.to_string())
        }
        Err(e) => {
            tracing::error!("get_similar_person join error: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "query join error".to_string(),
            )
        }
    }
}

/// GET /health - Store size and configuration
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: if state.store.is_full() { "full" } else { "ok" }.to_string(),
        entities: state.store.count(),
        capacity: state.store.capacity(),
        dimensions: state.store.dim(),
    };

    (StatusCode::OK, Json(response))
}

/// GET /metrics - Prometheus text exposition
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let mut resp = (StatusCode::OK, state.render_metrics()).into_response();
    resp.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    resp
}

#[derive(Debug, PartialEq)]
struct SimilarQuery {
    features: Vec<f64>,
    top_n: usize,
}

fn parse_similar_query(raw: &str, default_top_n: usize) -> Result<SimilarQuery, String> {
    let mut features = Vec::new();
    let mut top_n = None;

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "features" => {
                let v = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| format!("Invalid features value {:?}: {}", value, e))?;
                features.push(v);
            }
            "top_n" => top_n = Some(value.into_owned()),
            _ => {}
        }
    }

    let top_n = match top_n {
        None => default_top_n,
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(n) if n > 0 => n as usize,
            _ => return Err("Invalid top_n value: must be a positive integer".to_string()),
        },
    };

    Ok(SimilarQuery { features, top_n })
}

fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str) {
    match err {
        StoreError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        StoreError::Capacity { .. } => (StatusCode::CONFLICT, "capacity_exceeded"),
        StoreError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
    }
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message,
        }),
    )
        .into_response()
}

/// Create the axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/add_person", post(add_person))
        .route("/get_similar_person", get(get_similar_person))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(cors)
        .with_state(state)
}

/// Start the server, shutting down gracefully on Ctrl-C
pub async fn serve(state: Arc<AppState>, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);

    tracing::info!("Starting Visage-DB server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl-C handler: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
