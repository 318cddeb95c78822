use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, Request, State},
    http::{
        HeaderMap, HeaderName, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use colored::Colorize;
use serde_json::json;
use tokio::{net::TcpListener, sync::watch};
use tower_http::cors::CorsLayer;

use crate::{
    aggregate::AggregateEngine,
    config::SthConfig,
    error::{SthError, ValidationSource},
    ingest::{IngestionCoordinator, NotificationPayload},
    kpi::{KpiRegistry, run_kpi_loop},
    namespace::NamespaceTuple,
    query::{QueryOutcome, QueryParams, QueryPlanner, envelope},
    raw::RawStore,
    store::{StorageBackend, memory::MemoryStore, provider::CollectionProvider},
};

pub const SERVICE_HEADER: &str = "fiware-service";
pub const SERVICE_PATH_HEADER: &str = "fiware-servicepath";

pub struct AppState {
    pub config: SthConfig,
    pub backend: Arc<dyn StorageBackend>,
    pub coordinator: IngestionCoordinator,
    pub planner: QueryPlanner,
    pub kpis: Arc<KpiRegistry>,
    correlator: HeaderName,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/STH/v1/contextEntities/type/{entity_type}/id/{entity_id}/attributes/{attr_name}",
            get(get_historic),
        )
        .route("/notify", post(post_notification))
        .route("/version", get(get_version))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), admission))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Counts the request against the KPIs and echoes the correlator header
/// back on whatever response the route produces.
async fn admission(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    state.kpis.note_request();
    let correlator = request.headers().get(&state.correlator).cloned();
    let mut response = next.run(request).await;
    if let Some(value) = correlator {
        response
            .headers_mut()
            .insert(state.correlator.clone(), value);
    }
    response
}

fn require_tenant_headers(headers: &HeaderMap) -> Result<(String, String), SthError> {
    let service = headers.get(SERVICE_HEADER).and_then(|v| v.to_str().ok());
    let service_path = headers
        .get(SERVICE_PATH_HEADER)
        .and_then(|v| v.to_str().ok());

    let mut missing = Vec::new();
    if service.is_none() {
        missing.push(SERVICE_HEADER);
    }
    if service_path.is_none() {
        missing.push(SERVICE_PATH_HEADER);
    }
    if !missing.is_empty() {
        return Err(SthError::validation(ValidationSource::Headers, &missing));
    }
    Ok((
        service.unwrap_or_default().to_string(),
        service_path.unwrap_or_default().to_string(),
    ))
}

fn tenant_headers_or_default(headers: &HeaderMap, config: &SthConfig) -> (String, String) {
    let service = headers
        .get(SERVICE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&config.default_service)
        .to_string();
    let service_path = headers
        .get(SERVICE_PATH_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&config.default_service_path)
        .to_string();
    (service, service_path)
}

async fn get_historic(
    State(state): State<Arc<AppState>>,
    Path((entity_type, entity_id, attr_name)): Path<(String, String, String)>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, SthError> {
    let (service, service_path) = require_tenant_headers(&headers)?;
    let params = QueryParams::from_map(&query)?;
    let tuple = NamespaceTuple {
        service,
        service_path,
        entity_id,
        entity_type,
        attr_name,
    };

    match state.planner.execute(&tuple, &params).await? {
        QueryOutcome::Values(values) => Ok(Json(envelope(&tuple, values)).into_response()),
        QueryOutcome::File(path) => {
            let content = tokio::fs::read(&path)
                .await
                .map_err(|err| SthError::store(format!("failed to read CSV file: {err}")))?;
            if let Err(err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove CSV file");
            }
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/csv")
                .header(
                    CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.csv\"", tuple.attr_name),
                )
                .body(Body::from(content))
                .map_err(|err| SthError::store(err.to_string()))
        }
    }
}

async fn post_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, SthError> {
    let (service, service_path) = tenant_headers_or_default(&headers, &state.config);
    let payload: NotificationPayload = serde_json::from_value(body)
        .map_err(|_| SthError::validation(ValidationSource::Payload, &["contextResponses"]))?;

    let recv_time = Utc::now();
    let attended = state
        .coordinator
        .handle_notification(&service, &service_path, &payload, recv_time)
        .await?;
    tracing::debug!(
        service = %service,
        service_path = %service_path,
        attended = attended,
        "notification attended"
    );
    Ok(StatusCode::OK.into_response())
}

async fn get_version() -> Json<serde_json::Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not found" })),
    )
        .into_response()
}

/// The STH server: bind host/port, connect to the store, then accept.
/// Graceful stop drains in-flight work and disconnects.
pub struct SthServer {
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown_tx: watch::Sender<bool>,
}

impl SthServer {
    pub async fn bind(config: SthConfig) -> anyhow::Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("STH API bound to address: {}", addr.bright_cyan().bold());

        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStore::new(&config.db));
        backend.connect().await?;

        let provider = Arc::new(CollectionProvider::new(backend.clone(), &config));
        let raw = Arc::new(RawStore::new(backend.clone()));
        let aggregates = Arc::new(AggregateEngine::new(
            backend.clone(),
            config.aggregation_by.clone(),
        ));
        let coordinator = IngestionCoordinator::new(
            provider.clone(),
            raw.clone(),
            aggregates.clone(),
            config.should_store,
            config.ignore_blank_spaces,
        );
        let planner = QueryPlanner::new(provider, raw, aggregates, config.filter_out_empty);
        let correlator = HeaderName::from_bytes(config.correlator_header.as_bytes())?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            state: Arc::new(AppState {
                config,
                backend,
                coordinator,
                planner,
                kpis: Arc::new(KpiRegistry::new()),
                correlator,
            }),
            listener,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Clone of the shutdown trigger; sending `true` stops the server.
    pub fn shutdown_trigger(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let Self {
            state,
            listener,
            shutdown_tx,
        } = self;

        let addr = listener.local_addr()?;
        let router = create_router(state.clone());

        let kpi_task = tokio::spawn(run_kpi_loop(
            state.kpis.clone(),
            state.config.kpi_interval_secs,
            shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = shutdown_tx.subscribe();
        tracing::info!("STH listening on http://{}", addr.to_string().purple());
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = shutdown_rx.changed() => {}
                }
                tracing::info!("STH server shutting down gracefully");
            })
            .await?;

        // Wake the KPI loop in case shutdown came from ctrl-c.
        let _ = shutdown_tx.send(true);
        let _ = kpi_task.await;
        state.backend.close().await?;
        Ok(())
    }
}
