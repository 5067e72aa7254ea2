use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use palate_api::{
    ConstitutionSubmission, DeviceSnapshot, EnvironmentSubmission, MigrateResult,
    MotivationSubmission, PalateApi, QuestionBanks, RecommendRequest, RecommendResponse,
    SchemaStatus, StoredConstitution, StoredEnvironment, StoredMotivation, WeightsUpdate,
    WeightsView, API_CONTRACT_VERSION,
};
use palate_core::{ManualWeights, UserPreferences, WeightReport};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: Arc<PalateApi>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AsOfQuery {
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct PreferencesResponse {
    device_id: String,
    preferences: UserPreferences,
}

#[derive(Debug, Clone, Serialize)]
struct ClearWeightsResponse {
    device_id: String,
    removed: bool,
}

#[derive(Debug, Parser)]
#[command(name = "palate-service")]
#[command(about = "Local HTTP service for palate recommendations")]
struct Args {
    #[arg(long, default_value = "./palate.sqlite3")]
    db: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    catalog: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn api_error(err: &anyhow::Error) -> ServiceError {
    tracing::warn!(error = %format!("{err:#}"), "request failed");
    ServiceState::error(format!("{err:#}"))
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/banks", get(banks))
        .route("/v1/submit/constitution", post(submit_constitution))
        .route("/v1/submit/motivation", post(submit_motivation))
        .route("/v1/submit/environment", post(submit_environment))
        .route("/v1/devices/:device_id/preferences", post(preferences_set))
        .route(
            "/v1/devices/:device_id/weights",
            get(weights_show).post(weights_update).delete(weights_clear),
        )
        .route("/v1/devices/:device_id/weights/auto", get(weights_auto))
        .route("/v1/devices/:device_id/profile", get(profile_show))
        .route("/v1/recommend", post(recommend))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PALATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let api = PalateApi::from_sources(args.db, args.config.as_deref(), args.catalog.as_deref())?;
    let state = ServiceState { api: Arc::new(api) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "palate service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| api_error(&err))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result = state.api.migrate(request.dry_run).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(result)))
}

async fn banks(State(state): State<ServiceState>) -> Json<ServiceEnvelope<QuestionBanks>> {
    Json(envelope(state.api.question_banks()))
}

async fn submit_constitution(
    State(state): State<ServiceState>,
    Json(request): Json<ConstitutionSubmission>,
) -> Result<Json<ServiceEnvelope<StoredConstitution>>, ServiceError> {
    let stored = state.api.submit_constitution(request).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(stored)))
}

async fn submit_motivation(
    State(state): State<ServiceState>,
    Json(request): Json<MotivationSubmission>,
) -> Result<Json<ServiceEnvelope<StoredMotivation>>, ServiceError> {
    let stored = state.api.submit_motivation(request).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(stored)))
}

async fn submit_environment(
    State(state): State<ServiceState>,
    Json(request): Json<EnvironmentSubmission>,
) -> Result<Json<ServiceEnvelope<StoredEnvironment>>, ServiceError> {
    let stored = state.api.submit_environment(request).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(stored)))
}

async fn preferences_set(
    State(state): State<ServiceState>,
    Path(device_id): Path<String>,
    Json(preferences): Json<UserPreferences>,
) -> Result<Json<ServiceEnvelope<PreferencesResponse>>, ServiceError> {
    let preferences =
        state.api.set_preferences(&device_id, preferences).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(PreferencesResponse { device_id, preferences })))
}

async fn weights_show(
    State(state): State<ServiceState>,
    Path(device_id): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<ServiceEnvelope<WeightsView>>, ServiceError> {
    let view = state.api.weights(&device_id, query.as_of).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(view)))
}

async fn weights_auto(
    State(state): State<ServiceState>,
    Path(device_id): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<ServiceEnvelope<WeightReport>>, ServiceError> {
    let report = state.api.auto_weights(&device_id, query.as_of).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(report)))
}

async fn weights_update(
    State(state): State<ServiceState>,
    Path(device_id): Path<String>,
    Json(update): Json<WeightsUpdate>,
) -> Result<Json<ServiceEnvelope<ManualWeights>>, ServiceError> {
    let manual = state.api.update_weights(&device_id, update).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(manual)))
}

async fn weights_clear(
    State(state): State<ServiceState>,
    Path(device_id): Path<String>,
) -> Result<Json<ServiceEnvelope<ClearWeightsResponse>>, ServiceError> {
    let removed = state.api.clear_weights(&device_id).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(ClearWeightsResponse { device_id, removed })))
}

async fn profile_show(
    State(state): State<ServiceState>,
    Path(device_id): Path<String>,
) -> Result<Json<ServiceEnvelope<DeviceSnapshot>>, ServiceError> {
    let snapshot = state.api.profile(&device_id).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(snapshot)))
}

async fn recommend(
    State(state): State<ServiceState>,
    Json(request): Json<RecommendRequest>,
) -> Result<Json<ServiceEnvelope<RecommendResponse>>, ServiceError> {
    let response = state.api.recommend(request).map_err(|err| api_error(&err))?;
    Ok(Json(envelope(response)))
}
