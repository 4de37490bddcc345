//! REST API for the loading planner.
//!
//! Wraps the planner and the feasibility engine in HTTP endpoints. Uses Axum
//! as the web framework, streams progress as Server-Sent Events and serves an
//! OpenAPI document.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};

use crate::catalog::{CargoCatalog, ContainerCatalog};
use crate::config::{ApiConfig, PlannerConfig};
use crate::geometry::Orientation;
use crate::model::{
    BoxDimensions, CargoItem, ContainerCategory, ContainerTemplate, OrientationRule,
    StackingRules, ValidationError,
};
use crate::optimizer::{
    PackedPlacement, PlacementResult, PlanningError, UnplacedItem, UnplacedReason,
    check_feasibility_with_config,
};
use crate::planner::{
    LoadedContainer, LoadingPlan, PlanOptions, PlanningMode, plan_loading_with_config,
    plan_loading_with_progress,
};
use crate::report::{ContainerSummary, PlanReport, summarize};
use crate::units::{Dimension, Mass};

#[derive(Clone)]
struct ApiState {
    planner: PlannerConfig,
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>stuffing-planner API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                window.ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Request structure for the planning endpoints.
///
/// `containers` is the template catalog. In manual mode `manual_entries`
/// lists template ids in the order the user added them; it defaults to the
/// catalog order.
#[derive(Deserialize, Clone, ToSchema)]
#[schema(
    example = json!({
        "cargo": [
            {
                "id": "pallet-1",
                "name": "Euro pallet",
                "dimensions": {
                    "length": { "value": 120.0, "unit": "cm" },
                    "width": { "value": 80.0, "unit": "cm" },
                    "height": { "value": 1.0, "unit": "m" }
                },
                "weight": { "value": 350.0, "unit": "kg" },
                "quantity": 12,
                "allowed_orientations": ["as_given", "rotate_to_height"]
            }
        ],
        "containers": [
            {
                "id": "20ft",
                "name": "20ft Standard",
                "category": "container",
                "internal_dimensions": {
                    "length": { "value": 5898.0, "unit": "mm" },
                    "width": { "value": 2352.0, "unit": "mm" },
                    "height": { "value": 2393.0, "unit": "mm" }
                },
                "max_payload": { "value": 21.77, "unit": "ton" },
                "cost_per_unit": 1500.0
            }
        ],
        "mode": "automatic",
        "max_instances": 5
    })
)]
pub struct PlanRequest {
    pub cargo: Vec<CargoItem>,
    pub containers: Vec<ContainerTemplate>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub mode: Option<PlanningMode>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub include_coming_soon: Option<bool>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub max_instances: Option<usize>,
    #[serde(default)]
    pub manual_entries: Vec<String>,
}

#[derive(Debug)]
struct ValidatedPlanRequest {
    cargo: CargoCatalog,
    templates: Vec<ContainerTemplate>,
    mode: Option<PlanningMode>,
    include_coming_soon: Option<bool>,
    max_instances: Option<usize>,
}

impl ValidatedPlanRequest {
    /// Request overrides applied on top of the configured defaults.
    fn plan_options(&self, config: &PlannerConfig) -> PlanOptions {
        let mut options = config.plan_options(self.mode.unwrap_or_default());
        if let Some(include) = self.include_coming_soon {
            options.include_coming_soon = include;
        }
        if let Some(max_instances) = self.max_instances {
            options.max_instances = max_instances;
        }
        options
    }
}

#[derive(Debug)]
enum PlanRequestValidationError {
    MissingContainers,
    InvalidMaxInstances,
    InvalidCargo(ValidationError),
    InvalidContainer(ValidationError),
    UnknownManualEntry(String),
}

impl PlanRequest {
    fn into_validated(self) -> Result<ValidatedPlanRequest, PlanRequestValidationError> {
        if self.containers.is_empty() {
            return Err(PlanRequestValidationError::MissingContainers);
        }
        if self.max_instances == Some(0) {
            return Err(PlanRequestValidationError::InvalidMaxInstances);
        }

        let cargo = CargoCatalog::from_items(self.cargo)
            .map_err(PlanRequestValidationError::InvalidCargo)?;
        let catalog = ContainerCatalog::from_templates(self.containers)
            .map_err(PlanRequestValidationError::InvalidContainer)?;

        let templates = if self.mode == Some(PlanningMode::Manual) && !self.manual_entries.is_empty()
        {
            self.manual_entries
                .iter()
                .map(|id| {
                    catalog
                        .get(id)
                        .cloned()
                        .ok_or_else(|| PlanRequestValidationError::UnknownManualEntry(id.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            catalog.templates().to_vec()
        };

        Ok(ValidatedPlanRequest {
            cargo,
            templates,
            mode: self.mode,
            include_coming_soon: self.include_coming_soon,
            max_instances: self.max_instances,
        })
    }
}

/// Request structure for the single-container feasibility check.
#[derive(Deserialize, Clone, ToSchema)]
pub struct FeasibilityRequest {
    pub cargo: Vec<CargoItem>,
    pub container: ContainerTemplate,
}

/// Plan together with its display aggregates.
#[derive(Serialize, ToSchema)]
pub struct PlanResponse {
    pub plan: LoadingPlan,
    pub report: PlanReport,
}

/// Single-container result and the volume pre-check.
#[derive(Serialize, ToSchema)]
pub struct FeasibilityResponse {
    pub result: PlacementResult,
    /// `false` proves the cargo cannot fit by volume alone.
    pub volume_precheck: bool,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.body_text(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn container_config_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid container configuration",
        details,
    )
}

fn planning_error(err: PlanningError) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Planning precondition violated",
        err.to_string(),
    )
}

fn internal_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Planning failed unexpectedly",
        details,
    )
}

fn parse_plan_request(
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> Result<ValidatedPlanRequest, Response> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return Err(json_deserialize_error(err)),
    };

    match payload.into_validated() {
        Ok(validated) => Ok(validated),
        Err(PlanRequestValidationError::MissingContainers) => Err(validation_error(
            "At least one container template must be specified",
        )),
        Err(PlanRequestValidationError::InvalidMaxInstances) => {
            Err(validation_error("max_instances must be at least 1"))
        }
        Err(PlanRequestValidationError::InvalidCargo(err)) => {
            Err(validation_error(err.to_string()))
        }
        Err(PlanRequestValidationError::InvalidContainer(err)) => {
            Err(container_config_error(err.to_string()))
        }
        Err(PlanRequestValidationError::UnknownManualEntry(id)) => Err(container_config_error(
            format!("manual entry '{}' does not match any container template", id),
        )),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(handle_plan, handle_plan_stream, handle_feasibility, handle_health),
    components(
        schemas(
            PlanRequest,
            PlanResponse,
            FeasibilityRequest,
            FeasibilityResponse,
            HealthResponse,
            ErrorResponse,
            CargoItem,
            ContainerTemplate,
            ContainerCategory,
            BoxDimensions,
            StackingRules,
            OrientationRule,
            Orientation,
            Dimension,
            Mass,
            PlanningMode,
            LoadingPlan,
            LoadedContainer,
            PackedPlacement,
            PlacementResult,
            UnplacedItem,
            UnplacedReason,
            PlanReport,
            ContainerSummary
        )
    ),
    tags((name = "planning", description = "Endpoints for container loading plans"))
)]
struct ApiDoc;

fn router(planner: PlannerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let state = ApiState { planner };

    Router::new()
        .route("/plan", post(handle_plan))
        .route("/plan_stream", post(handle_plan_stream))
        .route("/feasibility", post(handle_feasibility))
        .route("/health", get(handle_health))
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server and serves until it is terminated.
///
/// # Errors
/// Fails when the configured address cannot be bound.
pub async fn start_api_server(config: ApiConfig, planner: PlannerConfig) -> std::io::Result<()> {
    let app = router(planner);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    log::info!(
        "Server running on http://{}:{}",
        config.display_host(),
        config.port()
    );
    if config.binds_to_all_interfaces() {
        log::info!("Local access: http://localhost:{}", config.port());
    }
    log::info!("Endpoints: POST /plan, POST /plan_stream, POST /feasibility, GET /health");
    log::info!("Documentation: GET /docs, GET /docs/openapi.json");

    axum::serve(listener, app).await
}

/// Handler for POST /plan endpoint.
///
/// Plans the cargo across container instances and returns the plan together
/// with its report.
#[utoipa::path(
    post,
    path = "/plan",
    request_body = PlanRequest,
    responses(
        (status = 200, description = "Loading plan, possibly with unplaced items", body = PlanResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request, container configuration or planning input",
            body = ErrorResponse
        ),
        (status = INTERNAL_SERVER_ERROR, description = "Planning worker failed", body = ErrorResponse)
    ),
    tag = "planning"
)]
async fn handle_plan(
    State(state): State<ApiState>,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_plan_request(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let options = request.plan_options(&state.planner);
    log::info!(
        "New plan request: {} cargo lines ({} units), {} templates, {:?} mode",
        request.cargo.len(),
        request.cargo.total_units(),
        request.templates.len(),
        options.mode
    );

    let packing = state.planner.packing_config();
    let items = request.cargo.snapshot();
    let templates = request.templates;
    let outcome = tokio::task::spawn_blocking(move || {
        plan_loading_with_config(&items, &templates, &options, &packing)
    })
    .await;

    let plan = match outcome {
        Ok(Ok(plan)) => plan,
        Ok(Err(err)) => {
            log::warn!("Plan request rejected: {}", err);
            return planning_error(err);
        }
        Err(err) => {
            log::error!("Planning worker failed: {}", err);
            return internal_error(err.to_string());
        }
    };

    let report = summarize(&plan);
    log::info!(
        "Result: {} containers, {} unplaced units",
        report.total_containers,
        report.unplaced_units
    );

    (StatusCode::OK, Json(PlanResponse { plan, report })).into_response()
}

/// Handler for POST /plan_stream endpoint (SSE).
///
/// Streams planner events as Server-Sent Events (text/event-stream) while the
/// plan is computed on a blocking worker.
#[utoipa::path(
    post,
    path = "/plan_stream",
    request_body = PlanRequest,
    responses(
        (
            status = 200,
            description = "Streams planner events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request or container configuration",
            body = ErrorResponse
        )
    ),
    tag = "planning"
)]
async fn handle_plan_stream(
    State(state): State<ApiState>,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_plan_request(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.cargo.is_empty() {
        return planning_error(PlanningError::InvalidCatalog(
            "cargo catalog is empty".to_string(),
        ));
    }

    let options = request.plan_options(&state.planner);
    let packing = state.planner.packing_config();
    let items = request.cargo.snapshot();
    let templates = request.templates;

    let (tx, rx) = mpsc::channel::<String>(32);

    tokio::task::spawn_blocking(move || {
        let outcome = plan_loading_with_progress(&items, &templates, &options, &packing, |evt| {
            if let Ok(json) = serde_json::to_string(evt) {
                // A closed receiver discards the remaining events.
                let _ = tx.blocking_send(json);
            }
        });
        if let Err(err) = outcome {
            log::warn!("Streamed plan failed: {}", err);
            let event = json!({ "type": "Error", "details": err.to_string() });
            let _ = tx.blocking_send(event.to_string());
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Handler for POST /feasibility endpoint.
///
/// Packs the cargo into a single instance of one template.
#[utoipa::path(
    post,
    path = "/feasibility",
    request_body = FeasibilityRequest,
    responses(
        (status = 200, description = "Single-container placement result", body = FeasibilityResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid cargo or container template",
            body = ErrorResponse
        )
    ),
    tag = "planning"
)]
async fn handle_feasibility(
    State(state): State<ApiState>,
    payload: Result<Json<FeasibilityRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };

    let cargo = match CargoCatalog::from_items(request.cargo) {
        Ok(cargo) => cargo,
        Err(err) => return validation_error(err.to_string()),
    };
    let volume_precheck = cargo.fits_by_volume([&request.container]);
    log::info!(
        "New feasibility request: {} units against '{}'",
        cargo.total_units(),
        request.container.id
    );

    match check_feasibility_with_config(
        cargo.items(),
        &request.container,
        &state.planner.packing_config(),
    ) {
        Ok(result) => (
            StatusCode::OK,
            Json(FeasibilityResponse {
                result,
                volume_precheck,
            }),
        )
            .into_response(),
        Err(err) => planning_error(err),
    }
}

/// Handler for GET /health endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "planning"
)]
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn serve_openapi_json(State(_state): State<ApiState>) -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui(State(_state): State<ApiState>) -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
