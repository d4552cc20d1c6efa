//! `testmaster serve`: the JSON API.
//!
//! The caller is identified by the `x-user-id` header. Every handler checks
//! the [`Route`] it backs before doing anything; a denial is a 403 carrying
//! the redirect target.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use testmaster_core::ai::provider::ProviderRouter;
use testmaster_core::ai::{
    GenerationError, GenerationExecutor, GenerationTask, ModelPatch, NewModel, NewTemplate,
    RegistryStore, SharedCredentials, TemplatePatch,
};
use testmaster_core::confirm::{ConfirmError, DeleteConfirmation, DeleteTarget};
use testmaster_core::generate::{
    BatchFlow, BatchRequest, FlowError, GenerationOptions, GenerationRequest, SingleItemFlow,
};
use testmaster_core::permission::routes::DENIED_REDIRECT;
use testmaster_core::permission::{
    Access, AccessError, FallbackPolicy, Gate, Permission, PermissionResolver, Route,
};
use testmaster_core::records::RecordKind;
use testmaster_core::report::{DashboardStats, ExecutionSummary, history};
use testmaster_core::review::{ReviewError, ReviewSession, ReviewSummary};
use testmaster_core::storage::Storage;
use testmaster_db::models::{
    NewTestCase, NewTestExecution, NewTestPlan, Role, TestCaseUpdate, TestExecutionUpdate,
    TestPlanUpdate,
};

use crate::context::AppContext;

pub const USER_HEADER: &str = "x-user-id";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    redirect: Option<&'static str>,
    /// Generated content that could not be stored, handed back to the client.
    record: Option<Value>,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            redirect: None,
            record: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            redirect: Some(DENIED_REDIRECT),
            ..Self::new(StatusCode::FORBIDDEN, msg)
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(redirect) = self.redirect {
            body["redirect"] = json!(redirect);
        }
        if let Some(record) = self.record {
            body["record"] = record;
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        tracing::warn!(error = %err, "generation failed");
        let status = if err.is_configuration() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::BAD_GATEWAY
        };
        Self::new(status, err.user_message())
    }
}

impl From<FlowError> for AppError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Validation(msg) => Self::bad_request(msg),
            FlowError::Generation(e) => e.into(),
            FlowError::Persistence { record, source } => {
                tracing::error!(error = %format!("{source:#}"), kind = %record.kind(), "failed to store generated record");
                Self {
                    record: serde_json::to_value(&*record).ok(),
                    ..Self::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to save generated {}", record.kind()),
                    )
                }
            }
            FlowError::Storage(e) => Self::internal(e),
        }
    }
}

impl From<ReviewError> for AppError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::ItemNotFound { .. } => Self::not_found(err.to_string()),
            ReviewError::InvalidTransition { .. } => Self::conflict(err.to_string()),
            ReviewError::Generation(e) => e.into(),
        }
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Denied(_) | AccessError::MasterOnly => Self::forbidden(err.to_string()),
            AccessError::Storage(e) => Self::internal(e),
        }
    }
}

impl From<ConfirmError> for AppError {
    fn from(err: ConfirmError) -> Self {
        Self::conflict(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

type ApiResult<T = Response> = Result<T, AppError>;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

pub struct AppState {
    storage: Arc<dyn Storage>,
    executor: GenerationExecutor,
    credentials: SharedCredentials,
    store: RegistryStore,
    resolver: PermissionResolver,
    sessions: Mutex<HashMap<Uuid, ReviewSession>>,
    confirmations: Mutex<HashMap<Uuid, DeleteConfirmation>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        executor: GenerationExecutor,
        credentials: SharedCredentials,
        store: RegistryStore,
        fallback: FallbackPolicy,
    ) -> Self {
        Self {
            resolver: PermissionResolver::new(storage.clone()).with_fallback(fallback),
            storage,
            executor,
            credentials,
            store,
            sessions: Mutex::new(HashMap::new()),
            confirmations: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_context(ctx: &AppContext) -> Self {
        let executor = GenerationExecutor::new(
            ctx.registry.clone(),
            ctx.credentials.clone(),
            Arc::new(ProviderRouter::new()),
        )
        .with_timeout(ctx.config.ai_timeout);
        Self::new(
            ctx.storage.clone(),
            executor,
            ctx.credentials.clone(),
            ctx.store.clone(),
            ctx.config.fallback,
        )
    }

    fn single_flow(&self) -> SingleItemFlow {
        SingleItemFlow::new(self.executor.clone(), self.storage.clone())
    }

    fn batch_flow(&self) -> BatchFlow {
        BatchFlow::new(self.executor.clone(), self.storage.clone())
    }

    /// Identify the caller and check they may use `route`.
    async fn authorize(&self, headers: &HeaderMap, route: Route) -> ApiResult<Access> {
        let user_id = caller(headers)?;
        if let Err(e) = self.storage.provision_user(user_id, None).await {
            tracing::warn!(%user_id, error = %e, "failed to provision user profile");
        }
        let access = self.resolver.resolve(user_id).await;
        match route.gate(&access) {
            Gate::Allow => Ok(access),
            Gate::Redirect(_) => Err(AppError::forbidden(format!(
                "access to {route} denied for role {}",
                access.role
            ))),
        }
    }

    async fn save_registry(&self) -> ApiResult<()> {
        let registry = self.executor.registry().read().await;
        self.store.save_registry(&registry)?;
        Ok(())
    }
}

fn caller(headers: &HeaderMap) -> ApiResult<Uuid> {
    let raw = headers
        .get(USER_HEADER)
        .ok_or_else(|| AppError::unauthorized(format!("missing {USER_HEADER} header")))?;
    raw.to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or_else(|| AppError::unauthorized(format!("{USER_HEADER} must be a UUID")))
}

/// Records belong to their owner; admins see everything.
fn visible(access: &Access, owner_id: Uuid) -> bool {
    owner_id == access.user_id || access.is_admin()
}

/// A new record may only link to a plan its creator owns. Admins read
/// every record but still cannot attach their own to someone else's.
async fn linked_plan(state: &AppState, access: &Access, plan_id: Uuid) -> ApiResult<()> {
    match state.storage.get_plan(plan_id).await? {
        Some(plan) if plan.owner_id == access.user_id => Ok(()),
        _ => Err(AppError::bad_request(format!("test plan {plan_id} not found"))),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/routes", get(list_routes))
        .route("/api/me", get(me))
        .route("/api/dashboard", get(dashboard))
        .route("/api/reports", get(report))
        .route("/api/history", get(activity))
        .route("/api/plans", get(list_plans).post(create_plan))
        .route(
            "/api/plans/{id}",
            get(get_plan).patch(update_plan).delete(delete_plan),
        )
        .route("/api/cases", get(list_cases).post(create_case))
        .route(
            "/api/cases/{id}",
            get(get_case).patch(update_case).delete(delete_case),
        )
        .route("/api/executions", get(list_executions).post(create_execution))
        .route(
            "/api/executions/{id}",
            get(get_execution)
                .patch(update_execution)
                .delete(delete_execution),
        )
        .route("/api/generate", post(generate))
        .route("/api/batches", post(create_batch))
        .route("/api/batches/{id}", get(get_batch).delete(discard_batch))
        .route("/api/batches/{id}/items/{item}/approve", post(approve_item))
        .route("/api/batches/{id}/items/{item}/reject", post(reject_item))
        .route(
            "/api/batches/{id}/items/{item}/regenerate",
            post(regenerate_item),
        )
        .route("/api/batches/{id}/persist", post(persist_batch))
        .route("/api/models", get(list_models).post(add_model))
        .route("/api/models/defaults", put(set_default_model))
        .route("/api/models/{id}", patch(update_model).delete(delete_model))
        .route("/api/templates", get(list_templates).post(add_template))
        .route(
            "/api/templates/{id}",
            patch(update_template).delete(delete_template),
        )
        .route("/api/credentials", get(list_credentials))
        .route("/api/credentials/{reference}", put(set_credential))
        .route("/api/ai-config/push", post(push_ai_config))
        .route("/api/ai-config/pull", post(pull_ai_config))
        .route("/api/users", get(list_users))
        .route("/api/users/{id}/role", put(set_user_role))
        .route("/api/users/{id}/permissions/{permission}", put(set_user_permission))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(ctx: AppContext, bind: &str, port: u16) -> Result<()> {
    let state = Arc::new(AppState::from_context(&ctx));
    let app = build_router(state.clone());
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("testmaster serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for session in state.sessions.lock().await.values() {
        if !session.is_resolved() || session.has_unsaved_approvals() {
            tracing::warn!(session = %session.id(), summary = ?session.summary(), "discarding unfinished review session");
        }
    }
    ctx.close().await;
    tracing::info!("testmaster serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Access
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RouteAccess {
    route: Route,
    path: &'static str,
    gate: Gate,
}

async fn list_routes(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    let access = state.authorize(&headers, Route::Dashboard).await?;
    let routes: Vec<RouteAccess> = Route::ALL
        .into_iter()
        .map(|route| RouteAccess {
            route,
            path: route.path(),
            gate: route.gate(&access),
        })
        .collect();
    Ok(Json(routes).into_response())
}

async fn me(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    let access = state.authorize(&headers, Route::Dashboard).await?;
    Ok(Json(json!({
        "access": access,
        "effective": access.effective(),
    }))
    .into_response())
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

async fn dashboard(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    let access = state.authorize(&headers, Route::Dashboard).await?;
    let stats = DashboardStats::collect(state.storage.as_ref(), access.user_id).await?;
    Ok(Json(stats).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct ReportQuery {
    plan_id: Option<Uuid>,
}

async fn report(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<ReportQuery>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Reports).await?;
    let runs = state
        .storage
        .list_executions(access.user_id, q.plan_id, None)
        .await?;
    Ok(Json(ExecutionSummary::from_executions(&runs)).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    kind: Option<RecordKind>,
}

async fn activity(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<HistoryQuery>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::History).await?;
    let entries = history(state.storage.as_ref(), access.user_id, q.kind).await?;
    Ok(Json(entries).into_response())
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

async fn list_plans(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    let access = state.authorize(&headers, Route::Plans).await?;
    Ok(Json(state.storage.list_plans(access.user_id).await?).into_response())
}

async fn create_plan(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(mut new): Json<NewTestPlan>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Plans).await?;
    if new.title.trim().is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    new.owner_id = access.user_id;
    new.generated_by_ai = false;
    let plan = state.storage.create_plan(&new).await?;
    Ok((StatusCode::CREATED, Json(plan)).into_response())
}

async fn get_plan(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Plans).await?;
    match state.storage.get_plan(id).await? {
        Some(plan) if visible(&access, plan.owner_id) => Ok(Json(plan).into_response()),
        _ => Err(AppError::not_found(format!("test plan {id} not found"))),
    }
}

async fn update_plan(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(update): Json<TestPlanUpdate>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Plans).await?;
    match state.storage.get_plan(id).await? {
        Some(plan) if visible(&access, plan.owner_id) => {}
        _ => return Err(AppError::not_found(format!("test plan {id} not found"))),
    }
    let plan = state
        .storage
        .update_plan(id, &update)
        .await?
        .ok_or_else(|| AppError::not_found(format!("test plan {id} not found")))?;
    Ok(Json(plan).into_response())
}

async fn delete_plan(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(q): Query<DeleteQuery>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Plans).await?;
    match state.storage.get_plan(id).await? {
        Some(plan) if visible(&access, plan.owner_id) => {}
        _ => return Err(AppError::not_found(format!("test plan {id} not found"))),
    }
    two_step_delete(&state, &access, RecordKind::Plan, id, q.confirm).await
}

// ---------------------------------------------------------------------------
// Cases
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RecordFilter {
    plan_id: Option<Uuid>,
    case_id: Option<Uuid>,
}

async fn list_cases(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(filter): Query<RecordFilter>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Cases).await?;
    let cases = state.storage.list_cases(access.user_id, filter.plan_id).await?;
    Ok(Json(cases).into_response())
}

async fn create_case(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(mut new): Json<NewTestCase>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Cases).await?;
    if new.title.trim().is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    if let Some(plan_id) = new.plan_id {
        linked_plan(&state, &access, plan_id).await?;
    }
    new.owner_id = access.user_id;
    new.generated_by_ai = false;
    let case = state.storage.create_case(&new).await?;
    Ok((StatusCode::CREATED, Json(case)).into_response())
}

async fn get_case(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Cases).await?;
    match state.storage.get_case(id).await? {
        Some(case) if visible(&access, case.owner_id) => Ok(Json(case).into_response()),
        _ => Err(AppError::not_found(format!("test case {id} not found"))),
    }
}

async fn update_case(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(update): Json<TestCaseUpdate>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Cases).await?;
    match state.storage.get_case(id).await? {
        Some(case) if visible(&access, case.owner_id) => {}
        _ => return Err(AppError::not_found(format!("test case {id} not found"))),
    }
    let case = state
        .storage
        .update_case(id, &update)
        .await?
        .ok_or_else(|| AppError::not_found(format!("test case {id} not found")))?;
    Ok(Json(case).into_response())
}

async fn delete_case(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(q): Query<DeleteQuery>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Cases).await?;
    match state.storage.get_case(id).await? {
        Some(case) if visible(&access, case.owner_id) => {}
        _ => return Err(AppError::not_found(format!("test case {id} not found"))),
    }
    two_step_delete(&state, &access, RecordKind::Case, id, q.confirm).await
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

async fn list_executions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(filter): Query<RecordFilter>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Executions).await?;
    let runs = state
        .storage
        .list_executions(access.user_id, filter.plan_id, filter.case_id)
        .await?;
    Ok(Json(runs).into_response())
}

async fn create_execution(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(mut new): Json<NewTestExecution>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Executions).await?;
    linked_plan(&state, &access, new.plan_id).await?;
    match state.storage.get_case(new.case_id).await? {
        Some(case) if case.owner_id == access.user_id => {}
        _ => return Err(AppError::bad_request(format!("test case {} not found", new.case_id))),
    }
    new.owner_id = access.user_id;
    new.generated_by_ai = false;
    if new.executed_by.is_empty() {
        new.executed_by = access.user_id.to_string();
    }
    let run = state.storage.create_execution(&new).await?;
    Ok((StatusCode::CREATED, Json(run)).into_response())
}

async fn get_execution(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Executions).await?;
    match state.storage.get_execution(id).await? {
        Some(run) if visible(&access, run.owner_id) => Ok(Json(run).into_response()),
        _ => Err(AppError::not_found(format!("test execution {id} not found"))),
    }
}

async fn update_execution(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(update): Json<TestExecutionUpdate>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Executions).await?;
    match state.storage.get_execution(id).await? {
        Some(run) if visible(&access, run.owner_id) => {}
        _ => return Err(AppError::not_found(format!("test execution {id} not found"))),
    }
    let run = state
        .storage
        .update_execution(id, &update)
        .await?
        .ok_or_else(|| AppError::not_found(format!("test execution {id} not found")))?;
    Ok(Json(run).into_response())
}

async fn delete_execution(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(q): Query<DeleteQuery>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::Executions).await?;
    match state.storage.get_execution(id).await? {
        Some(run) if visible(&access, run.owner_id) => {}
        _ => return Err(AppError::not_found(format!("test execution {id} not found"))),
    }
    two_step_delete(&state, &access, RecordKind::Execution, id, q.confirm).await
}

// ---------------------------------------------------------------------------
// Two-step delete
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    confirm: bool,
}

/// First call arms a confirmation for the caller and answers 202; a second
/// call with `?confirm=true` inside the window deletes.
async fn two_step_delete(
    state: &AppState,
    access: &Access,
    kind: RecordKind,
    id: Uuid,
    confirm: bool,
) -> ApiResult {
    let target = DeleteTarget { kind, id };
    let now = Instant::now();

    {
        let mut confirmations = state.confirmations.lock().await;
        let pending = confirmations.entry(access.user_id).or_default();
        if !confirm {
            pending.arm(target, now);
            return Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "awaiting_confirmation",
                    "target": target,
                    "confirm_within_secs": testmaster_core::confirm::DEFAULT_WINDOW.as_secs(),
                })),
            )
                .into_response());
        }
        pending.confirm(&target, now)?;
    }

    let deleted = match kind {
        RecordKind::Plan => state.storage.delete_plan(id).await?,
        RecordKind::Case => state.storage.delete_case(id).await?,
        RecordKind::Execution => state.storage.delete_execution(id).await?,
    };
    if !deleted {
        return Err(AppError::not_found(format!("test {kind} {id} not found")));
    }
    tracing::info!(%kind, %id, user = %access.user_id, "record deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GenerateBody {
    request: GenerationRequest,
    #[serde(default)]
    options: GenerationOptions,
}

async fn generate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::AiGenerator).await?;
    let record = state
        .single_flow()
        .generate_one_with(body.request, access.user_id, &body.options)
        .await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

#[derive(Debug, Serialize)]
struct SessionView<'a> {
    #[serde(flatten)]
    session: &'a ReviewSession,
    summary: ReviewSummary,
}

fn session_view(session: &ReviewSession) -> Json<SessionView<'_>> {
    Json(SessionView {
        session,
        summary: session.summary(),
    })
}

async fn create_batch(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::AiGenerator).await?;
    let session = state
        .batch_flow()
        .generate_batch(request, access.user_id)
        .await?;
    let response = (StatusCode::CREATED, session_view(&session)).into_response();
    state.sessions.lock().await.insert(session.id(), session);
    Ok(response)
}

/// Run `f` on the caller's session `id`.
async fn with_session<T>(
    state: &AppState,
    access: &Access,
    id: Uuid,
    f: impl FnOnce(&mut ReviewSession) -> ApiResult<T>,
) -> ApiResult<T> {
    let mut sessions = state.sessions.lock().await;
    match sessions.get_mut(&id) {
        Some(session) if session.owner_id() == access.user_id => f(session),
        _ => Err(AppError::not_found(format!("review session {id} not found"))),
    }
}

/// Run `work` on its own task. It completes even when the request that
/// started it is dropped.
async fn detached<T>(work: impl Future<Output = ApiResult<T>> + Send + 'static) -> ApiResult<T>
where
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!("background task failed: {e}")))?
}

async fn get_batch(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::AiGenerator).await?;
    with_session(&state, &access, id, |s| Ok(session_view(s).into_response())).await
}

async fn approve_item(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, item)): Path<(Uuid, Uuid)>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::AiGenerator).await?;
    with_session(&state, &access, id, |s| {
        Ok(Json(s.approve(item)?.clone()).into_response())
    })
    .await
}

async fn reject_item(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, item)): Path<(Uuid, Uuid)>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::AiGenerator).await?;
    with_session(&state, &access, id, |s| {
        Ok(Json(s.reject(item)?.clone()).into_response())
    })
    .await
}

#[derive(Debug, Deserialize)]
struct RegenerateBody {
    feedback: String,
}

async fn regenerate_item(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, item)): Path<(Uuid, Uuid)>,
    Json(body): Json<RegenerateBody>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::AiGenerator).await?;
    if body.feedback.trim().is_empty() {
        return Err(AppError::bad_request("feedback is required"));
    }

    // The session lock is not held across the provider call. The call and
    // the return to `pending` run on their own task, so a dropped request
    // cannot leave the item regenerating.
    let ticket = with_session(&state, &access, id, |s| {
        Ok(s.begin_regeneration(item, body.feedback)?)
    })
    .await?;
    let task_state = state.clone();
    let item = detached(async move {
        let outcome = task_state
            .batch_flow()
            .regenerate(&ticket.original, &ticket.feedback)
            .await;
        with_session(&task_state, &access, id, |s| {
            Ok(s.finish_regeneration(ticket, outcome)?.clone())
        })
        .await
    })
    .await?;
    Ok(Json(item).into_response())
}

async fn persist_batch(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::AiGenerator).await?;
    // Saved in place; the session stays available for retrying failures.
    let task_state = state.clone();
    let body = detached(async move {
        let mut sessions = task_state.sessions.lock().await;
        let session = match sessions.get_mut(&id) {
            Some(s) if s.owner_id() == access.user_id => s,
            _ => return Err(AppError::not_found(format!("review session {id} not found"))),
        };
        let report = session.persist_approved(task_state.storage.as_ref()).await;
        Ok(json!({
            "persisted": report.persisted,
            "failures": report.failures,
            "summary": session.summary(),
        }))
    })
    .await?;
    Ok(Json(body).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct DiscardQuery {
    #[serde(default)]
    force: bool,
}

async fn discard_batch(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(q): Query<DiscardQuery>,
) -> ApiResult {
    let access = state.authorize(&headers, Route::AiGenerator).await?;
    let mut sessions = state.sessions.lock().await;
    match sessions.get(&id) {
        Some(s) if s.owner_id() == access.user_id => {
            let unfinished = !s.is_resolved() || s.has_unsaved_approvals();
            if unfinished && !q.force {
                return Err(AppError::conflict(
                    "review session has undecided or unsaved items; pass force=true to discard",
                ));
            }
            if unfinished {
                tracing::warn!(session = %id, summary = ?s.summary(), "discarding unfinished review session");
            }
        }
        _ => return Err(AppError::not_found(format!("review session {id} not found"))),
    }
    sessions.remove(&id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// Models and templates
// ---------------------------------------------------------------------------

async fn list_models(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    let registry = state.executor.registry().read().await;
    Ok(Json(json!({
        "models": registry.models(),
        "task_defaults": registry.task_defaults(),
        "global_default": registry.global_default(),
    }))
    .into_response())
}

async fn add_model(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(mut new): Json<NewModel>,
) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    if new.capabilities.is_empty() {
        new.capabilities = GenerationTask::ALL.to_vec();
    }
    let model = state.executor.registry().write().await.add_model(new);
    state.save_registry().await?;
    tracing::info!(model_id = %model.id, "model added");
    Ok((StatusCode::CREATED, Json(model)).into_response())
}

async fn update_model(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<ModelPatch>,
) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    let model = state
        .executor
        .registry()
        .write()
        .await
        .update_model(&id, patch)
        .ok_or_else(|| AppError::not_found(format!("model {id} not found")))?;
    state.save_registry().await?;
    Ok(Json(model).into_response())
}

async fn delete_model(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    if !state.executor.registry().write().await.delete_model(&id) {
        return Err(AppError::not_found(format!("model {id} not found")));
    }
    state.save_registry().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct DefaultModelBody {
    /// Omit to set the global default.
    task: Option<GenerationTask>,
    model_id: String,
}

async fn set_default_model(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<DefaultModelBody>,
) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    {
        let mut registry = state.executor.registry().write().await;
        let model = registry
            .get_model(&body.model_id)
            .ok_or_else(|| AppError::bad_request(format!("model {} not found", body.model_id)))?;
        match body.task {
            Some(task) if !model.supports(task) => {
                return Err(AppError::bad_request(format!(
                    "model {} does not support {task}",
                    body.model_id
                )));
            }
            Some(task) => registry.set_default_model(task, body.model_id.clone()),
            None => registry.set_global_default(body.model_id.clone()),
        }
    }
    state.save_registry().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Default, Deserialize)]
struct TemplateQuery {
    task: Option<GenerationTask>,
}

async fn list_templates(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<TemplateQuery>,
) -> ApiResult {
    state.authorize(&headers, Route::AiGenerator).await?;
    let registry = state.executor.registry().read().await;
    let templates: Vec<_> = registry
        .templates()
        .iter()
        .filter(|t| q.task.is_none_or(|task| t.task == task))
        .collect();
    Ok(Json(templates).into_response())
}

async fn add_template(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(new): Json<NewTemplate>,
) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    if new.content.trim().is_empty() {
        return Err(AppError::bad_request("template content is required"));
    }
    let template = state.executor.registry().write().await.add_template(new);
    state.save_registry().await?;
    Ok((StatusCode::CREATED, Json(template)).into_response())
}

async fn update_template(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<TemplatePatch>,
) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    let template = state
        .executor
        .registry()
        .write()
        .await
        .update_template(&id, patch)
        .ok_or_else(|| AppError::not_found(format!("template {id} not found")))?;
    state.save_registry().await?;
    Ok(Json(template).into_response())
}

async fn delete_template(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    if !state.executor.registry().write().await.delete_template(&id) {
        return Err(AppError::not_found(format!("template {id} not found")));
    }
    state.save_registry().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Credential references only; keys never leave the server.
async fn list_credentials(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    let refs: Vec<String> = state
        .credentials
        .read()
        .await
        .refs()
        .map(str::to_string)
        .collect();
    Ok(Json(refs).into_response())
}

#[derive(Debug, Deserialize)]
struct CredentialBody {
    api_key: String,
}

async fn set_credential(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
    Json(body): Json<CredentialBody>,
) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    let mut credentials = state.credentials.write().await;
    if body.api_key.is_empty() {
        credentials.remove(&reference);
    } else {
        credentials.set(reference, body.api_key);
    }
    state.store.save_credentials(&credentials)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn push_ai_config(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    let registry = state.executor.registry().read().await.clone();
    state
        .store
        .sync_to_remote(&registry, state.storage.as_ref())
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn pull_ai_config(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    state.authorize(&headers, Route::ModelControl).await?;
    let remote = state
        .store
        .pull_remote(state.storage.as_ref())
        .await?
        .ok_or_else(|| AppError::not_found("no shared AI configuration stored"))?;
    let models = remote.models().len();
    *state.executor.registry().write().await = remote;
    Ok(Json(json!({ "models": models })).into_response())
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

async fn list_users(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    state.authorize(&headers, Route::UserManagement).await?;
    let users = state.storage.list_users().await?;
    let mut out = Vec::with_capacity(users.len());
    for user in users {
        let access = state.resolver.resolve(user.user_id).await;
        out.push(json!({
            "user_id": user.user_id,
            "email": user.email,
            "role": user.role,
            "permissions": access.effective(),
        }));
    }
    Ok(Json(out).into_response())
}

#[derive(Debug, Deserialize)]
struct RoleBody {
    role: Role,
}

async fn set_user_role(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleBody>,
) -> ApiResult {
    let actor = state.authorize(&headers, Route::UserManagement).await?;
    state.resolver.set_role(&actor, id, body.role).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct GrantBody {
    granted: bool,
}

async fn set_user_permission(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, permission)): Path<(Uuid, String)>,
    Json(body): Json<GrantBody>,
) -> ApiResult {
    let actor = state.authorize(&headers, Route::UserManagement).await?;
    let permission: Permission = permission
        .parse()
        .map_err(|e: testmaster_core::permission::PermissionParseError| {
            AppError::bad_request(e.to_string())
        })?;
    let flags = state
        .resolver
        .set_permission(&actor, id, permission, body.granted)
        .await?;
    Ok(Json(flags).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
