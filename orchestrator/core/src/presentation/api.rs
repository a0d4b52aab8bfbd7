// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! REST + WebSocket API
//!
//! Errors are returned as `{"error": {"code", "message"}}` where `code` is the
//! stable [`PipelineError::code`] string.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::orchestrator::{PipelineOrchestrator, WorkflowRequest};
use crate::domain::approval::ApprovalId;
use crate::domain::events::WorkflowId;
use crate::domain::pipeline::{codes, PipelineError};
use crate::domain::prompt::{AssignmentScope, ComponentRole, NewPrompt, PromptId};
use crate::domain::registry::{CapabilityDescriptor, CapabilityFilter, EntryId};
use crate::domain::task::TaskId;
use crate::infrastructure::event_bus::{EventBusError, WorkflowEventReceiver};

const DEFAULT_EVENT_LIMIT: usize = 50;
const DEFAULT_ACTOR: &str = "operator";

pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
}

pub fn app(orchestrator: Arc<PipelineOrchestrator>) -> Router {
    let state = Arc::new(AppState { orchestrator });

    Router::new()
        .route("/health", get(health))
        .route("/api/requests", post(submit_request))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/clarifications", post(clarify_workflow))
        .route("/api/workflows/{id}/cancel", post(cancel_workflow))
        .route("/api/workflows/{id}/stream", get(stream_workflow))
        .route("/api/events", get(list_events))
        .route("/api/ws", get(events_socket))
        .route("/api/approvals", get(list_approvals))
        .route("/api/approvals/{id}/approve", post(approve))
        .route("/api/approvals/{id}/reject", post(reject))
        .route("/api/registry", get(list_registry).post(register_entry))
        .route("/api/registry/{name}/activate", post(activate_entry))
        .route("/api/registry/{name}/deprecate", post(deprecate_entry))
        .route("/api/prompts", get(list_prompts).post(register_prompt))
        .route("/api/prompts/assignments", get(list_assignments).post(assign_prompt))
        .route("/api/prompts/resolve", get(resolve_prompt))
        .route("/api/tasks/{id}/context", get(task_context))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let code = err.code();
        let status = match code {
            codes::REGISTRY_CONFLICT | codes::INVALID_STATE => StatusCode::CONFLICT,
            codes::NOT_FOUND | codes::REGISTRY_NOT_FOUND => StatusCode::NOT_FOUND,
            codes::VALIDATION_ERROR | codes::PROMPT_RESOLUTION_ERROR => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(code, error = %err, "Request failed");
        }
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"error": {"code": self.code, "message": self.message}});
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_workflow_id(raw: &str) -> ApiResult<WorkflowId> {
    WorkflowId::parse(raw).map_err(|_| ApiError::bad_request(format!("Invalid workflow id '{}'", raw)))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "max_replans": state.orchestrator.config().max_replans,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct SubmitParams {
    #[serde(default)]
    wait: bool,
}

async fn submit_request(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubmitParams>,
    Json(request): Json<WorkflowRequest>,
) -> ApiResult<Response> {
    if params.wait {
        let report = state.orchestrator.start(request).await?;
        return Ok(Json(report).into_response());
    }
    let workflow_id = state.orchestrator.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"workflow_id": workflow_id}))).into_response())
}

async fn get_workflow(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Response> {
    let workflow_id = parse_workflow_id(&id)?;
    let graph = state
        .orchestrator
        .services()
        .events
        .get_workflow(workflow_id)
        .await
        .map_err(PipelineError::from)?;
    if graph.events.is_empty() {
        return Err(PipelineError::NotFound(format!("Workflow {}", workflow_id)).into());
    }
    Ok(Json(graph).into_response())
}

#[derive(Debug, Deserialize)]
struct ClarificationBody {
    answer: String,
}

async fn clarify_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ClarificationBody>,
) -> ApiResult<Response> {
    let workflow_id = parse_workflow_id(&id)?;
    if body.answer.trim().is_empty() {
        return Err(ApiError::bad_request("answer must not be empty"));
    }
    let report = state.orchestrator.resume(workflow_id, body.answer).await?;
    Ok(Json(report).into_response())
}

async fn cancel_workflow(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Response> {
    let workflow_id = parse_workflow_id(&id)?;
    state.orchestrator.cancel(workflow_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"workflow_id": workflow_id, "status": "cancelled"})),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    workflow_id: Option<String>,
    limit: Option<usize>,
}

async fn list_events(State(state): State<Arc<AppState>>, Query(params): Query<EventsParams>) -> ApiResult<Response> {
    let events = &state.orchestrator.services().events;
    let listed = match params.workflow_id.as_deref() {
        Some(raw) => events.events_for(parse_workflow_id(raw)?).await,
        None => events.recent(params.limit.unwrap_or(DEFAULT_EVENT_LIMIT)).await,
    }
    .map_err(PipelineError::from)?;
    Ok(Json(listed).into_response())
}

#[derive(Debug, Deserialize)]
struct SocketParams {
    workflow_id: String,
}

async fn events_socket(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SocketParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let workflow_id = parse_workflow_id(&params.workflow_id)?;
    let receiver = state.orchestrator.services().events.subscribe(workflow_id);
    Ok(ws.on_upgrade(move |socket| push_events(socket, workflow_id, receiver)))
}

async fn push_events(mut socket: WebSocket, workflow_id: WorkflowId, mut receiver: WorkflowEventReceiver) {
    debug!(workflow_id = %workflow_id, "WebSocket subscriber connected");
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(EventBusError::Lagged(skipped)) => {
                    warn!(workflow_id = %workflow_id, skipped, "WebSocket subscriber lagged");
                }
                Err(_) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(workflow_id = %workflow_id, "WebSocket subscriber disconnected");
}

/// Server-sent events for one workflow, ending when the bus closes
async fn stream_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>> {
    let workflow_id = parse_workflow_id(&id)?;
    let receiver = state.orchestrator.services().events.subscribe(workflow_id);

    let events = stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((event, receiver)),
                Err(EventBusError::Lagged(skipped)) => {
                    warn!(workflow_id = %workflow_id, skipped, "SSE subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    });
    let events = events.map(|event| {
        SseEvent::default()
            .event(event.stage.as_str())
            .id(event.sequence.to_string())
            .json_data(&event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn list_approvals(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let pending = state.orchestrator.services().approvals.list_pending().await?;
    Ok(Json(pending).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct ResolutionBody {
    #[serde(default)]
    actor: Option<String>,
    #[serde(default, alias = "reason")]
    comment: Option<String>,
}

async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ResolutionBody>>,
) -> ApiResult<Response> {
    let id = ApprovalId::parse(&id).map_err(|_| ApiError::bad_request(format!("Invalid approval id '{}'", id)))?;
    let Json(body) = body.unwrap_or_default();
    let actor = body.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_string());
    let resolved = state.orchestrator.services().approvals.approve(id, actor, body.comment).await?;
    Ok(Json(resolved).into_response())
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ResolutionBody>>,
) -> ApiResult<Response> {
    let id = ApprovalId::parse(&id).map_err(|_| ApiError::bad_request(format!("Invalid approval id '{}'", id)))?;
    let Json(body) = body.unwrap_or_default();
    let actor = body.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_string());
    let resolved = state.orchestrator.services().approvals.reject(id, actor, body.comment).await?;
    Ok(Json(resolved).into_response())
}

async fn list_registry(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<CapabilityFilter>,
) -> ApiResult<Response> {
    let entries = state.orchestrator.services().registry.list(&filter).await?;
    Ok(Json(entries).into_response())
}

async fn register_entry(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<CapabilityDescriptor>,
) -> ApiResult<Response> {
    let id = state.orchestrator.services().registry.register(descriptor).await?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))).into_response())
}

async fn activate_entry(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<Response> {
    let entry = state.orchestrator.services().registry.activate(&name).await?;
    Ok(Json(entry).into_response())
}

async fn deprecate_entry(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<Response> {
    let entry = state.orchestrator.services().registry.deprecate(&name).await?;
    Ok(Json(entry).into_response())
}

async fn list_prompts(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let prompts = state.orchestrator.services().prompts.list_prompts().await?;
    Ok(Json(prompts).into_response())
}

async fn register_prompt(State(state): State<Arc<AppState>>, Json(prompt): Json<NewPrompt>) -> ApiResult<Response> {
    let prompt = state.orchestrator.services().prompts.register_prompt(prompt).await?;
    Ok((StatusCode::CREATED, Json(prompt)).into_response())
}

#[derive(Debug, Deserialize)]
struct AssignmentsParams {
    role: Option<String>,
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AssignmentsParams>,
) -> ApiResult<Response> {
    let role = params.role.map(ComponentRole::new);
    let assignments = state
        .orchestrator
        .services()
        .prompts
        .list_assignments(role.as_ref())
        .await?;
    Ok(Json(assignments).into_response())
}

#[derive(Debug, Deserialize)]
struct AssignmentBody {
    component_role: ComponentRole,
    #[serde(default = "global_scope")]
    scope: AssignmentScope,
    prompt_id: PromptId,
    version: u32,
    #[serde(default)]
    assigned_by: Option<String>,
}

fn global_scope() -> AssignmentScope {
    AssignmentScope::Global
}

async fn assign_prompt(State(state): State<Arc<AppState>>, Json(body): Json<AssignmentBody>) -> ApiResult<Response> {
    let assignment = state
        .orchestrator
        .services()
        .prompts
        .assign(body.component_role, body.scope, body.prompt_id, body.version, body.assigned_by)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)).into_response())
}

#[derive(Debug, Deserialize)]
struct ResolveParams {
    role: String,
    agent_id: Option<Uuid>,
    experiment_id: Option<String>,
}

async fn resolve_prompt(State(state): State<Arc<AppState>>, Query(params): Query<ResolveParams>) -> ApiResult<Response> {
    let role = ComponentRole::new(params.role);
    let resolved = state
        .orchestrator
        .services()
        .prompts
        .resolve(&role, params.agent_id.map(EntryId), params.experiment_id.as_deref())
        .await?;
    Ok(Json(resolved).into_response())
}

async fn task_context(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Response> {
    let task_id = TaskId::parse(&id).map_err(|_| ApiError::bad_request(format!("Invalid task id '{}'", id)))?;
    let context = state.orchestrator.services().twin.get_context(task_id).await?;
    Ok(Json(context.to_value()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::background::BackgroundTasks;
    use crate::application::llm_gateway::LlmGateway;
    use crate::application::orchestrator::PipelineServices;
    use crate::application::repository_factory::Repositories;
    use crate::application::stages::{PipelineStages, StageComponent};
    use crate::domain::config::{LLMSelection, PipelineConfig};
    use crate::domain::events::{DecisionSource, PipelineStage};
    use crate::domain::prompt::PromptRef;
    use crate::domain::stage::{StageError, StageOutput, StageRequest, StageResult};
    use crate::domain::task::AutonomyLevel;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::llm::ProviderRegistry;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    struct Fixed {
        stage: PipelineStage,
        output: Value,
    }

    #[async_trait]
    impl StageComponent for Fixed {
        fn stage(&self) -> PipelineStage {
            self.stage
        }

        async fn invoke(&self, _request: StageRequest) -> Result<StageResult, StageError> {
            Ok(StageResult {
                output: StageOutput::parse(self.stage, self.output.clone()).unwrap(),
                prompt: PromptRef {
                    component_role: self.stage.component_role(),
                    prompt_id: PromptId::new(),
                    version: 1,
                },
                decision_source: DecisionSource::Llm,
                attempts: 1,
                model: "fixed".into(),
            })
        }
    }

    fn orchestrator() -> Arc<PipelineOrchestrator> {
        let repositories = Repositories::in_memory();
        let services = PipelineServices::new(&repositories, Arc::new(EventBus::with_default_capacity()));
        let config = PipelineConfig {
            default_autonomy: AutonomyLevel::Autonomous,
            ..PipelineConfig::default()
        };
        let gateway = Arc::new(LlmGateway::new(Arc::new(ProviderRegistry::empty()), &LLMSelection::default()));

        let outputs = [
            (PipelineStage::Interpretation, json!({"intent": "schedule", "required_capabilities": ["calendar"]})),
            (PipelineStage::ValidatorA, json!({"status": "approved"})),
            (PipelineStage::Routing, json!({"agents": ["calendar"]})),
            (PipelineStage::Planning, json!({"goal": "book", "steps": ["find a slot"]})),
            (PipelineStage::ValidatorB, json!({"status": "approved"})),
            (PipelineStage::Execution, json!({"success": true, "output": "booked"})),
            (PipelineStage::Reflection, json!({"summary": "done"})),
        ];
        let stages = outputs.into_iter().fold(
            PipelineStages::standard(services.prompts.clone(), gateway, &config),
            |stages, (stage, output)| stages.with(Arc::new(Fixed { stage, output })),
        );

        Arc::new(PipelineOrchestrator::new(stages, services, config, BackgroundTasks::new()))
    }

    async fn call(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn calendar() -> Value {
        json!({"name": "calendar", "kind": "tool", "capabilities": ["calendar"], "activate": true})
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app(orchestrator()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_conflict() {
        let router = app(orchestrator());
        let (status, _) = call(router.clone(), "POST", "/api/registry", Some(calendar())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(router, "POST", "/api/registry", Some(calendar())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "REGISTRY_CONFLICT");
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_not_found() {
        let uri = format!("/api/workflows/{}", Uuid::new_v4());
        let (status, body) = call(app(orchestrator()), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, _) = call(app(orchestrator()), "GET", "/api/workflows/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_synchronous_request_returns_report() {
        let router = app(orchestrator());
        call(router.clone(), "POST", "/api/registry", Some(calendar())).await;

        let (status, report) = call(
            router.clone(),
            "POST",
            "/api/requests?wait=true",
            Some(json!({"request": "book a meeting room"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["status"], "completed");
        assert_eq!(report["events"].as_array().unwrap().len(), 7);

        let uri = format!("/api/events?workflow_id={}", report["workflow_id"].as_str().unwrap());
        let (status, events) = call(router.clone(), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(events.as_array().unwrap().len(), 7);

        let uri = format!("/api/tasks/{}/context", report["task_id"].as_str().unwrap());
        let (_, context) = call(router, "GET", &uri, None).await;
        assert_eq!(context["original_user_request"], "book a meeting room");
        assert_eq!(context["reflection"]["summary"], "done");
    }

    #[tokio::test]
    async fn test_empty_request_is_unprocessable() {
        let (status, body) = call(
            app(orchestrator()),
            "POST",
            "/api/requests",
            Some(json!({"request": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_infrastructure_role_cannot_resolve_prompt() {
        let (status, body) = call(
            app(orchestrator()),
            "GET",
            "/api/prompts/resolve?role=sandbox",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "PROMPT_RESOLUTION_ERROR");
    }

    #[tokio::test]
    async fn test_stream_opens_event_stream() {
        let uri = format!("/api/workflows/{}/stream", Uuid::new_v4());
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app(orchestrator()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let (status, _) = call(app(orchestrator()), "GET", "/api/workflows/nope/stream", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
