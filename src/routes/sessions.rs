use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    routing::{get, post},
};
use axum_valid::Valid;
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::session::{
        AnswerSummary, CreateSessionRequest, CreatedSessionResponse, JoinSessionRequest,
        PlayerSummary, SessionSummary, SessionViewResponse, StreamQuery, SubmitAnswerRequest,
    },
    error::AppError,
    events::EventChannel,
    services::{
        session_service::{SessionService, resolve_role},
        sse_service,
    },
    state::{SharedState, state_machine::Role, timer::now_ms},
};

const HOST_TOKEN_HEADER: &str = "x-host-token";

/// Session lifecycle, roster and answer endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{code}", get(get_session))
        .route("/sessions/{code}/view", get(get_view))
        .route("/sessions/{code}/players", post(join_session))
        .route("/sessions/{code}/countdown", post(begin_countdown))
        .route("/sessions/{code}/start", post(start_session))
        .route("/sessions/{code}/end", post(end_session))
        .route("/sessions/{code}/exit", post(exit_session))
        .route("/sessions/{code}/answers", post(submit_answer))
        .route("/sessions/{code}/stream", get(session_stream))
}

/// Open a new session and hand the host its token.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = CreatedSessionResponse),
        (status = 400, description = "Invalid session parameters")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreatedSessionResponse>), AppError> {
    let service = state.session_service().await?;
    let session = service.create_session(payload.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedSessionResponse {
            session: (&session).into(),
            host_token: session.host_token,
        }),
    ))
}

/// Resolve a join code.
#[utoipa::path(
    get,
    path = "/sessions/{code}",
    tag = "sessions",
    params(("code" = String, Path, description = "Join code")),
    responses(
        (status = 200, description = "Session", body = SessionSummary),
        (status = 404, description = "Unknown join code")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    let service = state.session_service().await?;
    let session = service.find_session(&code).await?;
    Ok(Json((&session).into()))
}

/// Read the session, leaderboard and timers once.
#[utoipa::path(
    get,
    path = "/sessions/{code}/view",
    tag = "sessions",
    params(("code" = String, Path, description = "Join code")),
    responses((status = 200, description = "Current view", body = SessionViewResponse))
)]
pub async fn get_view(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionViewResponse>, AppError> {
    let service = state.session_service().await?;
    let session = service.find_session(&code).await?;
    let snapshot = service.load_snapshot(session.id).await?;
    Ok(Json(SessionViewResponse::from_snapshot(
        &snapshot,
        state.channel().present(session.id),
        state.config().countdown_secs,
        now_ms(),
        state.is_degraded(),
    )))
}

/// Join a session as a player.
#[utoipa::path(
    post,
    path = "/sessions/{code}/players",
    tag = "sessions",
    params(("code" = String, Path, description = "Join code")),
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Player joined", body = PlayerSummary),
        (status = 409, description = "Session already finished")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<Json<PlayerSummary>, AppError> {
    let service = state.session_service().await?;
    let session = service.find_session(&code).await?;
    let player = service.join_session(session.id, payload.into()).await?;
    Ok(Json((&player).into()))
}

/// Begin the pre-start countdown.
#[utoipa::path(
    post,
    path = "/sessions/{code}/countdown",
    tag = "host",
    params(
        ("X-Host-Token" = String, Header, description = "Host token returned at creation"),
        ("code" = String, Path, description = "Join code")
    ),
    responses(
        (status = 200, description = "Countdown running", body = SessionSummary),
        (status = 409, description = "Transition rejected")
    )
)]
pub async fn begin_countdown(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionSummary>, AppError> {
    let (service, session_id, role) = host_request(&state, &code, &headers).await?;
    let session = service.request_countdown(session_id, role).await?;
    Ok(Json((&session).into()))
}

/// Start the quiz.
#[utoipa::path(
    post,
    path = "/sessions/{code}/start",
    tag = "host",
    params(
        ("X-Host-Token" = String, Header, description = "Host token returned at creation"),
        ("code" = String, Path, description = "Join code")
    ),
    responses(
        (status = 200, description = "Quiz running", body = SessionSummary),
        (status = 409, description = "Transition rejected")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionSummary>, AppError> {
    let (service, session_id, role) = host_request(&state, &code, &headers).await?;
    let session = service.request_start(session_id, role).await?;
    Ok(Json((&session).into()))
}

/// End the quiz.
#[utoipa::path(
    post,
    path = "/sessions/{code}/end",
    tag = "host",
    params(
        ("X-Host-Token" = String, Header, description = "Host token returned at creation"),
        ("code" = String, Path, description = "Join code")
    ),
    responses(
        (status = 200, description = "Quiz finished", body = SessionSummary),
        (status = 409, description = "Transition rejected")
    )
)]
pub async fn end_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionSummary>, AppError> {
    let (service, session_id, role) = host_request(&state, &code, &headers).await?;
    let session = service.request_end(session_id, role).await?;
    Ok(Json((&session).into()))
}

/// Close the session and remove its players.
#[utoipa::path(
    post,
    path = "/sessions/{code}/exit",
    tag = "host",
    params(
        ("X-Host-Token" = String, Header, description = "Host token returned at creation"),
        ("code" = String, Path, description = "Join code")
    ),
    responses(
        (status = 200, description = "Session closed", body = SessionSummary),
        (status = 409, description = "Transition rejected")
    )
)]
pub async fn exit_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionSummary>, AppError> {
    let (service, session_id, role) = host_request(&state, &code, &headers).await?;
    let session = service.request_exit(session_id, role).await?;
    info!(session_id = %session_id, "host left session");
    Ok(Json((&session).into()))
}

/// Record an answer for a joined player.
#[utoipa::path(
    post,
    path = "/sessions/{code}/answers",
    tag = "sessions",
    params(("code" = String, Path, description = "Join code")),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = AnswerSummary),
        (status = 409, description = "Quiz not running")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<AnswerSummary>, AppError> {
    let service = state.session_service().await?;
    let session = service.find_session(&code).await?;
    let answer = service
        .submit_answer(
            session.id,
            payload.player_id,
            payload.question_index,
            payload.points,
        )
        .await?;
    Ok(Json(answer.into()))
}

/// Stream the reconciled session view. The stream's reconciliation context
/// also drives automatic finishing and, for the host, the countdown start.
#[utoipa::path(
    get,
    path = "/sessions/{code}/stream",
    tag = "sse",
    params(("code" = String, Path, description = "Join code"), StreamQuery),
    responses((status = 200, description = "Session view stream", content_type = "text/event-stream", body = String))
)]
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let service = state.session_service().await?;
    let session = service.find_session(&code).await?;
    let role = resolve_role(&session, query.host_token, query.player_id);
    let context = sse_service::open_session_context(&state, session.id, role).await?;
    info!(session_id = %session.id, role = ?role, "new session SSE connection");
    Ok(sse_service::to_sse_stream(context, state.degraded_watcher()))
}

async fn host_request(
    state: &SharedState,
    code: &str,
    headers: &HeaderMap,
) -> Result<(SessionService, Uuid, Role), AppError> {
    let token = headers
        .get(HOST_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing host token header `X-Host-Token`".into()))?;
    let token = Uuid::parse_str(token.trim())
        .map_err(|_| AppError::Unauthorized("malformed host token".into()))?;

    let service = state.session_service().await?;
    let session = service.find_session(code).await?;
    let role = resolve_role(&session, Some(token), None);
    Ok((service, session.id, role))
}
