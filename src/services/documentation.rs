use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Quiz Live Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::get_view,
        crate::routes::sessions::join_session,
        crate::routes::sessions::begin_countdown,
        crate::routes::sessions::start_session,
        crate::routes::sessions::end_session,
        crate::routes::sessions::exit_session,
        crate::routes::sessions::submit_answer,
        crate::routes::sessions::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::phase::VisibleSessionPhase,
            crate::dto::phase::VisibleSyncStatus,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::CreatedSessionResponse,
            crate::dto::session::JoinSessionRequest,
            crate::dto::session::SubmitAnswerRequest,
            crate::dto::session::SessionSummary,
            crate::dto::session::PlayerSummary,
            crate::dto::session::AnswerSummary,
            crate::dto::session::PlayerProgressSummary,
            crate::dto::session::SessionViewResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session lookup, roster and answers"),
        (name = "host", description = "Host-only lifecycle intents, authenticated by `X-Host-Token`"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_session_route() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        for path in [
            "/healthcheck",
            "/sessions",
            "/sessions/{code}",
            "/sessions/{code}/view",
            "/sessions/{code}/players",
            "/sessions/{code}/countdown",
            "/sessions/{code}/start",
            "/sessions/{code}/end",
            "/sessions/{code}/exit",
            "/sessions/{code}/answers",
            "/sessions/{code}/stream",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
    }
}
