/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Leaderboard aggregation and orderings.
pub mod progress;
/// Client-side reconciliation of a session view.
pub mod reconciliation;
/// Session lifecycle, roster and answer operations.
pub mod session_service;
/// Server-Sent Events streaming of reconciled views.
pub mod sse_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;
