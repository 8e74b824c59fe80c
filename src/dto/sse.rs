use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// SSE event name of [`Handshake`].
pub const HANDSHAKE_EVENT: &str = "handshake";
/// SSE event name of a serialized session view.
pub const VIEW_EVENT: &str = "view";
/// SSE event name of [`SystemStatus`].
pub const SYSTEM_STATUS_EVENT: &str = "system_status";

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Session the stream follows.
    pub session_id: Uuid,
    /// Role resolved from the presented credentials (`host`, `player` or `observer`).
    pub role: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    /// Current degraded flag.
    pub degraded: bool,
}
