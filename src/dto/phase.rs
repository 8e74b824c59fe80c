use serde::Serialize;
use utoipa::ToSchema;

use crate::{services::reconciliation::SyncStatus, state::state_machine::SessionPhase};

/// Publicly visible session phase exposed to clients (REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleSessionPhase {
    /// Lobby, players joining.
    Waiting,
    /// Pre-start countdown running.
    Countdown,
    /// Quiz running.
    Started,
    /// Quiz over.
    Finished,
}

impl From<SessionPhase> for VisibleSessionPhase {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::Waiting => VisibleSessionPhase::Waiting,
            SessionPhase::Countdown => VisibleSessionPhase::Countdown,
            SessionPhase::Started => VisibleSessionPhase::Started,
            SessionPhase::Finished => VisibleSessionPhase::Finished,
        }
    }
}

/// Freshness of a streamed view.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleSyncStatus {
    /// Waiting for the first read.
    Loading,
    /// Up to date.
    Live,
    /// Showing the last known state while reads fail.
    Stale,
    /// Session no longer exists.
    Gone,
}

impl From<SyncStatus> for VisibleSyncStatus {
    fn from(value: SyncStatus) -> Self {
        match value {
            SyncStatus::Loading => VisibleSyncStatus::Loading,
            SyncStatus::Live => VisibleSyncStatus::Live,
            SyncStatus::Stale => VisibleSyncStatus::Stale,
            SyncStatus::Gone => VisibleSyncStatus::Gone,
        }
    }
}
