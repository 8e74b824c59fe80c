use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        format_epoch_ms,
        phase::{VisibleSessionPhase, VisibleSyncStatus},
        validation::validate_display_name,
    },
    services::{
        progress::{self, PlayerProgress},
        reconciliation::SessionView,
        session_service::{CreateSession, JoinSession, SessionSnapshot},
    },
    state::{
        session::{Answer, Player, Session},
        state_machine::SessionPhase,
        timer::remaining_secs,
    },
};

/// Payload used to open a new session for a quiz.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Quiz to play.
    pub quiz_id: Uuid,
    /// Time limit for the whole quiz, in seconds.
    #[validate(range(min = 1))]
    pub time_limit_secs: u32,
    /// Number of questions to play.
    #[validate(range(min = 1))]
    pub question_count: u32,
    /// Questions available in the quiz.
    pub available_questions: u32,
}

impl From<CreateSessionRequest> for CreateSession {
    fn from(value: CreateSessionRequest) -> Self {
        Self {
            quiz_id: value.quiz_id,
            time_limit_secs: value.time_limit_secs,
            question_count: value.question_count,
            available_questions: value.available_questions,
        }
    }
}

/// Payload sent by a player joining a session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinSessionRequest {
    /// Client generated player id. Reusing an id re-joins.
    #[serde(default)]
    pub player_id: Option<Uuid>,
    /// Display name.
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    /// Avatar image URL.
    #[validate(url)]
    pub avatar_url: String,
}

impl From<JoinSessionRequest> for JoinSession {
    fn from(value: JoinSessionRequest) -> Self {
        Self {
            player_id: value.player_id,
            name: value.name,
            avatar_url: value.avatar_url,
        }
    }
}

/// Answer submitted by a player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    /// Answering player.
    pub player_id: Uuid,
    /// Zero-based question index; negative for a bonus increment.
    pub question_index: i32,
    /// Points earned.
    pub points: i32,
}

/// Credentials a stream subscriber may present.
#[derive(Debug, Deserialize, IntoParams)]
pub struct StreamQuery {
    /// Host token returned at creation.
    pub host_token: Option<Uuid>,
    /// Joined player id.
    pub player_id: Option<Uuid>,
}

/// Public session metadata.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: Uuid,
    /// Join code players type in.
    pub join_code: String,
    /// Quiz played.
    pub quiz_id: Uuid,
    /// Lifecycle phase.
    pub phase: VisibleSessionPhase,
    /// Time limit in seconds.
    pub time_limit_secs: u32,
    /// Number of questions.
    pub question_count: u32,
    /// Quiz start epoch in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_start_time: Option<i64>,
    /// Countdown start epoch in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_start_ms: Option<i64>,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            join_code: session.join_code.clone(),
            quiz_id: session.quiz_id,
            phase: session.phase().into(),
            time_limit_secs: session.time_limit_secs,
            question_count: session.question_count,
            quiz_start_time: session.quiz_start_time,
            countdown_start_ms: session.countdown_start_ms,
            created_at: format_epoch_ms(session.created_at_ms),
        }
    }
}

/// Returned to the host after creating a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedSessionResponse {
    /// Created session.
    pub session: SessionSummary,
    /// Secret to present in `X-Host-Token` for host actions.
    pub host_token: Uuid,
}

/// Joined player.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct PlayerSummary {
    /// Player identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Avatar image URL.
    pub avatar_url: String,
    /// Join time (RFC 3339).
    pub joined_at: String,
}

impl From<&Player> for PlayerSummary {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            avatar_url: player.avatar_url.clone(),
            joined_at: format_epoch_ms(player.joined_at_ms),
        }
    }
}

/// Recorded answer.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerSummary {
    /// Record identifier.
    pub id: Uuid,
    /// Answering player.
    pub player_id: Uuid,
    /// Question index, negative for bonus.
    pub question_index: i32,
    /// Points earned.
    pub points: i32,
}

impl From<Answer> for AnswerSummary {
    fn from(answer: Answer) -> Self {
        Self {
            id: answer.id,
            player_id: answer.player_id,
            question_index: answer.question_index,
            points: answer.points,
        }
    }
}

/// One leaderboard row.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct PlayerProgressSummary {
    /// Player identifier.
    pub player_id: Uuid,
    /// Display name.
    pub name: String,
    /// Avatar image URL.
    pub avatar_url: String,
    /// Total points.
    pub score: i64,
    /// Real questions answered.
    pub answered_count: u32,
    /// Question the player is on, for progress bars.
    pub current_question_display: u32,
    /// Whether questions remain.
    pub is_active: bool,
    /// Position in this ordering.
    pub rank: u32,
}

impl From<&PlayerProgress> for PlayerProgressSummary {
    fn from(value: &PlayerProgress) -> Self {
        Self {
            player_id: value.player_id,
            name: value.name.clone(),
            avatar_url: value.avatar_url.clone(),
            score: value.score,
            answered_count: value.answered_count,
            current_question_display: value.current_question_display,
            is_active: value.is_active,
            rank: value.rank,
        }
    }
}

/// Everything a screen renders for a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionViewResponse {
    /// Freshness of this view.
    pub status: VisibleSyncStatus,
    /// Session metadata, absent until the first read succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
    /// Live leaderboard, progress first.
    pub leaderboard: Vec<PlayerProgressSummary>,
    /// Score-only finale ordering, once the session is finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub podium: Option<Vec<PlayerProgressSummary>>,
    /// Quiz seconds left, while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u32>,
    /// Countdown seconds left, while counting down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_remaining: Option<u32>,
    /// Connected clients.
    pub present: usize,
    /// Navigation index of the streaming player.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<u32>,
    /// Whether the backend runs without storage.
    pub degraded: bool,
}

impl SessionViewResponse {
    /// One-shot view built from a fresh snapshot.
    pub fn from_snapshot(
        snapshot: &SessionSnapshot,
        present: usize,
        countdown_secs: u32,
        now_ms: i64,
        degraded: bool,
    ) -> Self {
        let session = &snapshot.session;
        let phase = session.phase();
        let time_remaining = (phase == SessionPhase::Started)
            .then_some(session.quiz_start_time)
            .flatten()
            .map(|start| remaining_secs(session.time_limit_secs, start, now_ms));
        let countdown_remaining = (phase == SessionPhase::Countdown)
            .then_some(session.countdown_start_ms)
            .flatten()
            .map(|start| remaining_secs(countdown_secs, start, now_ms));

        Self {
            status: VisibleSyncStatus::Live,
            session: Some(session.into()),
            leaderboard: summarize(&snapshot.standings),
            podium: podium(phase, &snapshot.standings),
            time_remaining,
            countdown_remaining,
            present,
            current_question: None,
            degraded,
        }
    }

    /// View published by a reconciliation context.
    pub fn from_view(view: &SessionView, player_stream: bool, degraded: bool) -> Self {
        let phase = view.phase();
        Self {
            status: view.status.into(),
            session: view.session().map(Into::into),
            leaderboard: summarize(view.standings()),
            podium: phase.and_then(|phase| podium(phase, view.standings())),
            time_remaining: view.time_remaining,
            countdown_remaining: view.countdown_remaining,
            present: view.present,
            current_question: player_stream.then_some(view.current_question),
            degraded,
        }
    }
}

fn summarize(standings: &[PlayerProgress]) -> Vec<PlayerProgressSummary> {
    standings.iter().map(Into::into).collect()
}

fn podium(phase: SessionPhase, standings: &[PlayerProgress]) -> Option<Vec<PlayerProgressSummary>> {
    (phase == SessionPhase::Finished)
        .then(|| summarize(&progress::rank_by_score(standings.to_vec())))
}
