use uuid::Uuid;

use crate::{
    dao::models::{AnswerEntity, PlayerEntity, SessionEntity},
    state::state_machine::SessionPhase,
};

/// Client-side cached copy of a session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Server-assigned identifier.
    pub id: Uuid,
    /// Human facing join code.
    pub join_code: String,
    /// Token proving the host role.
    pub host_token: Uuid,
    /// Quiz played in this session.
    pub quiz_id: Uuid,
    /// Configured time limit in seconds.
    pub time_limit_secs: u32,
    /// Number of questions played.
    pub question_count: u32,
    /// True while the quiz runs.
    pub is_started: bool,
    /// True once terminal.
    pub finished: bool,
    /// Epoch milliseconds at which the quiz started.
    pub quiz_start_time: Option<i64>,
    /// Epoch milliseconds at which the pre-start countdown began.
    pub countdown_start_ms: Option<i64>,
    /// Creation timestamp.
    pub created_at_ms: i64,
}

impl Session {
    /// Lifecycle phase derived from the stored flags.
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_flags(self.finished, self.is_started, self.countdown_start_ms)
    }
}

/// Joined participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Client generated identifier.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Display name.
    pub name: String,
    /// Avatar image URL.
    pub avatar_url: String,
    /// Join timestamp.
    pub joined_at_ms: i64,
}

/// Scoring event submitted by a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Record identifier.
    pub id: Uuid,
    /// Scoring player.
    pub player_id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Zero-based question index, negative for bonus increments.
    pub question_index: i32,
    /// Points earned.
    pub points: i32,
    /// Insertion timestamp.
    pub created_at_ms: i64,
}

impl Answer {
    /// Whether this answer responds to a real quiz question.
    pub fn is_question(&self) -> bool {
        self.question_index >= 0
    }

    /// Whether this answer is a bonus increment.
    pub fn is_bonus(&self) -> bool {
        !self.is_question()
    }
}

impl From<SessionEntity> for Session {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id,
            join_code: value.join_code,
            host_token: value.host_token,
            quiz_id: value.quiz_id,
            time_limit_secs: value.time_limit_secs,
            question_count: value.question_count,
            is_started: value.is_started,
            finished: value.finished,
            quiz_start_time: value.quiz_start_time,
            countdown_start_ms: value.countdown_start_ms,
            created_at_ms: value.created_at_ms,
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            session_id: value.session_id,
            name: value.name,
            avatar_url: value.avatar_url,
            joined_at_ms: value.joined_at_ms,
        }
    }
}

impl From<Player> for PlayerEntity {
    fn from(value: Player) -> Self {
        Self {
            id: value.id,
            session_id: value.session_id,
            name: value.name,
            avatar_url: value.avatar_url,
            joined_at_ms: value.joined_at_ms,
        }
    }
}

impl From<AnswerEntity> for Answer {
    fn from(value: AnswerEntity) -> Self {
        Self {
            id: value.id,
            player_id: value.player_id,
            session_id: value.session_id,
            question_index: value.question_index,
            points: value.points,
            created_at_ms: value.created_at_ms,
        }
    }
}

impl From<Answer> for AnswerEntity {
    fn from(value: Answer) -> Self {
        Self {
            id: value.id,
            player_id: value.player_id,
            session_id: value.session_id,
            question_index: value.question_index,
            points: value.points,
            created_at_ms: value.created_at_ms,
        }
    }
}
