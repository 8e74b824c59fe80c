use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Question index used by answers that are not tied to a quiz question
/// (bonus / mini-game score increments).
pub const BONUS_QUESTION_INDEX: i32 = -1;

/// Durable record of a hosted game session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Server-assigned identifier.
    pub id: Uuid,
    /// Human facing join code (6 uppercase alphanumeric characters).
    pub join_code: String,
    /// Opaque token proving the host role for lifecycle intents.
    pub host_token: Uuid,
    /// Quiz catalog entry this session plays.
    pub quiz_id: Uuid,
    /// Configured time limit in seconds.
    pub time_limit_secs: u32,
    /// Number of questions played in this session.
    pub question_count: u32,
    /// True while the quiz is running.
    pub is_started: bool,
    /// True once the session reached its terminal state.
    pub finished: bool,
    /// Epoch milliseconds at which the quiz started, set once per session.
    pub quiz_start_time: Option<i64>,
    /// Epoch milliseconds at which the pre-start countdown began.
    pub countdown_start_ms: Option<i64>,
    /// Creation timestamp (epoch milliseconds).
    pub created_at_ms: i64,
}

/// Parameters required to create a session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Quiz catalog entry this session plays.
    pub quiz_id: Uuid,
    /// Join code chosen by the caller; must not be held by an active session.
    pub join_code: String,
    /// Configured time limit in seconds.
    pub time_limit_secs: u32,
    /// Number of questions played in this session.
    pub question_count: u32,
}

/// Participant record, many-to-one with a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Client generated identifier.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Display name chosen by the player.
    pub name: String,
    /// Avatar image URL.
    pub avatar_url: String,
    /// Join timestamp (epoch milliseconds), defines the stable roster order.
    pub joined_at_ms: i64,
}

/// Append-only scoring event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Record identifier.
    pub id: Uuid,
    /// Player who scored.
    pub player_id: Uuid,
    /// Session the answer belongs to.
    pub session_id: Uuid,
    /// Zero-based question position, negative for bonus increments.
    pub question_index: i32,
    /// Points earned, may be zero.
    pub points: i32,
    /// Insertion timestamp (epoch milliseconds).
    pub created_at_ms: i64,
}

/// Narrow, single-purpose update applied to a session record.
///
/// `None` leaves a field untouched; for nullable timestamps `Some(None)`
/// clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// New value for `is_started`.
    pub is_started: Option<bool>,
    /// New value for `finished`.
    pub finished: Option<bool>,
    /// New value for `quiz_start_time`.
    pub quiz_start_time: Option<Option<i64>>,
    /// New value for `countdown_start_ms`.
    pub countdown_start_ms: Option<Option<i64>>,
    /// Start epoch written only when `quiz_start_time` is still unset.
    pub quiz_start_time_if_unset: Option<i64>,
    /// Skip the whole patch when the stored session is already finished.
    pub unless_finished: bool,
}

impl SessionPatch {
    /// True when the patch would not touch any field.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Whether the stored record satisfies the patch's write conditions.
    pub fn admits(&self, session: &SessionEntity) -> bool {
        !(self.unless_finished && session.finished)
    }

    /// Apply the patch to an in-memory record. Write conditions are not
    /// checked here, see [`SessionPatch::admits`].
    pub fn apply_to(&self, session: &mut SessionEntity) {
        if let Some(value) = self.is_started {
            session.is_started = value;
        }
        if let Some(value) = self.finished {
            session.finished = value;
        }
        if let Some(value) = self.quiz_start_time {
            session.quiz_start_time = value;
        }
        if let Some(value) = self.countdown_start_ms {
            session.countdown_start_ms = value;
        }
        if let (Some(value), None) = (self.quiz_start_time_if_unset, session.quiz_start_time) {
            session.quiz_start_time = Some(value);
        }
    }
}

/// Result of a session update: the record after the patch and whether any
/// field actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Session record after the update.
    pub session: SessionEntity,
    /// False when the patch was already reflected in the stored record.
    pub changed: bool,
}

/// Selects which players of a session a delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerFilter {
    /// Every player of the session.
    All,
    /// Only the listed players.
    Ids(Vec<Uuid>),
}

impl PlayerFilter {
    /// Whether the given player id is selected by this filter.
    pub fn matches(&self, id: &Uuid) -> bool {
        match self {
            PlayerFilter::All => true,
            PlayerFilter::Ids(ids) => ids.contains(id),
        }
    }
}

/// Key used to look a session up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    /// Internal identifier.
    Id(Uuid),
    /// Human facing join code.
    JoinCode(String),
}

impl std::fmt::Display for SessionLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionLookup::Id(id) => write!(f, "id `{id}`"),
            SessionLookup::JoinCode(code) => write!(f, "join code `{code}`"),
        }
    }
}
