//! Lifecycle intents and reads against the session store.
//!
//! Every transition is planned against a fresh read of the session, then
//! written as a narrow patch whose conditions the store re-checks. The store
//! decides races: of two concurrent identical writes only one reports a
//! change, and a write that lost its condition reports none.

use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{AnswerEntity, NewSession, PlayerEntity, PlayerFilter, SessionLookup},
        session_store::SessionStore,
        storage::StorageError,
    },
    error::ServiceError,
    services::progress::{self, PlayerProgress},
    state::{
        session::{Answer, Player, Session},
        state_machine::{
            FinishReason, Plan, Role, SessionEvent, SessionPhase, TransitionContext,
            plan_transition,
        },
        timer::{now_ms, remaining_secs},
    },
};

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const JOIN_CODE_LENGTH: usize = 6;
const MAX_NAME_CHARS: usize = 32;

/// Parameters of a new session.
#[derive(Debug, Clone)]
pub struct CreateSession {
    /// Quiz to play.
    pub quiz_id: Uuid,
    /// Time limit in seconds.
    pub time_limit_secs: u32,
    /// Number of questions to play.
    pub question_count: u32,
    /// Questions available in the quiz.
    pub available_questions: u32,
}

/// Player identity presented when joining.
#[derive(Debug, Clone)]
pub struct JoinSession {
    /// Client generated id; generated here when absent.
    pub player_id: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Avatar image URL.
    pub avatar_url: String,
}

/// Everything a client renders, read in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session record.
    pub session: Session,
    /// Roster in join order.
    pub players: Vec<Player>,
    /// Every answer of the session.
    pub answers: Vec<Answer>,
    /// Live leaderboard.
    pub standings: Vec<PlayerProgress>,
}

impl SessionSnapshot {
    /// Whether every joined player has answered every question.
    pub fn all_players_finished(&self) -> bool {
        progress::all_players_finished(&self.standings, self.session.question_count)
    }
}

/// Session lifecycle operations bound to one store.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    transition_timeout: Duration,
    join_code_attempts: u32,
}

impl SessionService {
    /// Build a service over `store` using limits from `config`.
    pub fn new(store: Arc<dyn SessionStore>, config: &AppConfig) -> Self {
        Self {
            store,
            transition_timeout: config.transition_timeout(),
            join_code_attempts: config.join_code_attempts.max(1),
        }
    }

    /// Create a session with a fresh join code.
    pub async fn create_session(&self, request: CreateSession) -> Result<Session, ServiceError> {
        validate_create(&request)?;

        for attempt in 0..self.join_code_attempts {
            let join_code = generate_join_code();
            let created = self
                .bounded(self.store.create_session(NewSession {
                    quiz_id: request.quiz_id,
                    join_code: join_code.clone(),
                    time_limit_secs: request.time_limit_secs,
                    question_count: request.question_count,
                }))
                .await?;
            let session: Session = match created {
                Ok(entity) => entity.into(),
                Err(StorageError::Conflict(_)) => {
                    debug!(attempt, join_code = %join_code, "join code collision; retrying");
                    continue;
                }
                Err(err) => return Err(ServiceError::write("create session")(err)),
            };
            info!(
                session_id = %session.id,
                join_code = %session.join_code,
                question_count = session.question_count,
                "session created"
            );
            return Ok(session);
        }

        warn!(
            attempts = self.join_code_attempts,
            "exhausted join code attempts"
        );
        Err(ServiceError::WriteFailed {
            action: "create session",
            source: StorageError::Missing("free join code".into()),
        })
    }

    /// Resolve a join code to its session.
    pub async fn find_session(&self, join_code: &str) -> Result<Session, ServiceError> {
        let code = normalize_join_code(join_code);
        self.store
            .read_session(SessionLookup::JoinCode(code.clone()))
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::NotFound(format!("session `{code}` not found")))
    }

    /// Load a session by id.
    pub async fn get_session(&self, session_id: Uuid) -> Result<Session, ServiceError> {
        self.store
            .read_session(SessionLookup::Id(session_id))
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))
    }

    /// Add a player to a session. Joining again with the same id keeps the
    /// original join position.
    pub async fn join_session(
        &self,
        session_id: Uuid,
        request: JoinSession,
    ) -> Result<Player, ServiceError> {
        let name = request.name.trim().to_owned();
        let name_chars = name.chars().count();
        if name_chars == 0 || name_chars > MAX_NAME_CHARS {
            return Err(ServiceError::InvalidInput(format!(
                "player name must be between 1 and {MAX_NAME_CHARS} characters"
            )));
        }

        let session = self.get_session(session_id).await?;
        if session.finished {
            return Err(ServiceError::InvalidTransition(
                "session already finished".into(),
            ));
        }

        let player_id = request.player_id.unwrap_or_else(Uuid::new_v4);
        let roster = self.store.list_players(session_id).await?;
        let joined_at_ms = roster
            .iter()
            .find(|player| player.id == player_id)
            .map(|player| player.joined_at_ms)
            .unwrap_or_else(now_ms);

        let player = Player {
            id: player_id,
            session_id,
            name,
            avatar_url: request.avatar_url,
            joined_at_ms,
        };
        self.store
            .insert_player(PlayerEntity::from(player.clone()))
            .await
            .map_err(ServiceError::write("join session"))?;
        info!(session_id = %session_id, player_id = %player_id, "player joined");
        Ok(player)
    }

    /// Move a waiting session into the pre-start countdown.
    pub async fn request_countdown(
        &self,
        session_id: Uuid,
        role: Role,
    ) -> Result<Session, ServiceError> {
        self.transition(session_id, SessionEvent::BeginCountdown, role, "start countdown")
            .await
    }

    /// Start the quiz. Starting twice keeps the first start time.
    pub async fn request_start(&self, session_id: Uuid, role: Role) -> Result<Session, ServiceError> {
        self.transition(session_id, SessionEvent::Start, role, "start quiz")
            .await
    }

    /// End the quiz on behalf of the host.
    pub async fn request_end(&self, session_id: Uuid, role: Role) -> Result<Session, ServiceError> {
        self.transition(
            session_id,
            SessionEvent::Finish(FinishReason::HostEnded),
            role,
            "end quiz",
        )
        .await
    }

    /// Close the session and remove its players.
    pub async fn request_exit(&self, session_id: Uuid, role: Role) -> Result<Session, ServiceError> {
        self.transition(session_id, SessionEvent::Exit, role, "exit session")
            .await
    }

    /// Finish the session when every player answered every question.
    ///
    /// Returns whether this call performed the finishing write. Calling it
    /// on an already finished session performs no write.
    pub async fn finish_if_complete(&self, snapshot: &SessionSnapshot) -> Result<bool, ServiceError> {
        if snapshot.session.phase() != SessionPhase::Started || !snapshot.all_players_finished() {
            return Ok(false);
        }
        self.finish_automatically(snapshot.session.id, FinishReason::AllPlayersFinished)
            .await
    }

    /// Finish the session once its time limit elapsed.
    ///
    /// Returns whether this call performed the finishing write.
    pub async fn expire_session(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        let session = self.get_session(session_id).await?;
        if session.phase() != SessionPhase::Started {
            return Ok(false);
        }
        if let Some(start) = session.quiz_start_time {
            let remaining = remaining_secs(session.time_limit_secs, start, now_ms());
            if remaining > 0 {
                return Err(ServiceError::InvalidTransition(format!(
                    "{remaining}s left before the time limit"
                )));
            }
        }
        self.finish_automatically(session_id, FinishReason::TimeExpired)
            .await
    }

    /// Record an answer. Negative question indexes are bonus increments.
    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        player_id: Uuid,
        question_index: i32,
        points: i32,
    ) -> Result<Answer, ServiceError> {
        let session = self.get_session(session_id).await?;
        if session.phase() != SessionPhase::Started {
            return Err(ServiceError::InvalidTransition(
                "answers are only accepted while the quiz runs".into(),
            ));
        }
        if question_index >= 0 && question_index as u32 >= session.question_count {
            return Err(ServiceError::InvalidInput(format!(
                "question index {question_index} out of range (0..{})",
                session.question_count
            )));
        }

        let roster = self.store.list_players(session_id).await?;
        if !roster.iter().any(|player| player.id == player_id) {
            return Err(ServiceError::NotFound(format!(
                "player `{player_id}` not found in session"
            )));
        }

        let answer = Answer {
            id: Uuid::new_v4(),
            player_id,
            session_id,
            question_index,
            points,
            created_at_ms: now_ms(),
        };
        self.store
            .insert_answer(AnswerEntity::from(answer.clone()))
            .await
            .map_err(ServiceError::write("submit answer"))?;
        debug!(
            session_id = %session_id,
            player_id = %player_id,
            question_index,
            points,
            "answer recorded"
        );
        Ok(answer)
    }

    /// Read the session, its roster and answers, and derive the standings.
    pub async fn load_snapshot(&self, session_id: Uuid) -> Result<SessionSnapshot, ServiceError> {
        let (session, players, answers) = tokio::try_join!(
            self.store.read_session(SessionLookup::Id(session_id)),
            self.store.list_players(session_id),
            self.store.list_answers(session_id),
        )?;
        let session: Session = session
            .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))?
            .into();
        let players: Vec<Player> = players.into_iter().map(Into::into).collect();
        let answers: Vec<Answer> = answers.into_iter().map(Into::into).collect();
        let standings = progress::aggregate(&players, &answers, session.question_count);

        Ok(SessionSnapshot {
            session,
            players,
            answers,
            standings,
        })
    }

    async fn finish_automatically(
        &self,
        session_id: Uuid,
        reason: FinishReason,
    ) -> Result<bool, ServiceError> {
        let session = self.get_session(session_id).await?;
        let context = TransitionContext {
            role: Role::Observer,
            player_count: 0,
            now_ms: now_ms(),
        };
        let plan = plan_transition(&session, SessionEvent::Finish(reason), &context)?;
        if plan.is_noop() {
            return Ok(false);
        }
        let (_, changed) = self.execute(&session, plan, "finish quiz").await?;
        Ok(changed)
    }

    async fn transition(
        &self,
        session_id: Uuid,
        event: SessionEvent,
        role: Role,
        action: &'static str,
    ) -> Result<Session, ServiceError> {
        let session = self.get_session(session_id).await?;
        let player_count = match event {
            SessionEvent::BeginCountdown | SessionEvent::Start => {
                self.store.list_players(session_id).await?.len()
            }
            SessionEvent::Finish(_) | SessionEvent::Exit => 0,
        };
        let context = TransitionContext {
            role,
            player_count,
            now_ms: now_ms(),
        };

        let plan = plan_transition(&session, event, &context).inspect_err(|err| {
            debug!(session_id = %session_id, event = ?event, error = %err, "transition rejected");
        })?;
        if plan.is_noop() {
            return Ok(session);
        }
        let target = plan.to;
        let (session, changed) = self.execute(&session, plan, action).await?;
        if !changed && session.phase() != target {
            debug!(
                session_id = %session_id,
                event = ?event,
                phase = ?session.phase(),
                "transition lost to a concurrent write"
            );
            return Err(ServiceError::InvalidTransition(format!(
                "session moved to {:?} before {event:?} was applied",
                session.phase()
            )));
        }
        Ok(session)
    }

    async fn execute(
        &self,
        session: &Session,
        plan: Plan,
        action: &'static str,
    ) -> Result<(Session, bool), ServiceError> {
        let session_id = session.id;
        let (updated, changed) = if plan.patch.is_empty() {
            (session.clone(), false)
        } else {
            let outcome = self
                .bounded(self.store.update_session(session_id, plan.patch.clone()))
                .await?
                .map_err(ServiceError::write(action))?;
            (outcome.session.into(), outcome.changed)
        };

        if changed {
            match plan.event {
                SessionEvent::Finish(reason) => {
                    info!(session_id = %session_id, reason = ?reason, "session finished")
                }
                event => info!(
                    session_id = %session_id,
                    from = ?plan.from,
                    to = ?plan.to,
                    event = ?event,
                    "session transitioned"
                ),
            }
        }

        if plan.purge_players {
            let removed = self
                .bounded(
                    self.store
                        .delete_players(session_id, PlayerFilter::All),
                )
                .await?
                .map_err(ServiceError::write(action))?;
            info!(session_id = %session_id, removed, "players purged on exit");
        }

        Ok((updated, changed))
    }

    async fn bounded<T>(&self, work: impl Future<Output = T>) -> Result<T, ServiceError> {
        timeout(self.transition_timeout, work)
            .await
            .map_err(|_| ServiceError::Timeout)
    }
}

/// Resolve the role of a requester from the credentials it presented.
pub fn resolve_role(session: &Session, host_token: Option<Uuid>, player_id: Option<Uuid>) -> Role {
    match (host_token, player_id) {
        (Some(token), _) if token == session.host_token => Role::Host,
        (_, Some(player_id)) => Role::Player(player_id),
        _ => Role::Observer,
    }
}

fn validate_create(request: &CreateSession) -> Result<(), ServiceError> {
    if request.time_limit_secs == 0 {
        return Err(ServiceError::InvalidInput(
            "time limit must be positive".into(),
        ));
    }
    if request.question_count == 0 {
        return Err(ServiceError::InvalidInput(
            "a session requires at least one question".into(),
        ));
    }
    if request.question_count > request.available_questions {
        return Err(ServiceError::InvalidInput(format!(
            "quiz only has {} questions",
            request.available_questions
        )));
    }
    Ok(())
}

fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

fn normalize_join_code(code: &str) -> String {
    let mut code = code.to_uppercase();
    code.retain(|c| !c.is_whitespace());
    code
}
