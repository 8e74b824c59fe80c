use thiserror::Error;
use uuid::Uuid;

use crate::{dao::models::SessionPatch, state::session::Session};

/// Lifecycle phases of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Lobby: players are joining.
    Waiting,
    /// Optional pre-start countdown shown on player screens.
    Countdown,
    /// Quiz running, answers accepted.
    Started,
    /// Terminal state.
    Finished,
}

impl SessionPhase {
    /// Derive the phase from stored session flags. `finished` wins over
    /// every other flag.
    pub fn from_flags(finished: bool, is_started: bool, countdown_start_ms: Option<i64>) -> Self {
        if finished {
            SessionPhase::Finished
        } else if is_started {
            SessionPhase::Started
        } else if countdown_start_ms.is_some() {
            SessionPhase::Countdown
        } else {
            SessionPhase::Waiting
        }
    }
}

/// Why a running session transitioned to [`SessionPhase::Finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishReason {
    /// The host ended the quiz explicitly.
    HostEnded,
    /// Every joined player answered every question.
    AllPlayersFinished,
    /// The configured time limit elapsed as observed by a client.
    TimeExpired,
}

impl FinishReason {
    /// Whether any client may request this finish, not only the host.
    pub fn is_automatic(self) -> bool {
        !matches!(self, FinishReason::HostEnded)
    }
}

/// Events that can be applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host begins the pre-start countdown.
    BeginCountdown,
    /// Host starts the quiz.
    Start,
    /// The running quiz ends.
    Finish(FinishReason),
    /// Host leaves the session, purging its players.
    Exit,
}

/// Role of the client requesting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The client that created the session.
    Host,
    /// A joined player.
    Player(Uuid),
    /// A read-only viewer (public screen, spectator).
    Observer,
}

impl Role {
    /// Whether this role may request host-only transitions.
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

/// Facts about the world a transition is planned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    /// Role of the requester.
    pub role: Role,
    /// Players currently joined.
    pub player_count: usize,
    /// Current epoch milliseconds.
    pub now_ms: i64,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Reasons a transition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Only the host may request this event.
    #[error("only the host may request {event:?}")]
    NotHost {
        /// Rejected event.
        event: SessionEvent,
    },
    /// The quiz cannot start without players.
    #[error("at least one player must join before starting")]
    NoPlayers,
    /// The event is not valid from the current phase.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
}

/// A validated transition: the store write to perform and its side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Phase before the transition.
    pub from: SessionPhase,
    /// Phase after the transition.
    pub to: SessionPhase,
    /// Event that triggered this plan.
    pub event: SessionEvent,
    /// Fields to write; empty when the transition is already reflected.
    pub patch: SessionPatch,
    /// Whether every player record of the session must be deleted.
    pub purge_players: bool,
}

impl Plan {
    /// True when executing the plan performs no store write at all.
    pub fn is_noop(&self) -> bool {
        self.patch.is_empty() && !self.purge_players
    }

    fn unchanged(phase: SessionPhase, event: SessionEvent) -> Self {
        Self {
            from: phase,
            to: phase,
            event,
            patch: SessionPatch::default(),
            purge_players: false,
        }
    }
}

/// Plan the transition for `event` against the cached `session`.
///
/// Repeating an already applied transition (start twice, finish twice)
/// yields a no-op plan instead of an error. Patches other than exit only
/// apply while the stored session is unfinished, and the start epoch is only
/// written when the store has none yet.
pub fn plan_transition(
    session: &Session,
    event: SessionEvent,
    context: &TransitionContext,
) -> Result<Plan, PlanError> {
    let requires_host = match event {
        SessionEvent::Finish(reason) => !reason.is_automatic(),
        SessionEvent::BeginCountdown | SessionEvent::Start | SessionEvent::Exit => true,
    };
    if requires_host && !context.role.is_host() {
        return Err(PlanError::NotHost { event });
    }

    let from = session.phase();
    let plan = match (from, event) {
        (SessionPhase::Countdown, SessionEvent::BeginCountdown)
        | (SessionPhase::Started, SessionEvent::Start)
        | (SessionPhase::Finished, SessionEvent::Finish(_)) => Plan::unchanged(from, event),
        (SessionPhase::Waiting, SessionEvent::BeginCountdown) => {
            ensure_players(context)?;
            Plan {
                from,
                to: SessionPhase::Countdown,
                event,
                patch: SessionPatch {
                    countdown_start_ms: Some(Some(context.now_ms)),
                    unless_finished: true,
                    ..SessionPatch::default()
                },
                purge_players: false,
            }
        }
        (SessionPhase::Waiting | SessionPhase::Countdown, SessionEvent::Start) => {
            ensure_players(context)?;
            Plan {
                from,
                to: SessionPhase::Started,
                event,
                patch: SessionPatch {
                    is_started: Some(true),
                    quiz_start_time_if_unset: Some(context.now_ms),
                    unless_finished: true,
                    ..SessionPatch::default()
                },
                purge_players: false,
            }
        }
        (SessionPhase::Started, SessionEvent::Finish(reason)) => Plan {
            from,
            to: SessionPhase::Finished,
            event,
            patch: SessionPatch {
                is_started: Some(false),
                finished: Some(true),
                quiz_start_time: matches!(reason, FinishReason::HostEnded).then_some(None),
                unless_finished: true,
                ..SessionPatch::default()
            },
            purge_players: false,
        },
        (SessionPhase::Finished, SessionEvent::Exit) => Plan {
            purge_players: true,
            ..Plan::unchanged(from, event)
        },
        (_, SessionEvent::Exit) => Plan {
            from,
            to: SessionPhase::Finished,
            event,
            patch: SessionPatch {
                is_started: Some(false),
                finished: Some(true),
                quiz_start_time: Some(None),
                ..SessionPatch::default()
            },
            purge_players: true,
        },
        (from, event) => return Err(PlanError::InvalidTransition(InvalidTransition { from, event })),
    };

    Ok(plan)
}

fn ensure_players(context: &TransitionContext) -> Result<(), PlanError> {
    if context.player_count == 0 {
        return Err(PlanError::NoPlayers);
    }
    Ok(())
}
