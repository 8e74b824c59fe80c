pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub mod notifying;
#[cfg(test)]
pub(crate) mod fault;

use crate::dao::models::{
    AnswerEntity, NewSession, PatchOutcome, PlayerEntity, PlayerFilter, SessionEntity,
    SessionLookup, SessionPatch,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use self::memory::MemorySessionStore;
pub use self::notifying::NotifyingStore;

/// Abstraction over the durable store holding sessions, players and answers.
///
/// Every operation is independent and may fail; callers never rely on
/// ordering between two calls beyond what a single call returns.
pub trait SessionStore: Send + Sync {
    /// Persist a new session and return the stored record. Fails with
    /// `StorageError::Conflict` when an unfinished session holds the join code.
    fn create_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>>;
    /// Look a session up by id or join code. A join code resolves to the
    /// active session holding it, or the most recent one when none is active.
    fn read_session(
        &self,
        lookup: SessionLookup,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Apply a narrow patch to a session. A patch whose write conditions do
    /// not hold against the stored record is skipped and reported unchanged.
    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<PatchOutcome>>;
    /// List the players of a session in join order.
    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    /// Insert a player, replacing any record with the same id.
    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Delete the players of a session matching the filter, returning how many were removed.
    fn delete_players(
        &self,
        session_id: Uuid,
        filter: PlayerFilter,
    ) -> BoxFuture<'static, StorageResult<u64>>;
    /// Append an answer record.
    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// List the answers of a session ordered by creation time ascending.
    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    /// Check the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
