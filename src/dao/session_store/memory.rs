//! Process-local session store used when no database is configured and as
//! the fake backend in tests.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, NewSession, PatchOutcome, PlayerEntity, PlayerFilter, SessionEntity,
            SessionLookup, SessionPatch,
        },
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    state::timer::now_ms,
};

/// In-memory [`SessionStore`] backed by concurrent maps.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    active_codes: DashMap<String, Uuid>,
    players: DashMap<Uuid, Vec<PlayerEntity>>,
    answers: DashMap<Uuid, Vec<AnswerEntity>>,
}

impl MemorySessionStore {
    /// Build an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryInner {
    fn create_session(&self, new: NewSession) -> StorageResult<SessionEntity> {
        let mut code_slot = self
            .active_codes
            .entry(new.join_code.clone())
            .or_insert(Uuid::nil());
        let holder = *code_slot;
        if self
            .sessions
            .get(&holder)
            .is_some_and(|session| !session.finished)
        {
            return Err(StorageError::Conflict(format!("join code `{}`", new.join_code)));
        }

        let session = SessionEntity {
            id: Uuid::new_v4(),
            join_code: new.join_code,
            host_token: Uuid::new_v4(),
            quiz_id: new.quiz_id,
            time_limit_secs: new.time_limit_secs,
            question_count: new.question_count,
            is_started: false,
            finished: false,
            quiz_start_time: None,
            countdown_start_ms: None,
            created_at_ms: now_ms(),
        };
        self.sessions.insert(session.id, session.clone());
        *code_slot = session.id;
        Ok(session)
    }

    fn read_session(&self, lookup: &SessionLookup) -> Option<SessionEntity> {
        match lookup {
            SessionLookup::Id(id) => self.sessions.get(id).map(|entry| entry.clone()),
            SessionLookup::JoinCode(code) => self
                .sessions
                .iter()
                .filter(|entry| &entry.join_code == code)
                .map(|entry| entry.clone())
                .max_by_key(|session| (!session.finished, session.created_at_ms)),
        }
    }

    fn update_session(&self, id: Uuid, patch: &SessionPatch) -> StorageResult<PatchOutcome> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StorageError::Missing(format!("session `{id}`")))?;
        if !patch.admits(&entry) {
            return Ok(PatchOutcome {
                changed: false,
                session: entry.clone(),
            });
        }
        let before = entry.clone();
        patch.apply_to(&mut entry);
        Ok(PatchOutcome {
            changed: *entry != before,
            session: entry.clone(),
        })
    }

    fn insert_player(&self, player: PlayerEntity) {
        let mut roster = self.players.entry(player.session_id).or_default();
        match roster.iter_mut().find(|existing| existing.id == player.id) {
            Some(existing) => *existing = player,
            None => roster.push(player),
        }
    }

    fn delete_players(&self, session_id: Uuid, filter: &PlayerFilter) -> u64 {
        let Some(mut roster) = self.players.get_mut(&session_id) else {
            return 0;
        };
        let before = roster.len();
        roster.retain(|player| !filter.matches(&player.id));
        (before - roster.len()) as u64
    }

    fn list_players(&self, session_id: Uuid) -> Vec<PlayerEntity> {
        let mut players = self
            .players
            .get(&session_id)
            .map(|roster| roster.clone())
            .unwrap_or_default();
        players.sort_by_key(|player| player.joined_at_ms);
        players
    }

    fn list_answers(&self, session_id: Uuid) -> Vec<AnswerEntity> {
        let mut answers = self
            .answers
            .get(&session_id)
            .map(|answers| answers.clone())
            .unwrap_or_default();
        answers.sort_by_key(|answer| answer.created_at_ms);
        answers
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.create_session(session) })
    }

    fn read_session(
        &self,
        lookup: SessionLookup,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read_session(&lookup)) })
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<PatchOutcome>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.update_session(id, &patch) })
    }

    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.list_players(session_id)) })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.insert_player(player);
            Ok(())
        })
    }

    fn delete_players(
        &self,
        session_id: Uuid,
        filter: PlayerFilter,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.delete_players(session_id, &filter)) })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.answers.entry(answer.session_id).or_default().push(answer);
            Ok(())
        })
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.list_answers(session_id)) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(code: &str) -> NewSession {
        NewSession {
            quiz_id: Uuid::new_v4(),
            join_code: code.into(),
            time_limit_secs: 60,
            question_count: 5,
        }
    }

    fn player(session_id: Uuid, joined_at_ms: i64) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            session_id,
            name: "ada".into(),
            avatar_url: "https://example.com/a.png".into(),
            joined_at_ms,
        }
    }

    #[tokio::test]
    async fn join_code_prefers_active_session() {
        let store = MemorySessionStore::new();
        let old = store.create_session(new_session("QWERTY")).await.unwrap();
        store
            .update_session(
                old.id,
                SessionPatch {
                    finished: Some(true),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();
        let active = store.create_session(new_session("QWERTY")).await.unwrap();

        let found = store
            .read_session(SessionLookup::JoinCode("QWERTY".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, active.id);
    }

    #[tokio::test]
    async fn active_join_code_cannot_be_reused() {
        let store = MemorySessionStore::new();
        let first = store.create_session(new_session("SAMECD")).await.unwrap();
        let err = store.create_session(new_session("SAMECD")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        store
            .update_session(
                first.id,
                SessionPatch {
                    finished: Some(true),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();
        let second = store.create_session(new_session("SAMECD")).await.unwrap();
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn update_reports_unchanged_patch() {
        let store = MemorySessionStore::new();
        let session = store.create_session(new_session("AAAAAA")).await.unwrap();
        let patch = SessionPatch {
            finished: Some(true),
            ..SessionPatch::default()
        };

        let first = store.update_session(session.id, patch.clone()).await.unwrap();
        let second = store.update_session(session.id, patch).await.unwrap();
        assert!(first.changed);
        assert!(!second.changed);
        assert!(second.session.finished);
    }

    #[tokio::test]
    async fn guarded_patch_leaves_finished_session_alone() {
        let store = MemorySessionStore::new();
        let session = store.create_session(new_session("DDDDDD")).await.unwrap();
        store
            .update_session(
                session.id,
                SessionPatch {
                    finished: Some(true),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();

        let outcome = store
            .update_session(
                session.id,
                SessionPatch {
                    is_started: Some(true),
                    quiz_start_time_if_unset: Some(5_000),
                    unless_finished: true,
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(!outcome.changed);
        assert!(!outcome.session.is_started);
        assert_eq!(outcome.session.quiz_start_time, None);
    }

    #[tokio::test]
    async fn update_missing_session_fails() {
        let store = MemorySessionStore::new();
        let err = store
            .update_session(Uuid::new_v4(), SessionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Missing(_)));
    }

    #[tokio::test]
    async fn players_listed_in_join_order_and_deleted_by_filter() {
        let store = MemorySessionStore::new();
        let session = store.create_session(new_session("BBBBBB")).await.unwrap();
        let late = player(session.id, 20);
        let early = player(session.id, 10);
        store.insert_player(late.clone()).await.unwrap();
        store.insert_player(early.clone()).await.unwrap();

        let roster = store.list_players(session.id).await.unwrap();
        assert_eq!(
            roster.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![early.id, late.id]
        );

        let removed = store
            .delete_players(session.id, PlayerFilter::Ids(vec![late.id]))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let removed = store
            .delete_players(session.id, PlayerFilter::All)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.list_players(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reinserting_player_replaces_record() {
        let store = MemorySessionStore::new();
        let session = store.create_session(new_session("CCCCCC")).await.unwrap();
        let mut ada = player(session.id, 1);
        store.insert_player(ada.clone()).await.unwrap();
        ada.name = "ada l.".into();
        store.insert_player(ada.clone()).await.unwrap();

        let roster = store.list_players(session.id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "ada l.");
    }
}
