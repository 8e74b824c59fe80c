use std::sync::Arc;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, NewSession, PatchOutcome, PlayerEntity, PlayerFilter, SessionEntity,
            SessionLookup, SessionPatch,
        },
        session_store::SessionStore,
        storage::StorageResult,
    },
    events::{ChangeEvent, EventChannel, Topic},
};

/// Store decorator that publishes a row-change notification after every
/// successful write, emulating database-level change feeds.
#[derive(Clone)]
pub struct NotifyingStore {
    inner: Arc<dyn SessionStore>,
    channel: Arc<dyn EventChannel>,
}

impl NotifyingStore {
    /// Wrap `inner`, publishing onto `channel`.
    pub fn new(inner: Arc<dyn SessionStore>, channel: Arc<dyn EventChannel>) -> Self {
        Self { inner, channel }
    }
}

fn notify(channel: &Arc<dyn EventChannel>, topic: Topic, session_id: Uuid, record_id: Option<Uuid>) {
    channel.publish(ChangeEvent {
        topic,
        session_id,
        record_id,
    });
}

impl SessionStore for NotifyingStore {
    fn create_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        self.inner.create_session(session)
    }

    fn read_session(
        &self,
        lookup: SessionLookup,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.read_session(lookup)
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<PatchOutcome>> {
        let write = self.inner.update_session(id, patch);
        let channel = self.channel.clone();
        Box::pin(async move {
            let outcome = write.await?;
            if outcome.changed {
                notify(&channel, Topic::SessionUpdates, id, Some(id));
            }
            Ok(outcome)
        })
    }

    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        self.inner.list_players(session_id)
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let (session_id, player_id) = (player.session_id, player.id);
        let write = self.inner.insert_player(player);
        let channel = self.channel.clone();
        Box::pin(async move {
            write.await?;
            notify(&channel, Topic::PlayerChanges, session_id, Some(player_id));
            Ok(())
        })
    }

    fn delete_players(
        &self,
        session_id: Uuid,
        filter: PlayerFilter,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let write = self.inner.delete_players(session_id, filter);
        let channel = self.channel.clone();
        Box::pin(async move {
            let removed = write.await?;
            if removed > 0 {
                notify(&channel, Topic::PlayerChanges, session_id, None);
            }
            Ok(removed)
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let (session_id, answer_id) = (answer.session_id, answer.id);
        let write = self.inner.insert_answer(answer);
        let channel = self.channel.clone();
        Box::pin(async move {
            write.await?;
            notify(&channel, Topic::AnswerInserts, session_id, Some(answer_id));
            Ok(())
        })
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        self.inner.list_answers(session_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}
