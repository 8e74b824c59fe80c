use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::doc,
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        MongoAnswerDocument, MongoPlayerDocument, MongoSessionDocument, doc_id, patch_filter,
        patch_update, session_scope,
    },
};
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

const SESSION_COLLECTION_NAME: &str = "sessions";
const PLAYER_COLLECTION_NAME: &str = "players";
const ANSWER_COLLECTION_NAME: &str = "answers";

/// [`SessionStore`] persisting sessions, players and answers in MongoDB.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            connection::open(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            connection::open(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let sessions = self.sessions().await;
        let code_index = IndexModel::builder()
            .keys(doc! {"join_code": 1, "finished": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_join_code_idx".to_owned()))
                    .build(),
            )
            .build();
        sessions
            .create_index(code_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "join_code,finished",
                source,
            })?;

        let active_code_index = IndexModel::builder()
            .keys(doc! {"join_code": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_active_join_code_idx".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(doc! {"finished": false}))
                    .build(),
            )
            .build();
        sessions
            .create_index(active_code_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "join_code (active, unique)",
                source,
            })?;

        let players = self.players().await;
        let roster_index = IndexModel::builder()
            .keys(doc! {"session_id": 1, "joined_at_ms": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("player_session_idx".to_owned()))
                    .build(),
            )
            .build();
        players
            .create_index(roster_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PLAYER_COLLECTION_NAME,
                index: "session_id,joined_at_ms",
                source,
            })?;

        let answers = self.answers().await;
        let answer_index = IndexModel::builder()
            .keys(doc! {"session_id": 1, "created_at_ms": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("answer_session_idx".to_owned()))
                    .build(),
            )
            .build();
        answers
            .create_index(answer_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ANSWER_COLLECTION_NAME,
                index: "session_id,created_at_ms",
                source,
            })?;

        Ok(())
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoPlayerDocument>(PLAYER_COLLECTION_NAME)
    }

    async fn answers(&self) -> Collection<MongoAnswerDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoAnswerDocument>(ANSWER_COLLECTION_NAME)
    }

    async fn create_session(&self, new: NewSession) -> MongoResult<SessionEntity> {
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
        let document: MongoSessionDocument = session.clone().into();
        self.sessions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::DuplicateJoinCode {
                        code: session.join_code.clone(),
                    }
                } else {
                    MongoDaoError::SaveSession {
                        id: session.id,
                        source,
                    }
                }
            })?;
        Ok(session)
    }

    async fn read_session(&self, lookup: SessionLookup) -> MongoResult<Option<SessionEntity>> {
        let collection = self.sessions().await;
        let load_error = |source| MongoDaoError::LoadSession {
            lookup: lookup.to_string(),
            source,
        };

        let document = match &lookup {
            SessionLookup::Id(id) => collection.find_one(doc_id(*id)).await.map_err(load_error)?,
            SessionLookup::JoinCode(code) => collection
                .find_one(doc! {"join_code": code.as_str()})
                .sort(doc! {"finished": 1, "created_at_ms": -1})
                .await
                .map_err(load_error)?,
        };

        document.map(TryInto::try_into).transpose()
    }

    async fn update_session(&self, id: Uuid, patch: SessionPatch) -> StorageResult<PatchOutcome> {
        let collection = self.sessions().await;

        let before = if patch.is_empty() {
            None
        } else {
            collection
                .find_one_and_update(patch_filter(id, &patch), patch_update(&patch))
                .return_document(ReturnDocument::Before)
                .await
                .map_err(|source| MongoDaoError::SaveSession { id, source })?
        };

        let Some(before) = before else {
            // Empty patch, unknown id, or a write condition that no longer holds.
            let current = collection
                .find_one(doc_id(id))
                .await
                .map_err(|source| MongoDaoError::LoadSession {
                    lookup: SessionLookup::Id(id).to_string(),
                    source,
                })?
                .ok_or_else(|| StorageError::Missing(format!("session `{id}`")))?;
            return Ok(PatchOutcome {
                session: current.try_into()?,
                changed: false,
            });
        };

        let before: SessionEntity = before.try_into()?;
        let mut after = before.clone();
        patch.apply_to(&mut after);
        Ok(PatchOutcome {
            changed: after != before,
            session: after,
        })
    }

    async fn insert_player(&self, player: PlayerEntity) -> MongoResult<()> {
        let id = player.id;
        let document: MongoPlayerDocument = player.into();
        self.players()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SavePlayer { id, source })?;
        Ok(())
    }

    async fn delete_players(&self, session_id: Uuid, filter: PlayerFilter) -> MongoResult<u64> {
        let mut selector = session_scope(session_id);
        if let PlayerFilter::Ids(ids) = filter {
            let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            selector.insert("_id", doc! {"$in": ids});
        }
        let result = self
            .players()
            .await
            .delete_many(selector)
            .await
            .map_err(|source| MongoDaoError::DeletePlayers { session_id, source })?;
        Ok(result.deleted_count)
    }

    async fn list_players(&self, session_id: Uuid) -> MongoResult<Vec<PlayerEntity>> {
        let documents: Vec<MongoPlayerDocument> = self
            .players()
            .await
            .find(session_scope(session_id))
            .sort(doc! {"joined_at_ms": 1})
            .await
            .map_err(|source| MongoDaoError::ListPlayers { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListPlayers { session_id, source })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_answer(&self, answer: AnswerEntity) -> MongoResult<()> {
        let id = answer.id;
        let document: MongoAnswerDocument = answer.into();
        self.answers()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::SaveAnswer { id, source })?;
        Ok(())
    }

    async fn list_answers(&self, session_id: Uuid) -> MongoResult<Vec<AnswerEntity>> {
        let documents: Vec<MongoAnswerDocument> = self
            .answers()
            .await
            .find(session_scope(session_id))
            .sort(doc! {"created_at_ms": 1})
            .await
            .map_err(|source| MongoDaoError::ListAnswers { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListAnswers { session_id, source })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }
}

impl SessionStore for MongoSessionStore {
    fn create_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(session).await.map_err(Into::into) })
    }

    fn read_session(
        &self,
        lookup: SessionLookup,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.read_session(lookup).await.map_err(Into::into) })
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<PatchOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(id, patch).await })
    }

    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_players(session_id).await.map_err(Into::into) })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_player(player).await.map_err(Into::into) })
    }

    fn delete_players(
        &self,
        session_id: Uuid,
        filter: PlayerFilter,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_players(session_id, filter)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_answer(answer).await.map_err(Into::into) })
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_answers(session_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
