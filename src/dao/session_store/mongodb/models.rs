use mongodb::bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{AnswerEntity, PlayerEntity, SessionEntity, SessionPatch};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    join_code: String,
    host_token: String,
    quiz_id: String,
    time_limit_secs: u32,
    question_count: u32,
    is_started: bool,
    finished: bool,
    quiz_start_time: Option<i64>,
    countdown_start_ms: Option<i64>,
    created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    name: String,
    avatar_url: String,
    joined_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    #[serde(rename = "_id")]
    id: String,
    player_id: String,
    session_id: String,
    question_index: i32,
    points: i32,
    created_at_ms: i64,
}

fn parse_id(kind: &'static str, value: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| MongoDaoError::MalformedId {
        kind,
        value: value.to_owned(),
    })
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            join_code: value.join_code,
            host_token: value.host_token.to_string(),
            quiz_id: value.quiz_id.to_string(),
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

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id("session", &value.id)?,
            join_code: value.join_code,
            host_token: parse_id("host token", &value.host_token)?,
            quiz_id: parse_id("quiz", &value.quiz_id)?,
            time_limit_secs: value.time_limit_secs,
            question_count: value.question_count,
            is_started: value.is_started,
            finished: value.finished,
            quiz_start_time: value.quiz_start_time,
            countdown_start_ms: value.countdown_start_ms,
            created_at_ms: value.created_at_ms,
        })
    }
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            name: value.name,
            avatar_url: value.avatar_url,
            joined_at_ms: value.joined_at_ms,
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPlayerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id("player", &value.id)?,
            session_id: parse_id("session", &value.session_id)?,
            name: value.name,
            avatar_url: value.avatar_url,
            joined_at_ms: value.joined_at_ms,
        })
    }
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            player_id: value.player_id.to_string(),
            session_id: value.session_id.to_string(),
            question_index: value.question_index,
            points: value.points,
            created_at_ms: value.created_at_ms,
        }
    }
}

impl TryFrom<MongoAnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id("answer", &value.id)?,
            player_id: parse_id("player", &value.player_id)?,
            session_id: parse_id("session", &value.session_id)?,
            question_index: value.question_index,
            points: value.points,
            created_at_ms: value.created_at_ms,
        })
    }
}

fn optional_millis(value: Option<i64>) -> Bson {
    value.map(Bson::Int64).unwrap_or(Bson::Null)
}

/// Translate a patch into a single-stage `$set` update pipeline. The
/// pipeline form lets the start epoch fall back to the stored value.
pub fn patch_update(patch: &SessionPatch) -> Vec<Document> {
    let mut set = Document::new();
    if let Some(value) = patch.is_started {
        set.insert("is_started", value);
    }
    if let Some(value) = patch.finished {
        set.insert("finished", value);
    }
    match (patch.quiz_start_time, patch.quiz_start_time_if_unset) {
        (Some(value), fallback) => {
            set.insert("quiz_start_time", optional_millis(value.or(fallback)));
        }
        (None, Some(start)) => {
            set.insert(
                "quiz_start_time",
                doc! { "$ifNull": ["$quiz_start_time", Bson::Int64(start)] },
            );
        }
        (None, None) => {}
    }
    if let Some(value) = patch.countdown_start_ms {
        set.insert("countdown_start_ms", optional_millis(value));
    }
    vec![doc! { "$set": set }]
}

/// Filter selecting the session a patch may be applied to.
pub fn patch_filter(id: Uuid, patch: &SessionPatch) -> Document {
    let mut filter = doc_id(id);
    if patch.unless_finished {
        filter.insert("finished", false);
    }
    filter
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn session_scope(session_id: Uuid) -> Document {
    doc! {"session_id": session_id.to_string()}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_patch_keeps_stored_epoch_and_skips_finished_sessions() {
        let id = Uuid::new_v4();
        let patch = SessionPatch {
            is_started: Some(true),
            quiz_start_time_if_unset: Some(42),
            unless_finished: true,
            ..SessionPatch::default()
        };

        let update = patch_update(&patch);
        assert_eq!(
            update,
            vec![doc! { "$set": {
                "is_started": true,
                "quiz_start_time": { "$ifNull": ["$quiz_start_time", Bson::Int64(42)] },
            }}]
        );
        assert_eq!(
            patch_filter(id, &patch),
            doc! { "_id": id.to_string(), "finished": false }
        );
    }

    #[test]
    fn exit_patch_is_unconditional() {
        let id = Uuid::new_v4();
        let patch = SessionPatch {
            is_started: Some(false),
            finished: Some(true),
            quiz_start_time: Some(None),
            ..SessionPatch::default()
        };
        assert_eq!(patch_filter(id, &patch), doc_id(id));
        assert_eq!(
            patch_update(&patch),
            vec![doc! { "$set": {
                "is_started": false,
                "finished": true,
                "quiz_start_time": Bson::Null,
            }}]
        );
    }
}
