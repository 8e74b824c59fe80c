use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised by the MongoDB session store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save session `{id}`")]
    SaveSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("join code `{code}` is held by an active session")]
    DuplicateJoinCode { code: String },
    #[error("failed to load session by {lookup}")]
    LoadSession {
        lookup: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save player `{id}`")]
    SavePlayer {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete players of session `{session_id}`")]
    DeletePlayers {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list players of session `{session_id}`")]
    ListPlayers {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to save answer `{id}`")]
    SaveAnswer {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list answers of session `{session_id}`")]
    ListAnswers {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("stored {kind} has a malformed identifier `{value}`")]
    MalformedId { kind: &'static str, value: String },
}

const DUPLICATE_KEY: i32 = 11000;

/// Whether a write was rejected by a unique index.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}
