mod config;
mod connection;
mod error;
mod models;
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::DuplicateJoinCode { code } => {
                StorageError::Conflict(format!("join code `{code}`"))
            }
            err => StorageError::unavailable(err.to_string(), err),
        }
    }
}
