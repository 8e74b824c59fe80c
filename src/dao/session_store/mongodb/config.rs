use std::time::Duration;

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "quiz_live";
const APP_NAME: &str = "quiz-live-back";

/// Connection settings for the MongoDB backend.
#[derive(Clone)]
pub struct MongoConfig {
    /// Parsed driver options.
    pub options: ClientOptions,
    /// Database holding the session collections.
    pub database_name: String,
    /// Pings attempted before a connection is reported as failed.
    pub ping_attempts: u32,
    /// First wait between pings, doubled after every failure.
    pub ping_backoff: Duration,
}

impl MongoConfig {
    /// Parse a connection URI, defaulting the database name.
    ///
    /// The storage supervisor retries whole connections, so a single
    /// connection only waits through a few pings.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());
        options
            .server_selection_timeout
            .get_or_insert(Duration::from_secs(5));

        Ok(Self {
            options,
            database_name: db_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
            ping_attempts: 3,
            ping_backoff: Duration::from_millis(250),
        })
    }
}
