use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

const MAX_PING_BACKOFF: Duration = Duration::from_secs(2);

/// Build a client for `config` and return once its database answers a ping.
pub async fn open(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let attempts = config.ping_attempts.max(1);
    let mut backoff = config.ping_backoff;
    let mut attempt = 1;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                debug!(database = %config.database_name, attempt, "MongoDB answered ping");
                return Ok((client, database));
            }
            Err(err) if attempt >= attempts => {
                return Err(MongoDaoError::InitialPing {
                    attempts,
                    source: err,
                });
            }
            Err(err) => {
                warn!(attempt, wait_ms = backoff.as_millis(), error = %err, "MongoDB ping failed; retrying");
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_PING_BACKOFF);
                attempt += 1;
            }
        }
    }
}
