use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::sleep;
use tracing::{info, warn};

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

const FIRST_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Open a client, wait for the deployment to answer and check that it can run
/// multi-document transactions.
pub(super) async fn establish_connection(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    wait_for_ping(&database, config.connect_attempts).await?;
    ensure_transactions(&database).await?;
    info!(database = %config.database_name, "MongoDB deployment ready");

    Ok((client, database))
}

async fn wait_for_ping(database: &Database, max_attempts: u32) -> MongoResult<()> {
    let mut delay = FIRST_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        let err = match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        if attempt >= max_attempts {
            return Err(MongoDaoError::InitialPing {
                attempts: attempt,
                source: err,
            });
        }
        warn!(
            attempt,
            wait_ms = delay.as_millis(),
            error = %err,
            "MongoDB not reachable yet"
        );
        sleep(delay).await;
        delay = (delay * 2).min(MAX_RETRY_DELAY);
        attempt += 1;
    }
}

/// Escrow and payouts rely on transactions, which standalone servers reject.
async fn ensure_transactions(database: &Database) -> MongoResult<()> {
    let hello = database
        .run_command(doc! { "hello": 1 })
        .await
        .map_err(|source| MongoDaoError::InitialPing {
            attempts: 1,
            source,
        })?;
    let replica_set = hello.get_str("setName").is_ok();
    let mongos = hello.get_str("msg").is_ok_and(|msg| msg == "isdbgrid");
    if replica_set || mongos {
        Ok(())
    } else {
        Err(MongoDaoError::TransactionsUnsupported)
    }
}
