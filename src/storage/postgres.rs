use async_trait::async_trait;
use chrono::NaiveDateTime;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio::time::timeout;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Transaction};
use tracing::{debug, info, instrument, warn};

use super::{BatchWriter, EventStore};
use crate::config::DatabaseConfig;
use crate::constants::{EVENTS_COLUMNS, EVENTS_TABLE, GEOMETRY_SRID};
use crate::error::{IngestError, Result, WriteError};
use crate::types::WriteBatch;

/// PostgreSQL/PostGIS store backed by a connection pool
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: Pool,
    timeout: Duration,
}

impl PostgresEventStore {
    /// Build the pool. No connection is opened until the first session.
    pub fn new(database: &DatabaseConfig, timeout: Duration) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(database.host.clone());
        cfg.port = Some(database.port);
        cfg.dbname = Some(database.name.clone());
        cfg.user = Some(database.user.clone());
        cfg.password = Some(database.password.clone());
        cfg.connect_timeout = Some(timeout);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| IngestError::Database {
                message: format!("Failed to create connection pool: {e}"),
            })?;
        pool.resize(database.pool_size);

        info!(
            host = %database.host,
            port = database.port,
            database = %database.name,
            pool_size = database.pool_size,
            "configured PostgreSQL pool"
        );

        Ok(Self { pool, timeout })
    }

    /// Pings the database to verify connectivity
    pub async fn ping(&self) -> Result<()> {
        let client = timeout(self.timeout, self.pool.get())
            .await
            .map_err(|_| IngestError::Database {
                message: format!("connection timed out after {:?}", self.timeout),
            })?
            .map_err(|e| IngestError::Database {
                message: format!("Failed to get database connection: {e}"),
            })?;
        client
            .execute("SELECT 1", &[])
            .await
            .map_err(|e| IngestError::Database {
                message: format!("Ping failed: {e}"),
            })?;
        debug!("postgreSQL connection successful");
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn acquire(&self) -> std::result::Result<Box<dyn BatchWriter>, WriteError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| WriteError::Connection(e.to_string()))?;
        Ok(Box::new(PostgresBatchWriter {
            client,
            timeout: self.timeout,
        }))
    }
}

/// One pooled connection; returned to the pool when dropped.
pub struct PostgresBatchWriter {
    client: deadpool_postgres::Object,
    timeout: Duration,
}

/// Row values that need owned storage while the statement runs.
struct RowParams<'a> {
    region: &'a str,
    origin: String,
    destination: String,
    event_time: NaiveDateTime,
    data_source: &'a str,
}

#[async_trait]
impl BatchWriter for PostgresBatchWriter {
    #[instrument(skip(self, batch), fields(batch = batch.index(), rows = batch.len()))]
    async fn write_batch(&mut self, batch: &WriteBatch) -> std::result::Result<u64, WriteError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let statement = insert_statement(batch.len());
        let rows: Vec<RowParams<'_>> = batch
            .records()
            .iter()
            .map(|r| RowParams {
                region: r.region(),
                origin: r.origin().to_wkt(),
                destination: r.destination().to_wkt(),
                event_time: r.event_time(),
                data_source: r.data_source(),
            })
            .collect();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(rows.len() * EVENTS_COLUMNS.len());
        for row in &rows {
            params.push(&row.region);
            params.push(&row.origin);
            params.push(&row.destination);
            params.push(&row.event_time);
            params.push(&row.data_source);
        }

        // One bound covers begin, insert and commit. On expiry the dropped
        // transaction issues ROLLBACK. A commit cut off by the bound may
        // still have landed; the queue's redelivery covers the loss case.
        let limit = self.timeout;
        let client: &mut tokio_postgres::Client = &mut self.client;
        let work = insert_in_transaction(client, &statement, &params);

        match timeout(limit, work).await {
            Ok(Ok(inserted)) => {
                debug!(inserted, "committed batch");
                Ok(inserted)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(?limit, "batch transaction timed out, rolled back");
                Err(WriteError::Timeout(limit))
            }
        }
    }
}

async fn insert_in_transaction(
    client: &mut tokio_postgres::Client,
    statement: &str,
    params: &[&(dyn ToSql + Sync)],
) -> std::result::Result<u64, WriteError> {
    let transaction = client.transaction().await?;
    let result = transaction.execute(statement, params).await;
    match result {
        Ok(inserted) => {
            transaction.commit().await?;
            Ok(inserted)
        }
        Err(e) => {
            roll_back(transaction).await;
            Err(e.into())
        }
    }
}

async fn roll_back(transaction: Transaction<'_>) {
    match transaction.rollback().await {
        Ok(()) => debug!("rolled back batch"),
        Err(e) => warn!(error = %e, "rollback failed, server discards the transaction"),
    }
}

/// `INSERT INTO events (...) VALUES (...), (...)` with five parameters per row.
pub fn insert_statement(row_count: usize) -> String {
    let columns = EVENTS_COLUMNS.len();
    let values: Vec<String> = (0..row_count)
        .map(|row| {
            let p = row * columns;
            format!(
                "(${}, ST_GeomFromText(${}, {srid}), ST_GeomFromText(${}, {srid}), ${}, ${})",
                p + 1,
                p + 2,
                p + 3,
                p + 4,
                p + 5,
                srid = GEOMETRY_SRID,
            )
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        EVENTS_TABLE,
        EVENTS_COLUMNS.join(", "),
        values.join(", ")
    )
}

impl From<tokio_postgres::Error> for WriteError {
    fn from(e: tokio_postgres::Error) -> Self {
        match e.as_db_error() {
            // class 23: integrity constraint violation
            Some(db) if db.code().code().starts_with("23") => WriteError::Constraint {
                code: db.code().code().to_string(),
                message: db.message().to_string(),
            },
            Some(db) => WriteError::Statement(format!("{}: {}", db.code().code(), db.message())),
            None => WriteError::Connection(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_numbers_parameters_per_row() {
        let sql = insert_statement(2);
        assert_eq!(
            sql,
            "INSERT INTO events (region, origin_coordinate, destination_coordinate, event_time, data_source) VALUES \
             ($1, ST_GeomFromText($2, 4326), ST_GeomFromText($3, 4326), $4, $5), \
             ($6, ST_GeomFromText($7, 4326), ST_GeomFromText($8, 4326), $9, $10)"
        );
    }

    #[test]
    fn largest_batch_stays_under_parameter_cap() {
        let sql = insert_statement(crate::constants::MAX_BATCH_SIZE);
        let last = crate::constants::MAX_BATCH_SIZE * EVENTS_COLUMNS.len();
        assert!(last <= 65_535);
        assert!(sql.ends_with(&format!("${last})")));
    }
}
