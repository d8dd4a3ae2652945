use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, instrument};

use crate::{
    backend::{JobStore, StoreConnector},
    types::timestamp::{format_optional, format_timestamp, parse_optional, parse_timestamp},
    JobId, JobRecord, JobState, QueueError, QueueResult, WorkerId,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str = "id, name, queue, args, attempts, created_at, next_execution_at, \
     last_executed_at, state, error_details, reserved_by, reserved_at";

/// SQLite-backed job store
///
/// The atomic claim is a single `UPDATE ... RETURNING` statement, so any number
/// of processes may share one database file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a single-connection store, creating the database file if needed
    pub async fn connect(database_url: &str) -> QueueResult<Self> {
        Self::connect_with_max_connections(database_url, 1).await
    }

    #[instrument(skip(database_url))]
    pub async fn connect_with_max_connections(database_url: &str, max_connections: u32) -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| QueueError::Config(format!("Invalid database URL: {}", e)))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        debug!("SQLite job store connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the `jobs` table and its claim index if missing
    pub async fn ensure_schema(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                args TEXT,
                queue TEXT DEFAULT 'default',
                created_at TEXT,
                next_execution_at TEXT NULL,
                last_executed_at TEXT NULL,
                attempts INTEGER DEFAULT 0,
                state TEXT DEFAULT 'waiting',
                error_details TEXT NULL,
                reserved_by TEXT NULL,
                reserved_at TEXT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state_created_at ON jobs (state, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn parse_job_row(row: &SqliteRow) -> QueueResult<JobRecord> {
    let args: Option<String> = row.try_get("args")?;
    let args = match args {
        Some(text) => serde_json::from_str(&text)?,
        None => serde_json::Value::Null,
    };

    let state: Option<String> = row.try_get("state")?;
    let state = match state {
        Some(text) => text.parse::<JobState>()?,
        None => JobState::Waiting,
    };

    let attempts: Option<i64> = row.try_get("attempts")?;
    let attempts = u32::try_from(attempts.unwrap_or(0))
        .map_err(|_| QueueError::Serialization("attempts out of range".to_string()))?;

    let queue: Option<String> = row.try_get("queue")?;
    let created_at: String = row.try_get("created_at")?;
    let next_execution_at: Option<String> = row.try_get("next_execution_at")?;
    let last_executed_at: Option<String> = row.try_get("last_executed_at")?;
    let reserved_by: Option<String> = row.try_get("reserved_by")?;
    let reserved_at: Option<String> = row.try_get("reserved_at")?;

    Ok(JobRecord {
        id: JobId::from(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        queue: queue.unwrap_or_else(|| crate::DEFAULT_QUEUE.to_string()),
        args,
        attempts,
        created_at: parse_timestamp(&created_at)?,
        next_execution_at: parse_optional(next_execution_at.as_deref())?,
        last_executed_at: parse_optional(last_executed_at.as_deref())?,
        state,
        error_details: row.try_get("error_details")?,
        reserved_by: reserved_by.map(WorkerId::from),
        reserved_at: parse_optional(reserved_at.as_deref())?,
    })
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind every column in `JOB_COLUMNS` order
fn bind_job<'q>(query: SqliteQuery<'q>, job: &'q JobRecord) -> QueueResult<SqliteQuery<'q>> {
    Ok(query
        .bind(job.id.as_str())
        .bind(job.name.as_str())
        .bind(job.queue.as_str())
        .bind(serde_json::to_string(&job.args)?)
        .bind(i64::from(job.attempts))
        .bind(format_timestamp(job.created_at))
        .bind(format_optional(job.next_execution_at))
        .bind(format_optional(job.last_executed_at))
        .bind(job.state.as_str())
        .bind(job.error_details.as_deref())
        .bind(job.reserved_by.as_ref().map(|w| w.as_str()))
        .bind(format_optional(job.reserved_at)))
}

#[async_trait]
impl JobStore for SqliteStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: &JobRecord) -> QueueResult<()> {
        job.ensure_storable()?;

        let sql = format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let result = bind_job(sqlx::query(&sql), job)?.execute(&self.pool).await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(QueueError::DuplicateJob(job.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn save(&self, job: &JobRecord) -> QueueResult<()> {
        job.ensure_storable()?;

        let query = sqlx::query(
            r#"
            INSERT INTO jobs (id, name, queue, args, attempts, created_at, next_execution_at,
                              last_executed_at, state, error_details, reserved_by, reserved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                queue = excluded.queue,
                args = excluded.args,
                attempts = excluded.attempts,
                next_execution_at = excluded.next_execution_at,
                last_executed_at = excluded.last_executed_at,
                state = excluded.state,
                error_details = excluded.error_details,
                reserved_by = excluded.reserved_by,
                reserved_at = excluded.reserved_at
            "#,
        );
        bind_job(query, job)?.execute(&self.pool).await?;

        Ok(())
    }

    #[instrument(skip(self, queues), fields(worker_id = %worker_id))]
    async fn claim(
        &self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
        queues: &[String],
    ) -> QueueResult<Option<JobRecord>> {
        let queue_filter = if queues.is_empty() {
            String::new()
        } else {
            let placeholders = vec!["?"; queues.len()].join(", ");
            format!("AND queue IN ({})", placeholders)
        };

        let sql = format!(
            r#"
            UPDATE jobs
            SET reserved_by = ?, reserved_at = ?
            WHERE reserved_by IS NULL AND id = (
                SELECT id FROM jobs
                WHERE reserved_by IS NULL
                  AND state IN ('waiting', 'failed')
                  AND (next_execution_at IS NULL OR next_execution_at <= ?)
                  {queue_filter}
                ORDER BY created_at, rowid
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let now_text = format_timestamp(now);
        let mut query = sqlx::query(&sql)
            .bind(worker_id.as_str())
            .bind(now_text.as_str())
            .bind(now_text.as_str());
        for queue in queues {
            query = query.bind(queue.as_str());
        }

        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(parse_job_row).transpose()
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_job_row).transpose()
    }

    #[instrument(skip(self))]
    async fn release_stale(&self, reserved_before: DateTime<Utc>) -> QueueResult<Vec<JobId>> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET reserved_by = NULL, reserved_at = NULL
            WHERE reserved_by IS NOT NULL
              AND (reserved_at IS NULL OR reserved_at < ?)
            RETURNING id
            "#,
        )
        .bind(format_timestamp(reserved_before))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(JobId::from(row.try_get::<String, _>("id")?)))
            .collect()
    }

    async fn count_by_state(&self) -> QueueResult<HashMap<JobState, u64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS total FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let state: String = row.try_get("state")?;
            let total: i64 = row.try_get("total")?;
            counts.insert(state.parse::<JobState>()?, u64::try_from(total).unwrap_or(0));
        }
        Ok(counts)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Opens a dedicated single-connection [`SqliteStore`] per worker
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    database_url: String,
}

impl SqliteConnector {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self { database_url: database_url.into() }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    async fn connect(&self) -> QueueResult<Arc<dyn JobStore>> {
        Ok(Arc::new(SqliteStore::connect(&self.database_url).await?))
    }
}
