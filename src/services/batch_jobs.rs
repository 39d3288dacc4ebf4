//! Batch job persistence. Jobs are never deleted here; they move through
//! statuses by id.

use crate::{
    ids::RecordKind,
    models::batch_job::{
        BATCH_JOB_COLUMNS, BatchJob, BatchJobRow, BatchJobStatus, BatchJobUpdate, CreateBatchJob,
    },
    services::{
        StoreError, StoreResult, bundles, is_foreign_key_violation,
        scope::{Scope, Select},
    },
};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Acquire, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info};

const TABLE: &str = "batch_jobs";

pub struct BatchJobRepository;

impl BatchJobRepository {
    /// Insert a new job in `PENDING`.
    pub async fn create<'a, A>(db: A, new: CreateBatchJob) -> StoreResult<BatchJob>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let id = RecordKind::BatchJob.new_id();
        let mut tx = db.begin().await?;
        let placeholders = vec!["?"; BATCH_JOB_COLUMNS.split(',').count()].join(", ");
        sqlx::query(&format!(
            "INSERT INTO batch_jobs ({BATCH_JOB_COLUMNS}) VALUES ({placeholders})"
        ))
        .bind(&id)
        .bind(Utc::now())
        .bind(None::<chrono::DateTime<Utc>>)
        .bind(BatchJobStatus::Pending)
        .bind(&new.created_by)
        .bind(&new.owner)
        .bind(&new.model_bundle_id)
        .bind(&new.model_endpoint_id)
        .bind(&new.task_ids_location)
        .bind(&new.result_location)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;

        let job = select_one(&mut *tx, Select::new(BATCH_JOB_COLUMNS, TABLE).matching("id", id))
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        tx.commit().await?;

        info!(
            batch_job_id = %job.id,
            bundle_id = %new.model_bundle_id,
            owner = %job.owner,
            "created batch job"
        );
        Ok(job)
    }

    pub async fn select_by_id<'a, A>(db: A, batch_job_id: &str) -> StoreResult<Option<BatchJob>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        select_one(
            &mut *conn,
            Select::new(BATCH_JOB_COLUMNS, TABLE).matching("id", batch_job_id),
        )
        .await
    }

    pub async fn select_all<'a, A>(db: A, scope: &Scope) -> StoreResult<Vec<BatchJob>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(BATCH_JOB_COLUMNS, TABLE)
            .scoped(scope)
            .newest_first();
        fetch_all(&mut *conn, select).await
    }

    pub async fn select_all_by_bundle<'a, A>(
        db: A,
        model_bundle_id: &str,
        scope: &Scope,
    ) -> StoreResult<Vec<BatchJob>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(BATCH_JOB_COLUMNS, TABLE)
            .scoped(scope)
            .matching("model_bundle_id", model_bundle_id)
            .newest_first();
        fetch_all(&mut *conn, select).await
    }

    /// Apply caller-named fields to the job with `batch_job_id`. The key
    /// `status` addresses the job's status.
    pub async fn update_by_id<'a, A>(
        db: A,
        batch_job_id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<bool>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let update = BatchJobUpdate::from_fields(fields)
            .map_err(|err| StoreError::invalid("batch job update", err.to_string()))?;
        Self::update(db, batch_job_id, update).await
    }

    /// Apply a typed update. Returns whether a job with that id exists.
    pub async fn update<'a, A>(
        db: A,
        batch_job_id: &str,
        update: BatchJobUpdate,
    ) -> StoreResult<bool>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        if update.is_empty() {
            let mut conn = db.acquire().await?;
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM batch_jobs WHERE id = ?")
                .bind(batch_job_id)
                .fetch_optional(&mut *conn)
                .await?;
            return Ok(exists.is_some());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE batch_jobs SET ");
        let mut columns = builder.separated(", ");
        if let Some(status) = update.batch_job_status {
            columns.push("status = ").push_bind_unseparated(status);
        }
        if let Some(completed_at) = update.completed_at {
            columns
                .push("completed_at = ")
                .push_bind_unseparated(completed_at);
        }
        if let Some(model_endpoint_id) = update.model_endpoint_id {
            columns
                .push("model_endpoint_id = ")
                .push_bind_unseparated(model_endpoint_id);
        }
        if let Some(task_ids_location) = update.task_ids_location {
            columns
                .push("task_ids_location = ")
                .push_bind_unseparated(task_ids_location);
        }
        if let Some(result_location) = update.result_location {
            columns
                .push("result_location = ")
                .push_bind_unseparated(result_location);
        }
        builder
            .push(" WHERE id = ")
            .push_bind(batch_job_id.to_string());

        let mut tx = db.begin().await?;
        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
        tx.commit().await?;

        let updated = result.rows_affected() > 0;
        if updated {
            info!(batch_job_id, status = ?update.batch_job_status, "updated batch job");
        } else {
            debug!(batch_job_id, "no batch job to update");
        }
        Ok(updated)
    }
}

async fn select_one(conn: &mut SqliteConnection, select: Select) -> StoreResult<Option<BatchJob>> {
    Ok(fetch_all(conn, select.page(Some(1), None))
        .await?
        .into_iter()
        .next())
}

async fn fetch_all(conn: &mut SqliteConnection, select: Select) -> StoreResult<Vec<BatchJob>> {
    let mut builder = select.into_builder();
    let rows: Vec<BatchJobRow> = builder.build_query_as().fetch_all(&mut *conn).await?;

    let bundle_ids = rows
        .iter()
        .filter_map(|row| row.model_bundle_id.clone())
        .collect::<Vec<_>>();
    let bundles = bundles::select_by_ids(&mut *conn, &bundle_ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let bundle = row
                .model_bundle_id
                .as_ref()
                .and_then(|id| bundles.get(id).cloned());
            row.into_batch_job(bundle)
        })
        .collect())
}

fn write_error(err: sqlx::Error) -> StoreError {
    if is_foreign_key_violation(&err) {
        StoreError::invalid("batch job", "referenced bundle or endpoint does not exist")
    } else {
        StoreError::Sqlx(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bundle::{FlavorKind, fixtures};
    use crate::services::bundles::BundleRepository;
    use crate::services::testing;
    use serde_json::json;
    use sqlx::SqlitePool;

    async fn bundle(pool: &SqlitePool) -> crate::models::bundle::Bundle {
        BundleRepository::create(
            pool,
            fixtures::create("batch", "alice", "team-a", FlavorKind::ZipArtifact),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn created_jobs_start_pending_with_their_bundle() {
        let pool = testing::pool().await;
        let bundle = bundle(&pool).await;
        let job = BatchJobRepository::create(&pool, CreateBatchJob::new("alice", "team-a", &bundle.id))
            .await
            .unwrap();
        assert!(job.id.starts_with("bat_"));
        assert_eq!(job.batch_job_status, BatchJobStatus::Pending);
        assert_eq!(job.completed_at, None);
        assert_eq!(job.model_bundle.as_ref().map(|b| b.id.as_str()), Some(bundle.id.as_str()));

        let err = BatchJobRepository::create(&pool, CreateBatchJob::new("alice", "team-a", "bun_missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn status_update_leaves_other_fields_alone() {
        let pool = testing::pool().await;
        let bundle = bundle(&pool).await;
        let mut new = CreateBatchJob::new("alice", "team-a", &bundle.id);
        new.task_ids_location = Some("s3://jobs/tasks.json".into());
        let job = BatchJobRepository::create(&pool, new).await.unwrap();

        let fields = json!({"status": "COMPLETED"}).as_object().unwrap().clone();
        assert!(BatchJobRepository::update_by_id(&pool, &job.id, fields).await.unwrap());

        let stored: String = sqlx::query_scalar("SELECT status FROM batch_jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, "COMPLETED");

        let updated = BatchJobRepository::select_by_id(&pool, &job.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            updated,
            BatchJob {
                batch_job_status: BatchJobStatus::Completed,
                ..job
            }
        );
    }

    #[tokio::test]
    async fn updating_a_missing_job_reports_false() {
        let pool = testing::pool().await;
        let fields = json!({"status": "RUNNING"}).as_object().unwrap().clone();
        assert!(!BatchJobRepository::update_by_id(&pool, "bat_missing", fields).await.unwrap());

        let fields = json!({"owner": "team-b"}).as_object().unwrap().clone();
        let err = BatchJobRepository::update_by_id(&pool, "bat_missing", fields)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn deleting_the_bundle_clears_the_reference() {
        let pool = testing::pool().await;
        let bundle = bundle(&pool).await;
        let job = BatchJobRepository::create(&pool, CreateBatchJob::new("alice", "team-a", &bundle.id))
            .await
            .unwrap();

        assert!(BundleRepository::delete(&pool, &bundle).await.unwrap());

        let orphan = BatchJobRepository::select_by_id(&pool, &job.id)
            .await
            .unwrap()
            .expect("job survives its bundle");
        assert_eq!(orphan.model_bundle_id, None);
        assert_eq!(orphan.model_bundle, None);
        assert_eq!(orphan.batch_job_status, BatchJobStatus::Pending);
    }

    #[tokio::test]
    async fn listings_are_scoped() {
        let pool = testing::pool().await;
        let first = bundle(&pool).await;
        let second = bundle(&pool).await;
        for bundle_id in [&first.id, &first.id, &second.id] {
            BatchJobRepository::create(&pool, CreateBatchJob::new("alice", "team-a", bundle_id))
                .await
                .unwrap();
        }
        BatchJobRepository::create(&pool, CreateBatchJob::new("bob", "team-b", &first.id))
            .await
            .unwrap();

        let owned = BatchJobRepository::select_all(&pool, &Scope::owner("team-a"))
            .await
            .unwrap();
        assert_eq!(owned.len(), 3);

        let by_bundle =
            BatchJobRepository::select_all_by_bundle(&pool, &first.id, &Scope::owner("team-a"))
                .await
                .unwrap();
        assert_eq!(by_bundle.len(), 2);
        assert!(by_bundle.iter().all(|job| job.owner == "team-a"));
    }
}
