//! Trigger persistence. Names are unique per owner.

use crate::{
    ids::RecordKind,
    models::trigger::{
        CreateTrigger, TRIGGER_COLUMNS, Trigger, TriggerRow, TriggerUpdate,
        validate_cron_schedule,
    },
    services::{
        StoreError, StoreResult, is_foreign_key_violation, is_unique_violation,
        scope::{Scope, Select},
    },
};
use chrono::Utc;
use sqlx::{Acquire, QueryBuilder, Sqlite, SqliteConnection, types::Json};
use tracing::{debug, info};

const TABLE: &str = "triggers";

pub struct TriggerRepository;

impl TriggerRepository {
    pub async fn create<'a, A>(db: A, new: CreateTrigger) -> StoreResult<Trigger>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        validate_cron_schedule(&new.cron_schedule)
            .map_err(|err| StoreError::invalid("trigger", err.to_string()))?;

        let trigger = Trigger {
            id: RecordKind::Trigger.new_id(),
            name: new.name,
            owner: new.owner,
            created_by: new.created_by,
            created_at: Utc::now(),
            cron_schedule: new.cron_schedule,
            docker_image_batch_job_bundle_id: new.docker_image_batch_job_bundle_id,
            default_job_config: new.default_job_config,
            default_job_metadata: new.default_job_metadata,
        };

        let placeholders = vec!["?"; TRIGGER_COLUMNS.split(',').count()].join(", ");
        let mut tx = db.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO triggers ({TRIGGER_COLUMNS}) VALUES ({placeholders})"
        ))
        .bind(&trigger.id)
        .bind(&trigger.name)
        .bind(&trigger.owner)
        .bind(&trigger.created_by)
        .bind(trigger.created_at)
        .bind(&trigger.cron_schedule)
        .bind(&trigger.docker_image_batch_job_bundle_id)
        .bind(trigger.default_job_config.as_ref().map(Json))
        .bind(trigger.default_job_metadata.as_ref().map(Json))
        .execute(&mut *tx)
        .await
        .map_err(|err| write_error(err, &trigger.name))?;
        tx.commit().await?;

        info!(
            trigger_id = %trigger.id,
            name = %trigger.name,
            schedule = %trigger.cron_schedule,
            "created trigger"
        );
        Ok(trigger)
    }

    pub async fn select_by_id<'a, A>(db: A, trigger_id: &str) -> StoreResult<Option<Trigger>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(TRIGGER_COLUMNS, TABLE).matching("id", trigger_id);
        Ok(fetch_all(&mut *conn, select).await?.into_iter().next())
    }

    pub async fn select_by_name<'a, A>(
        db: A,
        name: &str,
        scope: &Scope,
    ) -> StoreResult<Option<Trigger>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(TRIGGER_COLUMNS, TABLE)
            .scoped(scope)
            .matching("name", name)
            .newest_first();
        Ok(fetch_all(&mut *conn, select).await?.into_iter().next())
    }

    pub async fn select_all<'a, A>(db: A, scope: &Scope) -> StoreResult<Vec<Trigger>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(TRIGGER_COLUMNS, TABLE)
            .scoped(scope)
            .newest_first();
        fetch_all(&mut *conn, select).await
    }

    /// Returns whether a trigger with `trigger_id` exists.
    pub async fn update_by_id<'a, A>(
        db: A,
        trigger_id: &str,
        update: TriggerUpdate,
    ) -> StoreResult<bool>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        if let Some(schedule) = &update.cron_schedule {
            validate_cron_schedule(schedule)
                .map_err(|err| StoreError::invalid("trigger", err.to_string()))?;
        }
        if update == TriggerUpdate::default() {
            return Ok(Self::select_by_id(db, trigger_id).await?.is_some());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE triggers SET ");
        let mut columns = builder.separated(", ");
        if let Some(cron_schedule) = update.cron_schedule {
            columns
                .push("cron_schedule = ")
                .push_bind_unseparated(cron_schedule);
        }
        if let Some(config) = update.default_job_config {
            columns
                .push("default_job_config = ")
                .push_bind_unseparated(config.map(Json));
        }
        if let Some(metadata) = update.default_job_metadata {
            columns
                .push("default_job_metadata = ")
                .push_bind_unseparated(metadata.map(Json));
        }
        builder
            .push(" WHERE id = ")
            .push_bind(trigger_id.to_string());

        let mut tx = db.begin().await?;
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        let updated = result.rows_affected() > 0;
        if updated {
            info!(trigger_id, "updated trigger");
        } else {
            debug!(trigger_id, "no trigger to update");
        }
        Ok(updated)
    }

    pub async fn delete<'a, A>(db: A, trigger_id: &str) -> StoreResult<bool>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut tx = db.begin().await?;
        let result = sqlx::query("DELETE FROM triggers WHERE id = ?")
            .bind(trigger_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(trigger_id, "deleted trigger");
        }
        Ok(deleted)
    }
}

async fn fetch_all(conn: &mut SqliteConnection, select: Select) -> StoreResult<Vec<Trigger>> {
    let mut builder = select.into_builder();
    let rows: Vec<TriggerRow> = builder.build_query_as().fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(Trigger::from).collect())
}

fn write_error(err: sqlx::Error, name: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict {
            entity: "trigger",
            name: name.to_string(),
        }
    } else if is_foreign_key_violation(&err) {
        StoreError::invalid("trigger", "docker image batch job bundle does not exist")
    } else {
        StoreError::Sqlx(err)
    }
}
