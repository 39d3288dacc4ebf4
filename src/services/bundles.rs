//! Bundle persistence: create, scoped lookups, filtered listing, delete and
//! duplicate-with-overrides.
//!
//! Bundles are immutable. A new version of a bundle is a new row with the
//! same name; lookups by name return the most recently created one.

use crate::{
    ids::RecordKind,
    models::bundle::{BUNDLE_COLUMNS, Bundle, BundleRow, CreateBundle, FlavorKind},
    services::{
        StoreError, StoreResult,
        scope::{Filter, Scope, Select},
    },
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{Acquire, Sqlite, SqliteConnection};
use std::collections::HashMap;
use tracing::{debug, info};

const TABLE: &str = "bundles";

/// Override keys that would move the copy into another principal's scope.
const PRINCIPAL_FIELDS: [&str; 2] = ["created_by", "owner"];

/// Predicates accepted by [`BundleRepository::select_all_by_filters`].
#[derive(Debug, Clone, PartialEq)]
pub enum BundleFilter {
    Name(String),
    NamePrefix(String),
    Flavor(FlavorKind),
    CreatedAfter(DateTime<Utc>),
    CreatedBefore(DateTime<Utc>),
}

impl Filter for BundleFilter {
    fn apply(&self, select: &mut Select) {
        match self {
            Self::Name(name) => {
                select.eq("name", name.clone());
            }
            Self::NamePrefix(prefix) => {
                select
                    .and()
                    .push("instr(name, ")
                    .push_bind(prefix.clone())
                    .push(") = 1");
            }
            Self::Flavor(flavor) => {
                select.eq("flavor", flavor.as_str());
            }
            Self::CreatedAfter(at) => {
                select.and().push("created_at > ").push_bind(*at);
            }
            Self::CreatedBefore(at) => {
                select.and().push("created_at < ").push_bind(*at);
            }
        }
    }
}

pub struct BundleRepository;

impl BundleRepository {
    /// Insert a new bundle. Names are not checked for uniqueness: a second
    /// bundle with the same name is the newer version.
    pub async fn create<'a, A>(db: A, new: CreateBundle) -> StoreResult<Bundle>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let bundle = new.into_bundle(RecordKind::Bundle.new_id(), Utc::now());
        let row = BundleRow::from(&bundle);
        row.validate()?;

        let mut tx = db.begin().await?;
        insert_row(&mut *tx, row).await?;
        tx.commit().await?;

        info!(
            bundle_id = %bundle.id,
            name = %bundle.name,
            flavor = %bundle.flavor.kind(),
            "created bundle"
        );
        Ok(bundle)
    }

    /// The most recently created bundle named `name` within `scope`.
    pub async fn select_by_name<'a, A>(
        db: A,
        name: &str,
        scope: &Scope,
    ) -> StoreResult<Option<Bundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        latest_by_name(&mut *conn, name, scope).await
    }

    pub async fn select_all_by_name<'a, A>(
        db: A,
        name: &str,
        scope: &Scope,
    ) -> StoreResult<Vec<Bundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(BUNDLE_COLUMNS, TABLE)
            .scoped(scope)
            .matching("name", name)
            .newest_first();
        fetch_all(&mut *conn, select).await
    }

    pub async fn select_by_id<'a, A>(db: A, bundle_id: &str) -> StoreResult<Option<Bundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(BUNDLE_COLUMNS, TABLE).matching("id", bundle_id);
        Ok(fetch_all(&mut *conn, select).await?.into_iter().next())
    }

    pub async fn select_all<'a, A>(db: A, scope: &Scope) -> StoreResult<Vec<Bundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        Self::select_all_by_filters(db, scope, &[]).await
    }

    pub async fn select_all_by_filters<'a, A>(
        db: A,
        scope: &Scope,
        filters: &[BundleFilter],
    ) -> StoreResult<Vec<Bundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(BUNDLE_COLUMNS, TABLE)
            .scoped(scope)
            .filtered(filters)
            .newest_first();
        fetch_all(&mut *conn, select).await
    }

    /// Delete `bundle`. Batch jobs pointing at it keep running with a cleared
    /// bundle reference; a bundle still serving an endpoint cannot be deleted.
    pub async fn delete<'a, A>(db: A, bundle: &Bundle) -> StoreResult<bool>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut tx = db.begin().await?;
        let result = sqlx::query("DELETE FROM bundles WHERE id = ?")
            .bind(&bundle.id)
            .execute(&mut *tx)
            .await
            .map_err(|err| StoreError::from_delete(err, "bundle", &bundle.id))?;
        tx.commit().await?;

        info!(bundle_id = %bundle.id, "deleted bundle");
        Ok(result.rows_affected() > 0)
    }

    /// Copy the latest bundle named `existing_name` within `scope` into a new
    /// row with a fresh id and creation time, with `overrides` (keyed by
    /// column name) spliced in.
    ///
    /// Returns `None` without creating anything when there is no such bundle.
    pub async fn duplicate_with_overrides<'a, A>(
        db: A,
        existing_name: &str,
        scope: &Scope,
        overrides: &Map<String, Value>,
    ) -> StoreResult<Option<Bundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        if let Some(field) = PRINCIPAL_FIELDS
            .iter()
            .find(|field| overrides.contains_key(**field))
        {
            return Err(StoreError::invalid(
                "bundle",
                format!("`{field}` cannot be overridden when duplicating"),
            ));
        }

        let mut tx = db.begin().await?;
        let Some(existing) = latest_by_name(&mut *tx, existing_name, scope).await? else {
            debug!(
                name = existing_name,
                scope = scope.column(),
                principal = scope.principal(),
                "no bundle to duplicate"
            );
            return Ok(None);
        };

        let mut row = BundleRow::from(&existing).with_overrides(overrides)?;
        row.id = RecordKind::Bundle.new_id();
        row.created_at = Utc::now();
        let bundle = Bundle::try_from(row.clone())?;
        insert_row(&mut *tx, row).await?;
        tx.commit().await?;

        info!(
            source_id = %existing.id,
            bundle_id = %bundle.id,
            name = %bundle.name,
            "duplicated bundle"
        );
        Ok(Some(bundle))
    }
}

/// Fetch the bundles with the given ids, keyed by id. Missing ids are absent.
pub(crate) async fn select_by_ids(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> StoreResult<HashMap<String, Bundle>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut select = Select::new(BUNDLE_COLUMNS, TABLE);
    let builder = select.and();
    builder.push("id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");

    Ok(fetch_all(conn, select)
        .await?
        .into_iter()
        .map(|bundle| (bundle.id.clone(), bundle))
        .collect())
}

async fn latest_by_name(
    conn: &mut SqliteConnection,
    name: &str,
    scope: &Scope,
) -> StoreResult<Option<Bundle>> {
    let select = Select::new(BUNDLE_COLUMNS, TABLE)
        .scoped(scope)
        .matching("name", name)
        .newest_first()
        .page(Some(1), None);
    Ok(fetch_all(conn, select).await?.into_iter().next())
}

async fn fetch_all(conn: &mut SqliteConnection, select: Select) -> StoreResult<Vec<Bundle>> {
    let mut builder = select.into_builder();
    let rows: Vec<BundleRow> = builder.build_query_as().fetch_all(&mut *conn).await?;
    rows.into_iter()
        .map(|row| Bundle::try_from(row).map_err(StoreError::from))
        .collect()
}

/// Insert a flat row as-is. Storage re-checks every flavor constraint.
pub(crate) async fn insert_row(conn: &mut SqliteConnection, row: BundleRow) -> StoreResult<()> {
    let placeholders = vec!["?"; BUNDLE_COLUMNS.split(',').count()].join(", ");
    let sql = format!("INSERT INTO bundles ({BUNDLE_COLUMNS}) VALUES ({placeholders})");
    let name = row.name.clone();

    sqlx::query(&sql)
        .bind(row.id)
        .bind(row.name)
        .bind(row.created_by)
        .bind(row.owner)
        .bind(row.created_at)
        .bind(row.bundle_metadata)
        .bind(row.model_artifact_ids)
        .bind(row.schema_location)
        .bind(row.flavor)
        .bind(row.artifact_requirements)
        .bind(row.artifact_location)
        .bind(row.artifact_app_config)
        .bind(row.artifact_framework_type)
        .bind(row.artifact_pytorch_image_tag)
        .bind(row.artifact_tensorflow_version)
        .bind(row.artifact_image_repository)
        .bind(row.artifact_image_tag)
        .bind(row.cloudpickle_artifact_load_predict_fn)
        .bind(row.cloudpickle_artifact_load_model_fn)
        .bind(row.zip_artifact_load_predict_fn_module_path)
        .bind(row.zip_artifact_load_model_fn_module_path)
        .bind(row.runnable_image_repository)
        .bind(row.runnable_image_tag)
        .bind(row.runnable_image_command)
        .bind(row.runnable_image_predict_route)
        .bind(row.runnable_image_healthcheck_route)
        .bind(row.runnable_image_env)
        .bind(row.runnable_image_protocol)
        .bind(row.runnable_image_readiness_initial_delay_seconds)
        .bind(row.streaming_enhanced_runnable_image_streaming_command)
        .bind(row.streaming_enhanced_runnable_image_streaming_predict_route)
        .bind(row.triton_enhanced_runnable_image_model_repository)
        .bind(row.triton_enhanced_runnable_image_model_replicas)
        .bind(row.triton_enhanced_runnable_image_num_cpu)
        .bind(row.triton_enhanced_runnable_image_commit_tag)
        .bind(row.triton_enhanced_runnable_image_storage)
        .bind(row.triton_enhanced_runnable_image_memory)
        .bind(row.triton_enhanced_runnable_image_readiness_initial_delay_seconds)
        .execute(&mut *conn)
        .await
        .map_err(|err| StoreError::from_insert(err, "bundle", &name))?;

    Ok(())
}
