//! Endpoint persistence.
//!
//! Every public lookup is scoped to one principal. The unscoped filtered
//! select is crate-private and exists so the scoped variants share one
//! query composer; code reaching it must authorize the caller itself.

use crate::{
    ids::RecordKind,
    models::endpoint::{
        CreateEndpoint, ENDPOINT_COLUMNS, Endpoint, EndpointRow, EndpointStatus, EndpointType,
        EndpointUpdate,
    },
    services::{
        StoreError, StoreResult, bundles, is_foreign_key_violation, is_unique_violation,
        scope::{Filter, Scope, Select},
    },
};
use chrono::Utc;
use sqlx::{Acquire, QueryBuilder, Sqlite, SqliteConnection, types::Json};
use tracing::{debug, info};

const TABLE: &str = "endpoints";
const LLM_PREDICATE: &str = "json_type(endpoint_metadata, '$._llm') IS NOT NULL";

/// Predicates accepted by the filtered endpoint selects.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointFilter {
    Name(String),
    NamePrefix(String),
    CurrentBundle(String),
    Status(EndpointStatus),
    Type(EndpointType),
    PublicInference(bool),
    /// `true` keeps only LLM-marked endpoints, `false` only the others.
    Llm(bool),
}

impl Filter for EndpointFilter {
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
            Self::CurrentBundle(bundle_id) => {
                select.eq("current_bundle_id", bundle_id.clone());
            }
            Self::Status(status) => {
                select.and().push("endpoint_status = ").push_bind(*status);
            }
            Self::Type(endpoint_type) => {
                select.and().push("endpoint_type = ").push_bind(*endpoint_type);
            }
            Self::PublicInference(public) => {
                select.and().push("public_inference = ").push_bind(*public);
            }
            Self::Llm(true) => {
                select.and().push(LLM_PREDICATE);
            }
            Self::Llm(false) => {
                select.and().push("NOT (").push(LLM_PREDICATE).push(")");
            }
        }
    }
}

pub struct EndpointRepository;

impl EndpointRepository {
    /// Insert a new endpoint.
    ///
    /// Fails with `Conflict` when the name is taken for the same creator or
    /// owner, or, for LLM-marked endpoints, by any other LLM endpoint.
    pub async fn create<'a, A>(db: A, new: CreateEndpoint) -> StoreResult<Endpoint>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut tx = db.begin().await?;

        let taken: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM endpoints WHERE name = ? AND (created_by = ? OR owner = ?) LIMIT 1",
        )
        .bind(&new.name)
        .bind(&new.created_by)
        .bind(&new.owner)
        .fetch_optional(&mut *tx)
        .await?;
        if taken.is_some() {
            return Err(conflict(&new.name));
        }
        if new.is_llm() {
            let taken: Option<i64> = sqlx::query_scalar(&format!(
                "SELECT 1 FROM endpoints WHERE name = ? AND {LLM_PREDICATE} LIMIT 1"
            ))
            .bind(&new.name)
            .fetch_optional(&mut *tx)
            .await?;
            if taken.is_some() {
                return Err(conflict(&new.name));
            }
        }

        let now = Utc::now();
        let id = RecordKind::Endpoint.new_id();
        let placeholders = vec!["?"; ENDPOINT_COLUMNS.split(',').count()].join(", ");
        sqlx::query(&format!(
            "INSERT INTO endpoints ({ENDPOINT_COLUMNS}) VALUES ({placeholders})"
        ))
        .bind(&id)
        .bind(&new.name)
        .bind(&new.created_by)
        .bind(&new.owner)
        .bind(now)
        .bind(now)
        .bind(&new.current_bundle_id)
        .bind(Json(&new.endpoint_metadata))
        .bind(&new.creation_task_id)
        .bind(new.endpoint_type)
        .bind(&new.destination)
        .bind(new.endpoint_status)
        .bind(new.public_inference)
        .execute(&mut *tx)
        .await
        .map_err(|err| write_error(err, &new.name))?;

        let endpoint = select_one(&mut *tx, Select::new(ENDPOINT_COLUMNS, TABLE).matching("id", id))
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        tx.commit().await?;

        info!(
            endpoint_id = %endpoint.id,
            name = %endpoint.name,
            owner = %endpoint.owner,
            llm = endpoint.is_llm(),
            "created endpoint"
        );
        Ok(endpoint)
    }

    /// Apply `update` to the endpoint named `name` within `scope` and touch
    /// its `last_updated_at`. Returns the updated endpoint, or `None` when
    /// there is no such endpoint.
    pub async fn update_by_name<'a, A>(
        db: A,
        name: &str,
        scope: &Scope,
        update: EndpointUpdate,
    ) -> StoreResult<Option<Endpoint>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE endpoints SET last_updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(current_bundle_id) = update.current_bundle_id {
            builder
                .push(", current_bundle_id = ")
                .push_bind(current_bundle_id);
        }
        if let Some(endpoint_status) = update.endpoint_status {
            builder.push(", endpoint_status = ").push_bind(endpoint_status);
        }
        if let Some(endpoint_type) = update.endpoint_type {
            builder.push(", endpoint_type = ").push_bind(endpoint_type);
        }
        if let Some(destination) = update.destination {
            builder.push(", destination = ").push_bind(destination);
        }
        if let Some(endpoint_metadata) = update.endpoint_metadata {
            builder
                .push(", endpoint_metadata = ")
                .push_bind(Json(endpoint_metadata));
        }
        if let Some(creation_task_id) = update.creation_task_id {
            builder
                .push(", creation_task_id = ")
                .push_bind(creation_task_id);
        }
        if let Some(public_inference) = update.public_inference {
            builder
                .push(", public_inference = ")
                .push_bind(public_inference);
        }
        builder
            .push(" WHERE name = ")
            .push_bind(name.to_string())
            .push(" AND ")
            .push(scope.column())
            .push(" = ")
            .push_bind(scope.principal().to_string());

        let mut tx = db.begin().await?;
        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(|err| write_error(err, name))?;
        if result.rows_affected() == 0 {
            debug!(name, scope = scope.column(), "no endpoint to update");
            return Ok(None);
        }

        let select = Select::new(ENDPOINT_COLUMNS, TABLE)
            .scoped(scope)
            .matching("name", name);
        let endpoint = select_one(&mut *tx, select).await?;
        tx.commit().await?;

        info!(name, scope = scope.column(), "updated endpoint");
        Ok(endpoint)
    }

    pub async fn update_status<'a, A>(
        db: A,
        name: &str,
        scope: &Scope,
        endpoint_status: EndpointStatus,
    ) -> StoreResult<Option<Endpoint>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        Self::update_by_name(db, name, scope, EndpointUpdate::status(endpoint_status)).await
    }

    pub async fn select_by_name<'a, A>(
        db: A,
        name: &str,
        scope: &Scope,
    ) -> StoreResult<Option<Endpoint>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(ENDPOINT_COLUMNS, TABLE)
            .scoped(scope)
            .matching("name", name);
        select_one(&mut *conn, select).await
    }

    pub async fn select_by_id<'a, A>(db: A, endpoint_id: &str) -> StoreResult<Option<Endpoint>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        select_one(
            &mut *conn,
            Select::new(ENDPOINT_COLUMNS, TABLE).matching("id", endpoint_id),
        )
        .await
    }

    /// Every endpoint in `scope`, optionally only those serving
    /// `current_bundle_id`.
    pub async fn select_all<'a, A>(
        db: A,
        scope: &Scope,
        current_bundle_id: Option<&str>,
    ) -> StoreResult<Vec<Endpoint>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let filters = current_bundle_id
            .map(|id| EndpointFilter::CurrentBundle(id.to_string()))
            .into_iter()
            .collect::<Vec<_>>();
        Self::select_all_by_filters(db, scope, &filters, None, None).await
    }

    pub async fn select_all_by_filters<'a, A>(
        db: A,
        scope: &Scope,
        filters: &[EndpointFilter],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> StoreResult<Vec<Endpoint>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut predicates: Vec<&(dyn Filter + Sync)> = vec![scope as &(dyn Filter + Sync)];
        predicates.extend(filters.iter().map(|filter| filter as &(dyn Filter + Sync)));

        let mut conn = db.acquire().await?;
        select_all_by_filters_unscoped(&mut *conn, &predicates, limit, offset).await
    }

    /// Delete the endpoint with `endpoint_id`. Returns whether a row was
    /// removed; an endpoint still referenced by a batch job is `InUse`.
    pub async fn delete<'a, A>(db: A, endpoint_id: &str) -> StoreResult<bool>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut tx = db.begin().await?;
        let result = sqlx::query("DELETE FROM endpoints WHERE id = ?")
            .bind(endpoint_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| StoreError::from_delete(err, "endpoint", endpoint_id))?;
        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(endpoint_id, "deleted endpoint");
        }
        Ok(deleted)
    }
}

/// Filtered select across every owner.
///
/// Performs no authorization: callers must only pass endpoints on to a
/// principal they have checked. Scoped selects reach it with their [`Scope`]
/// as the first predicate.
pub(crate) async fn select_all_by_filters_unscoped(
    conn: &mut SqliteConnection,
    filters: &[&(dyn Filter + Sync)],
    limit: Option<i64>,
    offset: Option<i64>,
) -> StoreResult<Vec<Endpoint>> {
    let select = Select::new(ENDPOINT_COLUMNS, TABLE)
        .filtered(filters)
        .newest_first()
        .page(limit, offset);
    fetch_all(conn, select).await
}

async fn select_one(conn: &mut SqliteConnection, select: Select) -> StoreResult<Option<Endpoint>> {
    Ok(fetch_all(conn, select.page(Some(1), None))
        .await?
        .into_iter()
        .next())
}

/// Run `select` and resolve every endpoint's current bundle in one batch.
async fn fetch_all(conn: &mut SqliteConnection, select: Select) -> StoreResult<Vec<Endpoint>> {
    let mut builder = select.into_builder();
    let rows: Vec<EndpointRow> = builder.build_query_as().fetch_all(&mut *conn).await?;

    let bundle_ids = rows
        .iter()
        .filter_map(|row| row.current_bundle_id.clone())
        .collect::<Vec<_>>();
    let bundles = bundles::select_by_ids(&mut *conn, &bundle_ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let bundle = row
                .current_bundle_id
                .as_ref()
                .and_then(|id| bundles.get(id).cloned());
            row.into_endpoint(bundle)
        })
        .collect())
}

fn conflict(name: &str) -> StoreError {
    StoreError::Conflict {
        entity: "endpoint",
        name: name.to_string(),
    }
}

fn write_error(err: sqlx::Error, name: &str) -> StoreError {
    if is_unique_violation(&err) {
        conflict(name)
    } else if is_foreign_key_violation(&err) {
        StoreError::invalid("endpoint", "current bundle does not exist")
    } else {
        StoreError::Sqlx(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bundle::{FlavorKind, fixtures};
    use crate::models::endpoint::LLM_METADATA_KEY;
    use crate::services::bundles::BundleRepository;
    use crate::services::testing;
    use serde_json::json;
    use sqlx::SqlitePool;

    fn llm(name: &str, created_by: &str, owner: &str) -> CreateEndpoint {
        let mut new = CreateEndpoint::new(name, created_by, owner);
        new.endpoint_metadata
            .insert(LLM_METADATA_KEY.into(), json!({"model_name": name}));
        new
    }

    async fn bundle(pool: &SqlitePool, owner: &str) -> String {
        BundleRepository::create(
            pool,
            fixtures::create("llm", owner, owner, FlavorKind::RunnableImage),
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn lookups_resolve_the_current_bundle() {
        let pool = testing::pool().await;
        let bundle_id = bundle(&pool, "alice").await;
        let mut new = CreateEndpoint::new("chat", "alice", "team-a");
        new.current_bundle_id = Some(bundle_id.clone());
        let created = EndpointRepository::create(&pool, new).await.unwrap();
        assert!(created.id.starts_with("end_"));
        assert_eq!(created.endpoint_status, EndpointStatus::Ready);
        assert_eq!(created.endpoint_type, EndpointType::Async);

        for scope in [Scope::created_by("alice"), Scope::owner("team-a")] {
            let found = EndpointRepository::select_by_name(&pool, "chat", &scope)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.current_bundle.unwrap().id, bundle_id);
        }
        let by_id = EndpointRepository::select_by_id(&pool, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.current_bundle_id.as_deref(), Some(bundle_id.as_str()));
    }

    #[tokio::test]
    async fn names_are_unique_per_creator_and_per_owner() {
        let pool = testing::pool().await;
        EndpointRepository::create(&pool, CreateEndpoint::new("chat", "alice", "team-a"))
            .await
            .unwrap();

        let err = EndpointRepository::create(&pool, CreateEndpoint::new("chat", "alice", "team-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let err = EndpointRepository::create(&pool, CreateEndpoint::new("chat", "bob", "team-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        EndpointRepository::create(&pool, CreateEndpoint::new("chat", "bob", "team-b"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn llm_names_are_globally_unique() {
        let pool = testing::pool().await;
        EndpointRepository::create(&pool, llm("llama-2-7b", "alice", "team-a"))
            .await
            .unwrap();

        let err = EndpointRepository::create(&pool, llm("llama-2-7b", "bob", "team-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Storage enforces it too: marking an existing endpoint as an LLM.
        EndpointRepository::create(&pool, CreateEndpoint::new("llama-2-7b", "bob", "team-b"))
            .await
            .unwrap();
        let mut metadata = serde_json::Map::new();
        metadata.insert(LLM_METADATA_KEY.into(), json!({}));
        let err = EndpointRepository::update_by_name(
            &pool,
            "llama-2-7b",
            &Scope::owner("team-b"),
            EndpointUpdate {
                endpoint_metadata: Some(metadata),
                ..EndpointUpdate::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn unknown_bundle_reference_is_rejected() {
        let pool = testing::pool().await;
        let mut new = CreateEndpoint::new("chat", "alice", "team-a");
        new.current_bundle_id = Some("bun_missing".into());
        let err = EndpointRepository::create(&pool, new).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn status_update_touches_only_status_and_timestamp() {
        let pool = testing::pool().await;
        let mut new = CreateEndpoint::new("chat", "alice", "team-a");
        new.destination = Some("queue-1".into());
        let created = EndpointRepository::create(&pool, new).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let updated = EndpointRepository::update_status(
            &pool,
            "chat",
            &Scope::created_by("alice"),
            EndpointStatus::UpdateInProgress,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(updated.endpoint_status, EndpointStatus::UpdateInProgress);
        assert!(updated.last_updated_at > created.last_updated_at);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.destination, created.destination);

        let other = EndpointRepository::update_status(
            &pool,
            "chat",
            &Scope::created_by("mallory"),
            EndpointStatus::UpdateFailed,
        )
        .await
        .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn update_can_repoint_and_clear_fields() {
        let pool = testing::pool().await;
        let first = bundle(&pool, "alice").await;
        let second = bundle(&pool, "alice").await;
        let mut new = CreateEndpoint::new("chat", "alice", "team-a");
        new.current_bundle_id = Some(first);
        new.destination = Some("queue-1".into());
        EndpointRepository::create(&pool, new).await.unwrap();

        let updated = EndpointRepository::update_by_name(
            &pool,
            "chat",
            &Scope::owner("team-a"),
            EndpointUpdate {
                current_bundle_id: Some(Some(second.clone())),
                destination: Some(None),
                public_inference: Some(true),
                ..EndpointUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(updated.current_bundle.unwrap().id, second);
        assert_eq!(updated.destination, None);
        assert!(updated.public_inference);
    }

    #[tokio::test]
    async fn listings_filter_within_scope() {
        let pool = testing::pool().await;
        let bundle_id = bundle(&pool, "alice").await;
        let mut served = CreateEndpoint::new("served", "alice", "team-a");
        served.current_bundle_id = Some(bundle_id.clone());
        EndpointRepository::create(&pool, served).await.unwrap();
        EndpointRepository::create(&pool, llm("llama", "alice", "team-a"))
            .await
            .unwrap();
        EndpointRepository::create(&pool, CreateEndpoint::new("other", "bob", "team-b"))
            .await
            .unwrap();

        let scope = Scope::owner("team-a");
        let all = EndpointRepository::select_all(&pool, &scope, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let by_bundle = EndpointRepository::select_all(&pool, &scope, Some(bundle_id.as_str()))
            .await
            .unwrap();
        assert_eq!(by_bundle.len(), 1);
        assert_eq!(by_bundle[0].name, "served");

        let llms = EndpointRepository::select_all_by_filters(
            &pool,
            &scope,
            &[EndpointFilter::Llm(true)],
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(llms.len(), 1);
        assert!(llms[0].is_llm());

        let plain = EndpointRepository::select_all_by_filters(
            &pool,
            &Scope::created_by("alice"),
            &[EndpointFilter::Llm(false), EndpointFilter::Status(EndpointStatus::Ready)],
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].name, "served");
    }

    #[tokio::test]
    async fn unscoped_select_spans_every_owner() {
        let pool = testing::pool().await;
        for (name, owner) in [("a", "team-a"), ("b", "team-b"), ("c", "team-c")] {
            EndpointRepository::create(&pool, CreateEndpoint::new(name, owner, owner))
                .await
                .unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        let everyone = select_all_by_filters_unscoped(&mut *conn, &[], None, None)
            .await
            .unwrap();
        assert_eq!(everyone.len(), 3);

        let page = select_all_by_filters_unscoped(&mut *conn, &[], Some(2), Some(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);

        let named = select_all_by_filters_unscoped(
            &mut *conn,
            &[&EndpointFilter::Name("b".into()) as &(dyn Filter + Sync)],
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].owner, "team-b");
        drop(conn);

        let mine = EndpointRepository::select_all(&pool, &Scope::owner("team-b"), None)
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_went_away() {
        let pool = testing::pool().await;
        let created = EndpointRepository::create(&pool, CreateEndpoint::new("chat", "alice", "team-a"))
            .await
            .unwrap();
        assert!(EndpointRepository::delete(&pool, &created.id).await.unwrap());
        assert!(!EndpointRepository::delete(&pool, &created.id).await.unwrap());
    }
}
