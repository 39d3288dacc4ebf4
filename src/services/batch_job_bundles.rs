//! Docker image batch job bundle persistence. Rows are immutable: there is
//! no update or delete.

use crate::{
    ids::RecordKind,
    models::docker_image_batch_job_bundle::{
        CreateDockerImageBatchJobBundle, DOCKER_IMAGE_BATCH_JOB_BUNDLE_COLUMNS,
        DockerImageBatchJobBundle,
    },
    services::{
        StoreError, StoreResult,
        scope::{Scope, Select},
    },
};
use chrono::Utc;
use sqlx::{Acquire, Sqlite, SqliteConnection, types::Json};
use tracing::info;

const TABLE: &str = "docker_image_batch_job_bundles";

pub struct BatchJobBundleRepository;

impl BatchJobBundleRepository {
    pub async fn create<'a, A>(
        db: A,
        new: CreateDockerImageBatchJobBundle,
    ) -> StoreResult<DockerImageBatchJobBundle>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        if new.command.is_empty() {
            return Err(StoreError::invalid(
                "docker image batch job bundle",
                "command must not be empty",
            ));
        }
        let bundle = new.into_bundle(RecordKind::DockerImageBatchJobBundle.new_id(), Utc::now());

        let placeholders =
            vec!["?"; DOCKER_IMAGE_BATCH_JOB_BUNDLE_COLUMNS.split(',').count()].join(", ");
        let mut tx = db.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO {TABLE} ({DOCKER_IMAGE_BATCH_JOB_BUNDLE_COLUMNS}) VALUES ({placeholders})"
        ))
        .bind(&bundle.id)
        .bind(&bundle.name)
        .bind(&bundle.created_by)
        .bind(&bundle.owner)
        .bind(bundle.created_at)
        .bind(&bundle.image_repository)
        .bind(&bundle.image_tag)
        .bind(Json(&bundle.command))
        .bind(Json(&bundle.env))
        .bind(&bundle.mount_location)
        .bind(&bundle.cpus)
        .bind(&bundle.memory)
        .bind(&bundle.storage)
        .bind(bundle.gpus)
        .bind(&bundle.gpu_type)
        .bind(bundle.public)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            batch_bundle_id = %bundle.id,
            name = %bundle.name,
            image = %format!("{}:{}", bundle.image_repository, bundle.image_tag),
            "created docker image batch job bundle"
        );
        Ok(bundle)
    }

    pub async fn select_all<'a, A>(
        db: A,
        scope: &Scope,
    ) -> StoreResult<Vec<DockerImageBatchJobBundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(DOCKER_IMAGE_BATCH_JOB_BUNDLE_COLUMNS, TABLE)
            .scoped(scope)
            .newest_first();
        fetch_all(&mut *conn, select).await
    }

    /// The most recently created version named `name` within `scope`.
    pub async fn select_latest_by_name<'a, A>(
        db: A,
        name: &str,
        scope: &Scope,
    ) -> StoreResult<Option<DockerImageBatchJobBundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(DOCKER_IMAGE_BATCH_JOB_BUNDLE_COLUMNS, TABLE)
            .scoped(scope)
            .matching("name", name)
            .newest_first()
            .page(Some(1), None);
        Ok(fetch_all(&mut *conn, select).await?.into_iter().next())
    }

    pub async fn select_all_by_name<'a, A>(
        db: A,
        name: &str,
        scope: &Scope,
    ) -> StoreResult<Vec<DockerImageBatchJobBundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(DOCKER_IMAGE_BATCH_JOB_BUNDLE_COLUMNS, TABLE)
            .scoped(scope)
            .matching("name", name)
            .newest_first();
        fetch_all(&mut *conn, select).await
    }

    pub async fn select_by_id<'a, A>(
        db: A,
        batch_bundle_id: &str,
    ) -> StoreResult<Option<DockerImageBatchJobBundle>>
    where
        A: Acquire<'a, Database = Sqlite>,
    {
        let mut conn = db.acquire().await?;
        let select = Select::new(DOCKER_IMAGE_BATCH_JOB_BUNDLE_COLUMNS, TABLE)
            .matching("id", batch_bundle_id);
        Ok(fetch_all(&mut *conn, select).await?.into_iter().next())
    }
}

async fn fetch_all(
    conn: &mut SqliteConnection,
    select: Select,
) -> StoreResult<Vec<DockerImageBatchJobBundle>> {
    let mut builder = select.into_builder();
    Ok(builder.build_query_as().fetch_all(&mut *conn).await?)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn create(name: &str, created_by: &str, owner: &str) -> CreateDockerImageBatchJobBundle {
        let mut new = CreateDockerImageBatchJobBundle::new(
            name,
            created_by,
            owner,
            "registry.local/fine-tune",
            "1.4.0",
            vec!["python".into(), "-m".into(), "train".into()],
        );
        new.env.insert("EPOCHS".into(), "3".into());
        new.gpus = Some(1);
        new.gpu_type = Some("nvidia-ampere-a10".into());
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing;

    #[tokio::test]
    async fn created_bundle_reads_back_unchanged() {
        let pool = testing::pool().await;
        let created = BatchJobBundleRepository::create(&pool, fixtures::create("ft", "alice", "team-a"))
            .await
            .unwrap();
        assert!(created.id.starts_with("batbun_"));
        assert_eq!(created.public, Some(false));

        let fetched = BatchJobBundleRepository::select_by_id(&pool, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.command, created.command);
        assert_eq!(fetched.env, created.env);
        assert_eq!(fetched.gpus, Some(1));
        assert_eq!(fetched.mount_location, None);
    }

    #[tokio::test]
    async fn latest_version_wins_within_scope() {
        let pool = testing::pool().await;
        let mut ids = Vec::new();
        for _ in 0..2 {
            let created =
                BatchJobBundleRepository::create(&pool, fixtures::create("ft", "alice", "team-a"))
                    .await
                    .unwrap();
            ids.push(created.id);
        }
        BatchJobBundleRepository::create(&pool, fixtures::create("ft", "bob", "team-b"))
            .await
            .unwrap();

        let scope = Scope::owner("team-a");
        let latest = BatchJobBundleRepository::select_latest_by_name(&pool, "ft", &scope)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, ids[1]);

        let versions = BatchJobBundleRepository::select_all_by_name(&pool, "ft", &scope)
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);

        let all = BatchJobBundleRepository::select_all(&pool, &Scope::created_by("bob"))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        let none = BatchJobBundleRepository::select_latest_by_name(&pool, "ft", &Scope::owner("team-c"))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let pool = testing::pool().await;
        let mut new = fixtures::create("ft", "alice", "team-a");
        new.command.clear();
        let err = BatchJobBundleRepository::create(&pool, new).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }
}
