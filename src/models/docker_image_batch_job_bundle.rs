//! Container-only packaging descriptors used by batch jobs and triggers.
//! Immutable once created; versions share a name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DockerImageBatchJobBundle {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub image_repository: String,
    pub image_tag: String,
    #[sqlx(json)]
    pub command: Vec<String>,
    #[sqlx(json)]
    pub env: BTreeMap<String, String>,
    pub mount_location: Option<String>,
    pub cpus: Option<String>,
    pub memory: Option<String>,
    pub storage: Option<String>,
    pub gpus: Option<i32>,
    pub gpu_type: Option<String>,
    pub public: Option<bool>,
}

pub(crate) const DOCKER_IMAGE_BATCH_JOB_BUNDLE_COLUMNS: &str = "id, name, created_by, owner, \
    created_at, image_repository, image_tag, command, env, mount_location, cpus, memory, \
    storage, gpus, gpu_type, public";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateDockerImageBatchJobBundle {
    pub name: String,
    pub created_by: String,
    pub owner: String,
    pub image_repository: String,
    pub image_tag: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mount_location: Option<String>,
    pub cpus: Option<String>,
    pub memory: Option<String>,
    pub storage: Option<String>,
    pub gpus: Option<i32>,
    pub gpu_type: Option<String>,
    pub public: Option<bool>,
}

impl CreateDockerImageBatchJobBundle {
    pub fn new(
        name: impl Into<String>,
        created_by: impl Into<String>,
        owner: impl Into<String>,
        image_repository: impl Into<String>,
        image_tag: impl Into<String>,
        command: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            created_by: created_by.into(),
            owner: owner.into(),
            image_repository: image_repository.into(),
            image_tag: image_tag.into(),
            command,
            public: Some(false),
            ..Self::default()
        }
    }

    pub(crate) fn into_bundle(
        self,
        id: String,
        created_at: DateTime<Utc>,
    ) -> DockerImageBatchJobBundle {
        DockerImageBatchJobBundle {
            id,
            name: self.name,
            created_by: self.created_by,
            owner: self.owner,
            created_at,
            image_repository: self.image_repository,
            image_tag: self.image_tag,
            command: self.command,
            env: self.env,
            mount_location: self.mount_location,
            cpus: self.cpus,
            memory: self.memory,
            storage: self.storage,
            gpus: self.gpus,
            gpu_type: self.gpu_type,
            public: self.public,
        }
    }
}
