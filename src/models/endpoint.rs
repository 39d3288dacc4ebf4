//! A named, owner-scoped deployment of a bundle.

use crate::models::bundle::Bundle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, types::Json};

/// Metadata key whose presence marks an endpoint as serving a language
/// model. Names of marked endpoints are globally unique.
pub const LLM_METADATA_KEY: &str = "_llm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointStatus {
    #[default]
    Ready,
    UpdatePending,
    UpdateInProgress,
    UpdateFailed,
    DeleteInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EndpointType {
    #[default]
    Async,
    Sync,
    Streaming,
}

/// What an LLM-marked endpoint serves, stored under [`LLM_METADATA_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmDescriptor {
    pub model_name: String,
    #[serde(default = "LlmDescriptor::default_source")]
    pub source: String,
    #[serde(default = "LlmDescriptor::default_framework")]
    pub inference_framework: String,
    #[serde(default = "LlmDescriptor::default_image_tag")]
    pub inference_framework_image_tag: String,
    #[serde(default = "LlmDescriptor::default_num_shards")]
    pub num_shards: u32,
}

impl LlmDescriptor {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            source: Self::default_source(),
            inference_framework: Self::default_framework(),
            inference_framework_image_tag: Self::default_image_tag(),
            num_shards: Self::default_num_shards(),
        }
    }

    fn default_source() -> String {
        "hugging_face".into()
    }

    fn default_framework() -> String {
        "deepspeed".into()
    }

    fn default_image_tag() -> String {
        "latest".into()
    }

    fn default_num_shards() -> u32 {
        1
    }
}

/// A persisted endpoint with its current bundle resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub current_bundle_id: Option<String>,
    pub current_bundle: Option<Bundle>,
    pub endpoint_metadata: Map<String, Value>,
    pub creation_task_id: Option<String>,
    pub endpoint_type: EndpointType,
    /// Handle understood by the compute scheduler.
    pub destination: Option<String>,
    pub endpoint_status: EndpointStatus,
    pub public_inference: bool,
}

impl Endpoint {
    pub fn is_llm(&self) -> bool {
        self.endpoint_metadata.contains_key(LLM_METADATA_KEY)
    }

    /// The LLM descriptor, if the endpoint is marked and the marker parses.
    pub fn llm_descriptor(&self) -> Option<LlmDescriptor> {
        let value = self.endpoint_metadata.get(LLM_METADATA_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// Input for creating a new endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateEndpoint {
    pub name: String,
    pub created_by: String,
    pub owner: String,
    pub current_bundle_id: Option<String>,
    pub endpoint_metadata: Map<String, Value>,
    pub creation_task_id: Option<String>,
    pub endpoint_type: EndpointType,
    pub destination: Option<String>,
    pub endpoint_status: EndpointStatus,
    pub public_inference: bool,
}

impl CreateEndpoint {
    pub fn new(
        name: impl Into<String>,
        created_by: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            created_by: created_by.into(),
            owner: owner.into(),
            ..Self::default()
        }
    }

    pub fn is_llm(&self) -> bool {
        self.endpoint_metadata.contains_key(LLM_METADATA_KEY)
    }

    /// Mark the endpoint as serving `descriptor`.
    pub fn with_llm(mut self, descriptor: &LlmDescriptor) -> Self {
        // A struct of strings and integers always serializes.
        if let Ok(value) = serde_json::to_value(descriptor) {
            self.endpoint_metadata
                .insert(LLM_METADATA_KEY.to_string(), value);
        }
        self
    }
}

/// A partial update. `None` leaves the column untouched; for nullable
/// columns `Some(None)` clears it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EndpointUpdate {
    pub current_bundle_id: Option<Option<String>>,
    pub endpoint_status: Option<EndpointStatus>,
    pub endpoint_type: Option<EndpointType>,
    pub destination: Option<Option<String>>,
    pub endpoint_metadata: Option<Map<String, Value>>,
    pub creation_task_id: Option<Option<String>>,
    pub public_inference: Option<bool>,
}

impl EndpointUpdate {
    pub fn status(endpoint_status: EndpointStatus) -> Self {
        Self {
            endpoint_status: Some(endpoint_status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct EndpointRow {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub current_bundle_id: Option<String>,
    pub endpoint_metadata: Json<Map<String, Value>>,
    pub creation_task_id: Option<String>,
    pub endpoint_type: EndpointType,
    pub destination: Option<String>,
    pub endpoint_status: EndpointStatus,
    pub public_inference: bool,
}

pub(crate) const ENDPOINT_COLUMNS: &str = "id, name, created_by, owner, created_at, \
    last_updated_at, current_bundle_id, endpoint_metadata, creation_task_id, endpoint_type, \
    destination, endpoint_status, public_inference";

impl EndpointRow {
    pub(crate) fn into_endpoint(self, current_bundle: Option<Bundle>) -> Endpoint {
        Endpoint {
            id: self.id,
            name: self.name,
            created_by: self.created_by,
            owner: self.owner,
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
            current_bundle_id: self.current_bundle_id,
            current_bundle,
            endpoint_metadata: self.endpoint_metadata.0,
            creation_task_id: self.creation_task_id,
            endpoint_type: self.endpoint_type,
            destination: self.destination,
            endpoint_status: self.endpoint_status,
            public_inference: self.public_inference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_and_type_keep_their_wire_strings() {
        assert_eq!(
            serde_json::to_value(EndpointStatus::UpdatePending).unwrap(),
            json!("UPDATE_PENDING")
        );
        assert_eq!(serde_json::to_value(EndpointType::Async).unwrap(), json!("async"));
        assert_eq!(EndpointStatus::default(), EndpointStatus::Ready);
    }

    #[test]
    fn llm_marker_is_a_metadata_key() {
        let mut new = CreateEndpoint::new("llama", "alice", "team-a");
        assert!(!new.is_llm());
        new.endpoint_metadata
            .insert(LLM_METADATA_KEY.into(), json!({"model_name": "llama-2-7b"}));
        assert!(new.is_llm());
    }

    #[test]
    fn descriptor_fills_defaults_when_parsed() {
        let new = CreateEndpoint::new("llama", "alice", "team-a")
            .with_llm(&LlmDescriptor::new("llama-2-7b"));
        assert_eq!(
            new.endpoint_metadata[LLM_METADATA_KEY]["inference_framework"],
            json!("deepspeed")
        );

        let parsed: LlmDescriptor =
            serde_json::from_value(json!({"model_name": "mpt-7b", "num_shards": 4})).unwrap();
        assert_eq!(parsed.num_shards, 4);
        assert_eq!(parsed.source, "hugging_face");
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(EndpointUpdate::default().is_empty());
        assert!(!EndpointUpdate::status(EndpointStatus::UpdateFailed).is_empty());
    }
}
