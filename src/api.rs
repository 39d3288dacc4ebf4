//! Wire types for `v1/llm/model-endpoints`, shared by [`crate::client`] and
//! the server handlers.

use crate::models::endpoint::{Endpoint, EndpointStatus, EndpointType, LlmDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LLM_MODEL_ENDPOINTS_PATH: &str = "v1/llm/model-endpoints";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLlmModelEndpointV1Request {
    pub model_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLlmModelEndpointV1Response {
    pub endpoint_creation_task_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetLlmEndpointResponse {
    pub id: String,
    pub name: String,
    pub model_name: String,
    pub source: String,
    pub inference_framework: String,
    pub inference_framework_image_tag: String,
    pub num_shards: u32,
    pub status: EndpointStatus,
    pub endpoint_type: EndpointType,
    pub public_inference: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl GetLlmEndpointResponse {
    /// Describe `endpoint`. `None` when it carries no readable LLM marker.
    pub fn from_endpoint(endpoint: &Endpoint) -> Option<Self> {
        let LlmDescriptor {
            model_name,
            source,
            inference_framework,
            inference_framework_image_tag,
            num_shards,
        } = endpoint.llm_descriptor()?;
        Some(Self {
            id: endpoint.id.clone(),
            name: endpoint.name.clone(),
            model_name,
            source,
            inference_framework,
            inference_framework_image_tag,
            num_shards,
            status: endpoint.endpoint_status,
            endpoint_type: endpoint.endpoint_type,
            public_inference: endpoint.public_inference,
            created_at: endpoint.created_at,
            last_updated_at: endpoint.last_updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListLlmEndpointsResponse {
    pub model_endpoints: Vec<GetLlmEndpointResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteLlmEndpointResponse {
    pub deleted: bool,
}
