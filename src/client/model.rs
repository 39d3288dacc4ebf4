//! `v1/llm/model-endpoints`: create, retrieve, list and remove LLM model
//! endpoints.

use super::{ClientConfig, ClientError, ClientResult, DEFAULT_TIMEOUT};
use crate::api::{
    CreateLlmModelEndpointV1Request, CreateLlmModelEndpointV1Response, DeleteLlmEndpointResponse,
    GetLlmEndpointResponse, LLM_MODEL_ENDPOINTS_PATH, ListLlmEndpointsResponse,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ModelClient {
    client: Client,
    config: ClientConfig,
}

impl ModelClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create an endpoint serving `model_name`. Self-hosted deployments
    /// only; a hosted client fails before sending anything.
    pub async fn create(&self, model_name: &str) -> ClientResult<CreateLlmModelEndpointV1Response> {
        self.config.require_self_hosted("create model endpoint")?;
        let request = CreateLlmModelEndpointV1Request {
            model_name: model_name.to_string(),
        };
        let builder = self
            .client
            .post(self.config.url(LLM_MODEL_ENDPOINTS_PATH))
            .json(&request);
        self.send(builder).await
    }

    pub async fn retrieve(&self, model_name: &str) -> ClientResult<GetLlmEndpointResponse> {
        let builder = self.client.get(self.endpoint_url(model_name));
        self.send(builder).await
    }

    pub async fn list(&self) -> ClientResult<ListLlmEndpointsResponse> {
        let builder = self.client.get(self.config.url(LLM_MODEL_ENDPOINTS_PATH));
        self.send(builder).await
    }

    pub async fn remove(&self, model_name: &str) -> ClientResult<DeleteLlmEndpointResponse> {
        let builder = self.client.delete(self.endpoint_url(model_name));
        self.send(builder).await
    }

    fn endpoint_url(&self, model_name: &str) -> String {
        self.config
            .url(&format!("{LLM_MODEL_ENDPOINTS_PATH}/{model_name}"))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let response = builder
            .basic_auth(&self.config.api_key, None::<&str>)
            .send()
            .await?;

        let status = response.status();
        debug!(url = %response.url(), %status, "model-engine response");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(response.json().await?)
    }
}
