//! Typed HTTP client for the model-engine API.
//!
//! Configuration comes from the environment:
//! - `MODEL_ENGINE_BASE_URL` (defaults to [`HOSTED_BASE_URL`])
//! - `MODEL_ENGINE_API_KEY` (required; sent as the basic-auth username)
//!
//! Pointing the base URL anywhere but the hosted service switches the client
//! to [`DeploymentMode::SelfHosted`], which unlocks operations the hosted
//! service does not offer.

pub mod model;

pub use model::ModelClient;

use std::{env, fmt, time::Duration};
use thiserror::Error;

/// Per-request timeout for every call the client makes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const HOSTED_BASE_URL: &str = "https://api.model-engine.cloud/";

const BASE_URL_VAR: &str = "MODEL_ENGINE_BASE_URL";
const API_KEY_VAR: &str = "MODEL_ENGINE_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    Hosted,
    SelfHosted,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hosted => "hosted",
            Self::SelfHosted => "self-hosted",
        })
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("`{operation}` is not available in {mode} deployments")]
    UnsupportedInDeploymentMode {
        operation: &'static str,
        mode: DeploymentMode,
    },
    #[error("MODEL_ENGINE_API_KEY is not set")]
    MissingApiKey,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("request failed with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env() -> ClientResult<Self> {
        let base_url = env::var(BASE_URL_VAR).unwrap_or_else(|_| HOSTED_BASE_URL.into());
        let api_key = env::var(API_KEY_VAR).map_err(|_| ClientError::MissingApiKey)?;
        Ok(Self::new(base_url, api_key))
    }

    pub fn deployment_mode(&self) -> DeploymentMode {
        if normalize(&self.base_url) == normalize(HOSTED_BASE_URL) {
            DeploymentMode::Hosted
        } else {
            DeploymentMode::SelfHosted
        }
    }

    /// `base_url` joined with `path`.
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", normalize(&self.base_url), path.trim_start_matches('/'))
    }

    /// Fail with `UnsupportedInDeploymentMode` unless self-hosted.
    pub(crate) fn require_self_hosted(&self, operation: &'static str) -> ClientResult<()> {
        match self.deployment_mode() {
            DeploymentMode::SelfHosted => Ok(()),
            mode => Err(ClientError::UnsupportedInDeploymentMode { operation, mode }),
        }
    }
}

fn normalize(url: &str) -> &str {
    url.trim_end_matches('/')
}
