//! The polymorphic bundle record: a versioned descriptor of how to run a model.
//!
//! A bundle is exactly one of five packaging flavors. In memory the flavor is
//! a closed sum type ([`BundleFlavor`]) where each variant carries only its
//! own field group. In storage it is one flat row ([`BundleRow`]) with one
//! nullable column per flavor field, discriminated by the `flavor` column.
//! Converting a row back into a [`Bundle`] re-checks every flavor/field
//! implication in both directions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, types::Json};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error;

/// Columns regenerated on every insert; never copied from a source row.
pub const AUTOGENERATED_FIELDS: [&str; 2] = ["id", "created_at"];

#[derive(Debug, Error, PartialEq)]
pub enum BundleValidationError {
    #[error("unknown bundle flavor `{0}`")]
    UnknownFlavor(String),
    #[error("unknown artifact framework type `{0}`")]
    UnknownFramework(String),
    #[error("unknown runnable image protocol `{0}`")]
    UnknownProtocol(String),
    #[error("`{field}` is required for {context}")]
    MissingField {
        field: &'static str,
        context: String,
    },
    #[error("`{field}` is not allowed for {context}")]
    UnexpectedField {
        field: &'static str,
        context: String,
    },
    #[error("`{0}` is not a bundle field")]
    UnknownField(String),
    #[error("invalid bundle override: {0}")]
    InvalidOverride(String),
}

/// Discriminant of [`BundleFlavor`], as persisted in the `flavor` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlavorKind {
    CloudpickleArtifact,
    ZipArtifact,
    RunnableImage,
    StreamingEnhancedRunnableImage,
    TritonEnhancedRunnableImage,
}

impl FlavorKind {
    pub const ALL: [FlavorKind; 5] = [
        Self::CloudpickleArtifact,
        Self::ZipArtifact,
        Self::RunnableImage,
        Self::StreamingEnhancedRunnableImage,
        Self::TritonEnhancedRunnableImage,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CloudpickleArtifact => "cloudpickle_artifact",
            Self::ZipArtifact => "zip_artifact",
            Self::RunnableImage => "runnable_image",
            Self::StreamingEnhancedRunnableImage => "streaming_enhanced_runnable_image",
            Self::TritonEnhancedRunnableImage => "triton_enhanced_runnable_image",
        }
    }

    pub const fn is_artifact(self) -> bool {
        matches!(self, Self::CloudpickleArtifact | Self::ZipArtifact)
    }

    pub const fn is_runnable_image(self) -> bool {
        !self.is_artifact()
    }
}

impl fmt::Display for FlavorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlavorKind {
    type Err = BundleValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BundleValidationError::UnknownFlavor(s.to_string()))
    }
}

/// Discriminant of [`ArtifactFramework`], as persisted in
/// `artifact_framework_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkKind {
    Pytorch,
    Tensorflow,
    CustomBaseImage,
}

impl FrameworkKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pytorch => "pytorch",
            Self::Tensorflow => "tensorflow",
            Self::CustomBaseImage => "custom_base_image",
        }
    }
}

impl FromStr for FrameworkKind {
    type Err = BundleValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pytorch" => Ok(Self::Pytorch),
            "tensorflow" => Ok(Self::Tensorflow),
            "custom_base_image" => Ok(Self::CustomBaseImage),
            other => Err(BundleValidationError::UnknownFramework(other.to_string())),
        }
    }
}

/// The base image an artifact bundle runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "framework_type", rename_all = "snake_case")]
pub enum ArtifactFramework {
    Pytorch {
        pytorch_image_tag: String,
    },
    Tensorflow {
        tensorflow_version: String,
    },
    CustomBaseImage {
        image_repository: String,
        image_tag: String,
    },
}

impl ArtifactFramework {
    pub const fn kind(&self) -> FrameworkKind {
        match self {
            Self::Pytorch { .. } => FrameworkKind::Pytorch,
            Self::Tensorflow { .. } => FrameworkKind::Tensorflow,
            Self::CustomBaseImage { .. } => FrameworkKind::CustomBaseImage,
        }
    }
}

/// Fields shared by the cloudpickle and zip artifact flavors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub requirements: Vec<String>,
    pub location: String,
    pub app_config: Option<Map<String, Value>>,
    pub framework: ArtifactFramework,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnableImageProtocol {
    #[default]
    Http,
}

impl RunnableImageProtocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
        }
    }
}

impl FromStr for RunnableImageProtocol {
    type Err = BundleValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            other => Err(BundleValidationError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Fields shared by every runnable image flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnableImageSpec {
    pub repository: String,
    pub tag: String,
    pub command: Vec<String>,
    pub predict_route: String,
    pub healthcheck_route: String,
    /// Always persisted, even when empty.
    pub env: BTreeMap<String, String>,
    pub protocol: RunnableImageProtocol,
    pub readiness_initial_delay_seconds: Option<i32>,
}

/// Extra fields of the triton enhanced runnable image flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TritonSpec {
    pub model_repository: String,
    pub model_replicas: Option<BTreeMap<String, String>>,
    pub num_cpu: f64,
    pub commit_tag: String,
    pub storage: Option<String>,
    pub memory: Option<String>,
    pub readiness_initial_delay_seconds: i32,
}

/// The packaging flavor of a bundle together with its flavor-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flavor", rename_all = "snake_case")]
pub enum BundleFlavor {
    CloudpickleArtifact {
        artifact: ArtifactSpec,
        load_predict_fn: String,
        load_model_fn: String,
    },
    ZipArtifact {
        artifact: ArtifactSpec,
        load_predict_fn_module_path: String,
        load_model_fn_module_path: String,
    },
    RunnableImage {
        image: RunnableImageSpec,
    },
    StreamingEnhancedRunnableImage {
        image: RunnableImageSpec,
        streaming_command: Vec<String>,
        streaming_predict_route: String,
    },
    TritonEnhancedRunnableImage {
        image: RunnableImageSpec,
        triton: TritonSpec,
    },
}

impl BundleFlavor {
    pub const fn kind(&self) -> FlavorKind {
        match self {
            Self::CloudpickleArtifact { .. } => FlavorKind::CloudpickleArtifact,
            Self::ZipArtifact { .. } => FlavorKind::ZipArtifact,
            Self::RunnableImage { .. } => FlavorKind::RunnableImage,
            Self::StreamingEnhancedRunnableImage { .. } => {
                FlavorKind::StreamingEnhancedRunnableImage
            }
            Self::TritonEnhancedRunnableImage { .. } => FlavorKind::TritonEnhancedRunnableImage,
        }
    }

    pub fn artifact(&self) -> Option<&ArtifactSpec> {
        match self {
            Self::CloudpickleArtifact { artifact, .. } | Self::ZipArtifact { artifact, .. } => {
                Some(artifact)
            }
            _ => None,
        }
    }

    pub fn runnable_image(&self) -> Option<&RunnableImageSpec> {
        match self {
            Self::RunnableImage { image }
            | Self::StreamingEnhancedRunnableImage { image, .. }
            | Self::TritonEnhancedRunnableImage { image, .. } => Some(image),
            _ => None,
        }
    }
}

/// A persisted bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub model_artifact_ids: Vec<String>,
    pub bundle_metadata: Map<String, Value>,
    pub schema_location: Option<String>,
    #[serde(flatten)]
    pub flavor: BundleFlavor,
}

/// Input for creating a new bundle. Id and creation time are assigned on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateBundle {
    pub name: String,
    pub created_by: String,
    pub owner: String,
    pub model_artifact_ids: Vec<String>,
    pub bundle_metadata: Map<String, Value>,
    pub schema_location: Option<String>,
    pub flavor: BundleFlavor,
}

impl CreateBundle {
    pub fn new(
        name: impl Into<String>,
        created_by: impl Into<String>,
        owner: impl Into<String>,
        flavor: BundleFlavor,
    ) -> Self {
        Self {
            name: name.into(),
            created_by: created_by.into(),
            owner: owner.into(),
            model_artifact_ids: Vec::new(),
            bundle_metadata: Map::new(),
            schema_location: None,
            flavor,
        }
    }

    pub(crate) fn into_bundle(self, id: String, created_at: DateTime<Utc>) -> Bundle {
        Bundle {
            id,
            name: self.name,
            created_by: self.created_by,
            owner: self.owner,
            created_at,
            model_artifact_ids: self.model_artifact_ids,
            bundle_metadata: self.bundle_metadata,
            schema_location: self.schema_location,
            flavor: self.flavor,
        }
    }
}

/// The flat storage form of a bundle: one nullable column per flavor field.
///
/// Field names are the column names, which are also the keys accepted by
/// duplicate-with-overrides.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleRow {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub bundle_metadata: Json<Map<String, Value>>,
    pub model_artifact_ids: Json<Vec<String>>,
    pub schema_location: Option<String>,
    pub flavor: String,

    pub artifact_requirements: Option<Json<Vec<String>>>,
    pub artifact_location: Option<String>,
    pub artifact_app_config: Option<Json<Map<String, Value>>>,
    pub artifact_framework_type: Option<String>,
    pub artifact_pytorch_image_tag: Option<String>,
    pub artifact_tensorflow_version: Option<String>,
    pub artifact_image_repository: Option<String>,
    pub artifact_image_tag: Option<String>,

    pub cloudpickle_artifact_load_predict_fn: Option<String>,
    pub cloudpickle_artifact_load_model_fn: Option<String>,

    pub zip_artifact_load_predict_fn_module_path: Option<String>,
    pub zip_artifact_load_model_fn_module_path: Option<String>,

    pub runnable_image_repository: Option<String>,
    pub runnable_image_tag: Option<String>,
    pub runnable_image_command: Option<Json<Vec<String>>>,
    pub runnable_image_predict_route: Option<String>,
    pub runnable_image_healthcheck_route: Option<String>,
    pub runnable_image_env: Option<Json<BTreeMap<String, String>>>,
    pub runnable_image_protocol: Option<String>,
    pub runnable_image_readiness_initial_delay_seconds: Option<i32>,

    pub streaming_enhanced_runnable_image_streaming_command: Option<Json<Vec<String>>>,
    pub streaming_enhanced_runnable_image_streaming_predict_route: Option<String>,

    pub triton_enhanced_runnable_image_model_repository: Option<String>,
    pub triton_enhanced_runnable_image_model_replicas: Option<Json<BTreeMap<String, String>>>,
    pub triton_enhanced_runnable_image_num_cpu: Option<f64>,
    pub triton_enhanced_runnable_image_commit_tag: Option<String>,
    pub triton_enhanced_runnable_image_storage: Option<String>,
    pub triton_enhanced_runnable_image_memory: Option<String>,
    pub triton_enhanced_runnable_image_readiness_initial_delay_seconds: Option<i32>,
}

/// Column list in declaration order, shared by every SELECT and INSERT.
pub(crate) const BUNDLE_COLUMNS: &str = "id, name, created_by, owner, created_at, \
    bundle_metadata, model_artifact_ids, schema_location, flavor, \
    artifact_requirements, artifact_location, artifact_app_config, artifact_framework_type, \
    artifact_pytorch_image_tag, artifact_tensorflow_version, artifact_image_repository, \
    artifact_image_tag, cloudpickle_artifact_load_predict_fn, cloudpickle_artifact_load_model_fn, \
    zip_artifact_load_predict_fn_module_path, zip_artifact_load_model_fn_module_path, \
    runnable_image_repository, runnable_image_tag, runnable_image_command, \
    runnable_image_predict_route, runnable_image_healthcheck_route, runnable_image_env, \
    runnable_image_protocol, runnable_image_readiness_initial_delay_seconds, \
    streaming_enhanced_runnable_image_streaming_command, \
    streaming_enhanced_runnable_image_streaming_predict_route, \
    triton_enhanced_runnable_image_model_repository, triton_enhanced_runnable_image_model_replicas, \
    triton_enhanced_runnable_image_num_cpu, triton_enhanced_runnable_image_commit_tag, \
    triton_enhanced_runnable_image_storage, triton_enhanced_runnable_image_memory, \
    triton_enhanced_runnable_image_readiness_initial_delay_seconds";

/// Check one field group against whether it `applies` to the row: every
/// `required` field must be set when it applies, and no field of the group
/// may be set when it does not.
fn check_group(
    context: &str,
    applies: bool,
    required: &[(&'static str, bool)],
    optional: &[(&'static str, bool)],
) -> Result<(), BundleValidationError> {
    for &(field, is_set) in required {
        if applies && !is_set {
            return Err(BundleValidationError::MissingField {
                field,
                context: context.to_string(),
            });
        }
    }
    for &(field, is_set) in required.iter().chain(optional) {
        if !applies && is_set {
            return Err(BundleValidationError::UnexpectedField {
                field,
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

impl BundleRow {
    /// Check every flavor/field implication in both directions: the fields a
    /// flavor requires are set, and no field of another flavor's group is.
    pub fn validate(&self) -> Result<FlavorKind, BundleValidationError> {
        let kind: FlavorKind = self.flavor.parse()?;
        let framework = self
            .artifact_framework_type
            .as_deref()
            .map(FrameworkKind::from_str)
            .transpose()?;
        if let Some(protocol) = self.runnable_image_protocol.as_deref() {
            protocol.parse::<RunnableImageProtocol>()?;
        }

        let flavor_ctx = format!("flavor {kind}");
        let framework_ctx = match framework {
            Some(framework) => format!("framework {}", framework.as_str()),
            None => flavor_ctx.clone(),
        };

        check_group(
            &flavor_ctx,
            kind.is_artifact(),
            &[
                ("artifact_requirements", self.artifact_requirements.is_some()),
                ("artifact_location", self.artifact_location.is_some()),
                ("artifact_framework_type", self.artifact_framework_type.is_some()),
            ],
            &[("artifact_app_config", self.artifact_app_config.is_some())],
        )?;
        check_group(
            &framework_ctx,
            framework == Some(FrameworkKind::Pytorch),
            &[("artifact_pytorch_image_tag", self.artifact_pytorch_image_tag.is_some())],
            &[],
        )?;
        check_group(
            &framework_ctx,
            framework == Some(FrameworkKind::Tensorflow),
            &[("artifact_tensorflow_version", self.artifact_tensorflow_version.is_some())],
            &[],
        )?;
        check_group(
            &framework_ctx,
            framework == Some(FrameworkKind::CustomBaseImage),
            &[
                ("artifact_image_repository", self.artifact_image_repository.is_some()),
                ("artifact_image_tag", self.artifact_image_tag.is_some()),
            ],
            &[],
        )?;
        check_group(
            &flavor_ctx,
            kind == FlavorKind::CloudpickleArtifact,
            &[
                (
                    "cloudpickle_artifact_load_predict_fn",
                    self.cloudpickle_artifact_load_predict_fn.is_some(),
                ),
                (
                    "cloudpickle_artifact_load_model_fn",
                    self.cloudpickle_artifact_load_model_fn.is_some(),
                ),
            ],
            &[],
        )?;
        check_group(
            &flavor_ctx,
            kind == FlavorKind::ZipArtifact,
            &[
                (
                    "zip_artifact_load_predict_fn_module_path",
                    self.zip_artifact_load_predict_fn_module_path.is_some(),
                ),
                (
                    "zip_artifact_load_model_fn_module_path",
                    self.zip_artifact_load_model_fn_module_path.is_some(),
                ),
            ],
            &[],
        )?;
        check_group(
            &flavor_ctx,
            kind.is_runnable_image(),
            &[
                ("runnable_image_repository", self.runnable_image_repository.is_some()),
                ("runnable_image_tag", self.runnable_image_tag.is_some()),
                ("runnable_image_command", self.runnable_image_command.is_some()),
                ("runnable_image_predict_route", self.runnable_image_predict_route.is_some()),
                (
                    "runnable_image_healthcheck_route",
                    self.runnable_image_healthcheck_route.is_some(),
                ),
                ("runnable_image_env", self.runnable_image_env.is_some()),
                ("runnable_image_protocol", self.runnable_image_protocol.is_some()),
            ],
            &[(
                "runnable_image_readiness_initial_delay_seconds",
                self.runnable_image_readiness_initial_delay_seconds.is_some(),
            )],
        )?;
        check_group(
            &flavor_ctx,
            kind == FlavorKind::StreamingEnhancedRunnableImage,
            &[
                (
                    "streaming_enhanced_runnable_image_streaming_command",
                    self.streaming_enhanced_runnable_image_streaming_command.is_some(),
                ),
                (
                    "streaming_enhanced_runnable_image_streaming_predict_route",
                    self.streaming_enhanced_runnable_image_streaming_predict_route.is_some(),
                ),
            ],
            &[],
        )?;
        check_group(
            &flavor_ctx,
            kind == FlavorKind::TritonEnhancedRunnableImage,
            &[
                (
                    "triton_enhanced_runnable_image_model_repository",
                    self.triton_enhanced_runnable_image_model_repository.is_some(),
                ),
                (
                    "triton_enhanced_runnable_image_num_cpu",
                    self.triton_enhanced_runnable_image_num_cpu.is_some(),
                ),
                (
                    "triton_enhanced_runnable_image_commit_tag",
                    self.triton_enhanced_runnable_image_commit_tag.is_some(),
                ),
                (
                    "triton_enhanced_runnable_image_readiness_initial_delay_seconds",
                    self.triton_enhanced_runnable_image_readiness_initial_delay_seconds
                        .is_some(),
                ),
            ],
            &[
                (
                    "triton_enhanced_runnable_image_model_replicas",
                    self.triton_enhanced_runnable_image_model_replicas.is_some(),
                ),
                (
                    "triton_enhanced_runnable_image_storage",
                    self.triton_enhanced_runnable_image_storage.is_some(),
                ),
                (
                    "triton_enhanced_runnable_image_memory",
                    self.triton_enhanced_runnable_image_memory.is_some(),
                ),
            ],
        )?;

        Ok(kind)
    }

    /// Splice `overrides` into this row. Keys must be column names; the
    /// autogenerated columns are ignored since they are reassigned on insert.
    pub fn with_overrides(
        self,
        overrides: &Map<String, Value>,
    ) -> Result<Self, BundleValidationError> {
        let mut fields = match serde_json::to_value(&self) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                return Err(BundleValidationError::InvalidOverride(format!(
                    "unexpected row encoding {other}"
                )));
            }
            Err(err) => return Err(BundleValidationError::InvalidOverride(err.to_string())),
        };
        for (key, value) in overrides {
            if !fields.contains_key(key) {
                return Err(BundleValidationError::UnknownField(key.clone()));
            }
            if AUTOGENERATED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(fields))
            .map_err(|err| BundleValidationError::InvalidOverride(err.to_string()))
    }
}

fn present<T>(value: Option<T>, field: &'static str, context: &str) -> Result<T, BundleValidationError> {
    value.ok_or_else(|| BundleValidationError::MissingField {
        field,
        context: context.to_string(),
    })
}

impl TryFrom<BundleRow> for Bundle {
    type Error = BundleValidationError;

    fn try_from(row: BundleRow) -> Result<Self, Self::Error> {
        let kind = row.validate()?;
        let ctx = format!("flavor {kind}");

        let artifact = |row: &mut BundleRow| -> Result<ArtifactSpec, BundleValidationError> {
            let framework_type: FrameworkKind = present(
                row.artifact_framework_type.take(),
                "artifact_framework_type",
                &ctx,
            )?
            .parse()?;
            let fw_ctx = format!("framework {}", framework_type.as_str());
            let framework = match framework_type {
                FrameworkKind::Pytorch => ArtifactFramework::Pytorch {
                    pytorch_image_tag: present(
                        row.artifact_pytorch_image_tag.take(),
                        "artifact_pytorch_image_tag",
                        &fw_ctx,
                    )?,
                },
                FrameworkKind::Tensorflow => ArtifactFramework::Tensorflow {
                    tensorflow_version: present(
                        row.artifact_tensorflow_version.take(),
                        "artifact_tensorflow_version",
                        &fw_ctx,
                    )?,
                },
                FrameworkKind::CustomBaseImage => ArtifactFramework::CustomBaseImage {
                    image_repository: present(
                        row.artifact_image_repository.take(),
                        "artifact_image_repository",
                        &fw_ctx,
                    )?,
                    image_tag: present(row.artifact_image_tag.take(), "artifact_image_tag", &fw_ctx)?,
                },
            };
            Ok(ArtifactSpec {
                requirements: present(row.artifact_requirements.take(), "artifact_requirements", &ctx)?.0,
                location: present(row.artifact_location.take(), "artifact_location", &ctx)?,
                app_config: row.artifact_app_config.take().map(|config| config.0),
                framework,
            })
        };

        let image = |row: &mut BundleRow| -> Result<RunnableImageSpec, BundleValidationError> {
            Ok(RunnableImageSpec {
                repository: present(row.runnable_image_repository.take(), "runnable_image_repository", &ctx)?,
                tag: present(row.runnable_image_tag.take(), "runnable_image_tag", &ctx)?,
                command: present(row.runnable_image_command.take(), "runnable_image_command", &ctx)?.0,
                predict_route: present(row.runnable_image_predict_route.take(), "runnable_image_predict_route", &ctx)?,
                healthcheck_route: present(
                    row.runnable_image_healthcheck_route.take(),
                    "runnable_image_healthcheck_route",
                    &ctx,
                )?,
                env: present(row.runnable_image_env.take(), "runnable_image_env", &ctx)?.0,
                protocol: present(row.runnable_image_protocol.take(), "runnable_image_protocol", &ctx)?
                    .parse()?,
                readiness_initial_delay_seconds: row.runnable_image_readiness_initial_delay_seconds,
            })
        };

        let mut row = row;
        let flavor = match kind {
            FlavorKind::CloudpickleArtifact => BundleFlavor::CloudpickleArtifact {
                artifact: artifact(&mut row)?,
                load_predict_fn: present(
                    row.cloudpickle_artifact_load_predict_fn.take(),
                    "cloudpickle_artifact_load_predict_fn",
                    &ctx,
                )?,
                load_model_fn: present(
                    row.cloudpickle_artifact_load_model_fn.take(),
                    "cloudpickle_artifact_load_model_fn",
                    &ctx,
                )?,
            },
            FlavorKind::ZipArtifact => BundleFlavor::ZipArtifact {
                artifact: artifact(&mut row)?,
                load_predict_fn_module_path: present(
                    row.zip_artifact_load_predict_fn_module_path.take(),
                    "zip_artifact_load_predict_fn_module_path",
                    &ctx,
                )?,
                load_model_fn_module_path: present(
                    row.zip_artifact_load_model_fn_module_path.take(),
                    "zip_artifact_load_model_fn_module_path",
                    &ctx,
                )?,
            },
            FlavorKind::RunnableImage => BundleFlavor::RunnableImage {
                image: image(&mut row)?,
            },
            FlavorKind::StreamingEnhancedRunnableImage => BundleFlavor::StreamingEnhancedRunnableImage {
                image: image(&mut row)?,
                streaming_command: present(
                    row.streaming_enhanced_runnable_image_streaming_command.take(),
                    "streaming_enhanced_runnable_image_streaming_command",
                    &ctx,
                )?
                .0,
                streaming_predict_route: present(
                    row.streaming_enhanced_runnable_image_streaming_predict_route.take(),
                    "streaming_enhanced_runnable_image_streaming_predict_route",
                    &ctx,
                )?,
            },
            FlavorKind::TritonEnhancedRunnableImage => BundleFlavor::TritonEnhancedRunnableImage {
                image: image(&mut row)?,
                triton: TritonSpec {
                    model_repository: present(
                        row.triton_enhanced_runnable_image_model_repository.take(),
                        "triton_enhanced_runnable_image_model_repository",
                        &ctx,
                    )?,
                    model_replicas: row
                        .triton_enhanced_runnable_image_model_replicas
                        .take()
                        .map(|replicas| replicas.0),
                    num_cpu: present(
                        row.triton_enhanced_runnable_image_num_cpu,
                        "triton_enhanced_runnable_image_num_cpu",
                        &ctx,
                    )?,
                    commit_tag: present(
                        row.triton_enhanced_runnable_image_commit_tag.take(),
                        "triton_enhanced_runnable_image_commit_tag",
                        &ctx,
                    )?,
                    storage: row.triton_enhanced_runnable_image_storage.take(),
                    memory: row.triton_enhanced_runnable_image_memory.take(),
                    readiness_initial_delay_seconds: present(
                        row.triton_enhanced_runnable_image_readiness_initial_delay_seconds,
                        "triton_enhanced_runnable_image_readiness_initial_delay_seconds",
                        &ctx,
                    )?,
                },
            },
        };

        Ok(Bundle {
            id: row.id,
            name: row.name,
            created_by: row.created_by,
            owner: row.owner,
            created_at: row.created_at,
            model_artifact_ids: row.model_artifact_ids.0,
            bundle_metadata: row.bundle_metadata.0,
            schema_location: row.schema_location,
            flavor,
        })
    }
}

impl From<&Bundle> for BundleRow {
    fn from(bundle: &Bundle) -> Self {
        let mut row = BundleRow {
            id: bundle.id.clone(),
            name: bundle.name.clone(),
            created_by: bundle.created_by.clone(),
            owner: bundle.owner.clone(),
            created_at: bundle.created_at,
            bundle_metadata: Json(bundle.bundle_metadata.clone()),
            model_artifact_ids: Json(bundle.model_artifact_ids.clone()),
            schema_location: bundle.schema_location.clone(),
            flavor: bundle.flavor.kind().as_str().to_string(),
            artifact_requirements: None,
            artifact_location: None,
            artifact_app_config: None,
            artifact_framework_type: None,
            artifact_pytorch_image_tag: None,
            artifact_tensorflow_version: None,
            artifact_image_repository: None,
            artifact_image_tag: None,
            cloudpickle_artifact_load_predict_fn: None,
            cloudpickle_artifact_load_model_fn: None,
            zip_artifact_load_predict_fn_module_path: None,
            zip_artifact_load_model_fn_module_path: None,
            runnable_image_repository: None,
            runnable_image_tag: None,
            runnable_image_command: None,
            runnable_image_predict_route: None,
            runnable_image_healthcheck_route: None,
            runnable_image_env: None,
            runnable_image_protocol: None,
            runnable_image_readiness_initial_delay_seconds: None,
            streaming_enhanced_runnable_image_streaming_command: None,
            streaming_enhanced_runnable_image_streaming_predict_route: None,
            triton_enhanced_runnable_image_model_repository: None,
            triton_enhanced_runnable_image_model_replicas: None,
            triton_enhanced_runnable_image_num_cpu: None,
            triton_enhanced_runnable_image_commit_tag: None,
            triton_enhanced_runnable_image_storage: None,
            triton_enhanced_runnable_image_memory: None,
            triton_enhanced_runnable_image_readiness_initial_delay_seconds: None,
        };

        if let Some(artifact) = bundle.flavor.artifact() {
            row.artifact_requirements = Some(Json(artifact.requirements.clone()));
            row.artifact_location = Some(artifact.location.clone());
            row.artifact_app_config = artifact.app_config.clone().map(Json);
            row.artifact_framework_type = Some(artifact.framework.kind().as_str().to_string());
            match &artifact.framework {
                ArtifactFramework::Pytorch { pytorch_image_tag } => {
                    row.artifact_pytorch_image_tag = Some(pytorch_image_tag.clone());
                }
                ArtifactFramework::Tensorflow { tensorflow_version } => {
                    row.artifact_tensorflow_version = Some(tensorflow_version.clone());
                }
                ArtifactFramework::CustomBaseImage {
                    image_repository,
                    image_tag,
                } => {
                    row.artifact_image_repository = Some(image_repository.clone());
                    row.artifact_image_tag = Some(image_tag.clone());
                }
            }
        }

        if let Some(image) = bundle.flavor.runnable_image() {
            row.runnable_image_repository = Some(image.repository.clone());
            row.runnable_image_tag = Some(image.tag.clone());
            row.runnable_image_command = Some(Json(image.command.clone()));
            row.runnable_image_predict_route = Some(image.predict_route.clone());
            row.runnable_image_healthcheck_route = Some(image.healthcheck_route.clone());
            row.runnable_image_env = Some(Json(image.env.clone()));
            row.runnable_image_protocol = Some(image.protocol.as_str().to_string());
            row.runnable_image_readiness_initial_delay_seconds =
                image.readiness_initial_delay_seconds;
        }

        match &bundle.flavor {
            BundleFlavor::CloudpickleArtifact {
                load_predict_fn,
                load_model_fn,
                ..
            } => {
                row.cloudpickle_artifact_load_predict_fn = Some(load_predict_fn.clone());
                row.cloudpickle_artifact_load_model_fn = Some(load_model_fn.clone());
            }
            BundleFlavor::ZipArtifact {
                load_predict_fn_module_path,
                load_model_fn_module_path,
                ..
            } => {
                row.zip_artifact_load_predict_fn_module_path =
                    Some(load_predict_fn_module_path.clone());
                row.zip_artifact_load_model_fn_module_path = Some(load_model_fn_module_path.clone());
            }
            BundleFlavor::RunnableImage { .. } => {}
            BundleFlavor::StreamingEnhancedRunnableImage {
                streaming_command,
                streaming_predict_route,
                ..
            } => {
                row.streaming_enhanced_runnable_image_streaming_command =
                    Some(Json(streaming_command.clone()));
                row.streaming_enhanced_runnable_image_streaming_predict_route =
                    Some(streaming_predict_route.clone());
            }
            BundleFlavor::TritonEnhancedRunnableImage { triton, .. } => {
                row.triton_enhanced_runnable_image_model_repository =
                    Some(triton.model_repository.clone());
                row.triton_enhanced_runnable_image_model_replicas =
                    triton.model_replicas.clone().map(Json);
                row.triton_enhanced_runnable_image_num_cpu = Some(triton.num_cpu);
                row.triton_enhanced_runnable_image_commit_tag = Some(triton.commit_tag.clone());
                row.triton_enhanced_runnable_image_storage = triton.storage.clone();
                row.triton_enhanced_runnable_image_memory = triton.memory.clone();
                row.triton_enhanced_runnable_image_readiness_initial_delay_seconds =
                    Some(triton.readiness_initial_delay_seconds);
            }
        }

        row
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn every_flavor_round_trips_through_its_row() {
        for kind in FlavorKind::ALL {
            let bundle = bundle(kind);
            let row = BundleRow::from(&bundle);
            assert_eq!(row.flavor, kind.as_str());
            assert_eq!(row.validate(), Ok(kind));
            assert_eq!(Bundle::try_from(row).unwrap(), bundle);
        }
    }

    #[test]
    fn missing_required_field_is_rejected_for_each_flavor() {
        let cases: [(FlavorKind, fn(&mut BundleRow), &str); 5] = [
            (
                FlavorKind::CloudpickleArtifact,
                |r| r.cloudpickle_artifact_load_model_fn = None,
                "cloudpickle_artifact_load_model_fn",
            ),
            (
                FlavorKind::ZipArtifact,
                |r| r.artifact_image_tag = None,
                "artifact_image_tag",
            ),
            (
                FlavorKind::RunnableImage,
                |r| r.runnable_image_env = None,
                "runnable_image_env",
            ),
            (
                FlavorKind::StreamingEnhancedRunnableImage,
                |r| r.streaming_enhanced_runnable_image_streaming_predict_route = None,
                "streaming_enhanced_runnable_image_streaming_predict_route",
            ),
            (
                FlavorKind::TritonEnhancedRunnableImage,
                |r| r.triton_enhanced_runnable_image_num_cpu = None,
                "triton_enhanced_runnable_image_num_cpu",
            ),
        ];
        for (kind, strip, expected) in cases {
            let mut row = BundleRow::from(&bundle(kind));
            strip(&mut row);
            match row.validate() {
                Err(BundleValidationError::MissingField { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected missing `{expected}` for {kind}, got {other:?}"),
            }
            assert!(Bundle::try_from(row).is_err());
        }
    }

    #[test]
    fn field_from_another_flavor_is_rejected() {
        let mut row = BundleRow::from(&bundle(FlavorKind::CloudpickleArtifact));
        row.triton_enhanced_runnable_image_num_cpu = Some(4.0);
        assert_eq!(
            row.validate(),
            Err(BundleValidationError::UnexpectedField {
                field: "triton_enhanced_runnable_image_num_cpu",
                context: "flavor cloudpickle_artifact".into(),
            })
        );

        let mut row = BundleRow::from(&bundle(FlavorKind::RunnableImage));
        row.artifact_location = Some("s3://stray".into());
        assert!(matches!(
            row.validate(),
            Err(BundleValidationError::UnexpectedField { field: "artifact_location", .. })
        ));

        let mut row = BundleRow::from(&bundle(FlavorKind::StreamingEnhancedRunnableImage));
        row.flavor = FlavorKind::RunnableImage.as_str().into();
        assert!(matches!(
            row.validate(),
            Err(BundleValidationError::UnexpectedField {
                field: "streaming_enhanced_runnable_image_streaming_command",
                ..
            })
        ));
    }

    #[test]
    fn framework_fields_follow_the_framework_type() {
        let mut row = BundleRow::from(&bundle(FlavorKind::CloudpickleArtifact));
        row.artifact_framework_type = Some("tensorflow".into());
        assert_eq!(
            row.validate(),
            Err(BundleValidationError::UnexpectedField {
                field: "artifact_pytorch_image_tag",
                context: "framework tensorflow".into(),
            })
        );

        row.artifact_pytorch_image_tag = None;
        assert!(matches!(
            row.validate(),
            Err(BundleValidationError::MissingField { field: "artifact_tensorflow_version", .. })
        ));

        row.artifact_tensorflow_version = Some("2.14".into());
        assert_eq!(row.validate(), Ok(FlavorKind::CloudpickleArtifact));

        row.artifact_framework_type = Some("jax".into());
        assert_eq!(
            row.validate(),
            Err(BundleValidationError::UnknownFramework("jax".into()))
        );
    }

    #[test]
    fn unknown_flavor_is_rejected() {
        let mut row = BundleRow::from(&bundle(FlavorKind::RunnableImage));
        row.flavor = "onnx_artifact".into();
        assert_eq!(
            row.validate(),
            Err(BundleValidationError::UnknownFlavor("onnx_artifact".into()))
        );
    }

    #[test]
    fn overrides_are_spliced_and_autogenerated_fields_kept() {
        let row = BundleRow::from(&bundle(FlavorKind::RunnableImage));
        let overrides = json!({
            "id": "bun_forged",
            "runnable_image_tag": "v2",
            "bundle_metadata": {"stage": "canary"},
        });
        let updated = row
            .clone()
            .with_overrides(overrides.as_object().unwrap())
            .unwrap();
        assert_eq!(updated.id, row.id);
        assert_eq!(updated.runnable_image_tag.as_deref(), Some("v2"));
        assert_eq!(updated.bundle_metadata.0["stage"], "canary");
        assert_eq!(updated.runnable_image_command, row.runnable_image_command);
    }

    #[test]
    fn overrides_with_unknown_keys_are_rejected() {
        let row = BundleRow::from(&bundle(FlavorKind::RunnableImage));
        let overrides = json!({"image_tag": "v2"});
        assert_eq!(
            row.with_overrides(overrides.as_object().unwrap()),
            Err(BundleValidationError::UnknownField("image_tag".into()))
        );
    }

    #[test]
    fn flavor_serializes_as_a_tag() {
        let value = serde_json::to_value(bundle(FlavorKind::ZipArtifact)).unwrap();
        assert_eq!(value["flavor"], "zip_artifact");
        assert_eq!(value["artifact"]["framework"]["framework_type"], "custom_base_image");
    }
}
