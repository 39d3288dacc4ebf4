//! Cron-scheduled bindings that spawn batch jobs from a
//! [`DockerImageBatchJobBundle`](super::docker_image_batch_job_bundle::DockerImageBatchJobBundle).
//!
//! Schedules are only checked for shape here; the executor that fires
//! them interprets the expression.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;
use thiserror::Error;

const CRON_MACROS: [&str; 7] = [
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("cron schedule is empty")]
    Empty,
    #[error("unknown cron macro `{0}`")]
    UnknownMacro(String),
    #[error("cron schedule `{schedule}` has {found} fields, expected 5")]
    FieldCount { schedule: String, found: usize },
    #[error("cron field `{0}` contains unsupported characters")]
    InvalidField(String),
}

/// Accept five whitespace-separated fields (minute, hour, day of month,
/// month, day of week) or one of the `@` macros.
pub fn validate_cron_schedule(schedule: &str) -> Result<(), CronError> {
    let schedule = schedule.trim();
    if schedule.is_empty() {
        return Err(CronError::Empty);
    }
    if schedule.starts_with('@') {
        return if CRON_MACROS.contains(&schedule) {
            Ok(())
        } else {
            Err(CronError::UnknownMacro(schedule.to_string()))
        };
    }

    let fields = schedule.split_whitespace().collect::<Vec<_>>();
    if fields.len() != 5 {
        return Err(CronError::FieldCount {
            schedule: schedule.to_string(),
            found: fields.len(),
        });
    }
    for field in fields {
        let valid = field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/' | '?'));
        if !valid {
            return Err(CronError::InvalidField(field.to_string()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub cron_schedule: String,
    pub docker_image_batch_job_bundle_id: String,
    pub default_job_config: Option<Map<String, Value>>,
    pub default_job_metadata: Option<BTreeMap<String, String>>,
}

impl Trigger {
    /// Job config for a spawned job: the trigger defaults with `explicit`
    /// laid over them key by key.
    pub fn job_config_with(&self, explicit: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = self.default_job_config.clone().unwrap_or_default();
        merged.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub fn job_metadata_with(
        &self,
        explicit: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut merged = self.default_job_metadata.clone().unwrap_or_default();
        merged.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTrigger {
    pub name: String,
    pub owner: String,
    pub created_by: String,
    pub cron_schedule: String,
    pub docker_image_batch_job_bundle_id: String,
    pub default_job_config: Option<Map<String, Value>>,
    pub default_job_metadata: Option<BTreeMap<String, String>>,
}

impl CreateTrigger {
    pub fn new(
        name: impl Into<String>,
        created_by: impl Into<String>,
        owner: impl Into<String>,
        cron_schedule: impl Into<String>,
        docker_image_batch_job_bundle_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            created_by: created_by.into(),
            cron_schedule: cron_schedule.into(),
            docker_image_batch_job_bundle_id: docker_image_batch_job_bundle_id.into(),
            default_job_config: None,
            default_job_metadata: None,
        }
    }
}

/// `None` leaves a field untouched; `Some(None)` clears a default.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriggerUpdate {
    pub cron_schedule: Option<String>,
    pub default_job_config: Option<Option<Map<String, Value>>>,
    pub default_job_metadata: Option<Option<BTreeMap<String, String>>>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TriggerRow {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub cron_schedule: String,
    pub docker_image_batch_job_bundle_id: String,
    pub default_job_config: Option<Json<Map<String, Value>>>,
    pub default_job_metadata: Option<Json<BTreeMap<String, String>>>,
}

pub(crate) const TRIGGER_COLUMNS: &str = "id, name, owner, created_by, created_at, \
    cron_schedule, docker_image_batch_job_bundle_id, default_job_config, default_job_metadata";

impl From<TriggerRow> for Trigger {
    fn from(row: TriggerRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            owner: row.owner,
            created_by: row.created_by,
            created_at: row.created_at,
            cron_schedule: row.cron_schedule,
            docker_image_batch_job_bundle_id: row.docker_image_batch_job_bundle_id,
            default_job_config: row.default_job_config.map(|json| json.0),
            default_job_metadata: row.default_job_metadata.map(|json| json.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cron_shapes() {
        assert!(validate_cron_schedule("*/15 0 1,15 * MON-FRI").is_ok());
        assert!(validate_cron_schedule("@daily").is_ok());
        assert_eq!(validate_cron_schedule("  "), Err(CronError::Empty));
        assert_eq!(
            validate_cron_schedule("@fortnightly"),
            Err(CronError::UnknownMacro("@fortnightly".into()))
        );
        assert!(matches!(
            validate_cron_schedule("0 0 * *"),
            Err(CronError::FieldCount { found: 4, .. })
        ));
        assert_eq!(
            validate_cron_schedule("0 0 * * $(rm)"),
            Err(CronError::InvalidField("$(rm)".into()))
        );
    }

    #[test]
    fn explicit_job_values_win_over_defaults() {
        let trigger = Trigger {
            id: "trig_1".into(),
            name: "nightly".into(),
            owner: "team-a".into(),
            created_by: "alice".into(),
            created_at: Utc::now(),
            cron_schedule: "@daily".into(),
            docker_image_batch_job_bundle_id: "batbun_1".into(),
            default_job_config: json!({"epochs": 1, "lr": 0.1}).as_object().cloned(),
            default_job_metadata: Some(BTreeMap::from([("team".into(), "ml".into())])),
        };

        let config = trigger.job_config_with(json!({"epochs": 3}).as_object().unwrap());
        assert_eq!(Value::Object(config), json!({"epochs": 3, "lr": 0.1}));

        let metadata =
            trigger.job_metadata_with(&BTreeMap::from([("run".into(), "42".into())]));
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["team"], "ml");
    }
}
