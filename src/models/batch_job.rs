//! One-shot offline executions of a bundle.

use crate::models::bundle::Bundle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::{Map, Value};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchJobStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
    Undefined,
    Timeout,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub batch_job_status: BatchJobStatus,
    pub created_by: String,
    pub owner: String,
    /// Cleared when the bundle is deleted; the job itself survives.
    pub model_bundle_id: Option<String>,
    pub model_bundle: Option<Bundle>,
    pub model_endpoint_id: Option<String>,
    pub task_ids_location: Option<String>,
    pub result_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateBatchJob {
    pub created_by: String,
    pub owner: String,
    pub model_bundle_id: String,
    pub model_endpoint_id: Option<String>,
    pub task_ids_location: Option<String>,
    pub result_location: Option<String>,
}

impl CreateBatchJob {
    pub fn new(
        created_by: impl Into<String>,
        owner: impl Into<String>,
        model_bundle_id: impl Into<String>,
    ) -> Self {
        Self {
            created_by: created_by.into(),
            owner: owner.into(),
            model_bundle_id: model_bundle_id.into(),
            model_endpoint_id: None,
            task_ids_location: None,
            result_location: None,
        }
    }
}

/// A partial update. Absent keys leave the column untouched; an explicit
/// `null` clears a nullable column.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchJobUpdate {
    #[serde(default)]
    pub batch_job_status: Option<BatchJobStatus>,
    #[serde(default, deserialize_with = "present")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub model_endpoint_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub task_ids_location: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub result_location: Option<Option<String>>,
}

impl BatchJobUpdate {
    /// Build an update from caller-supplied fields. Callers name the status
    /// `status`; it is stored as `batch_job_status`.
    pub fn from_fields(mut fields: Map<String, Value>) -> Result<Self, serde_json::Error> {
        if let Some(status) = fields.remove("status") {
            if fields.contains_key("batch_job_status") {
                return Err(serde_json::Error::custom(
                    "`status` and `batch_job_status` are the same field",
                ));
            }
            fields.insert("batch_job_status".to_string(), status);
        }
        serde_json::from_value(Value::Object(fields))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct BatchJobRow {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[sqlx(rename = "status")]
    pub batch_job_status: BatchJobStatus,
    pub created_by: String,
    pub owner: String,
    pub model_bundle_id: Option<String>,
    pub model_endpoint_id: Option<String>,
    pub task_ids_location: Option<String>,
    pub result_location: Option<String>,
}

pub(crate) const BATCH_JOB_COLUMNS: &str = "id, created_at, completed_at, status, created_by, \
    owner, model_bundle_id, model_endpoint_id, task_ids_location, result_location";

impl BatchJobRow {
    pub(crate) fn into_batch_job(self, model_bundle: Option<Bundle>) -> BatchJob {
        BatchJob {
            id: self.id,
            created_at: self.created_at,
            completed_at: self.completed_at,
            batch_job_status: self.batch_job_status,
            created_by: self.created_by,
            owner: self.owner,
            model_bundle_id: self.model_bundle_id,
            model_bundle,
            model_endpoint_id: self.model_endpoint_id,
            task_ids_location: self.task_ids_location,
            result_location: self.result_location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn status_key_is_renamed() {
        let update = BatchJobUpdate::from_fields(fields(json!({"status": "COMPLETED"}))).unwrap();
        assert_eq!(
            update,
            BatchJobUpdate {
                batch_job_status: Some(BatchJobStatus::Completed),
                ..BatchJobUpdate::default()
            }
        );
    }

    #[test]
    fn null_clears_and_absence_keeps() {
        let update = BatchJobUpdate::from_fields(fields(json!({
            "result_location": null,
            "task_ids_location": "s3://bucket/tasks.json",
        })))
        .unwrap();
        assert_eq!(update.result_location, Some(None));
        assert_eq!(
            update.task_ids_location,
            Some(Some("s3://bucket/tasks.json".to_string()))
        );
        assert_eq!(update.completed_at, None);
    }

    #[test]
    fn unknown_and_ambiguous_keys_are_rejected() {
        assert!(BatchJobUpdate::from_fields(fields(json!({"owner": "team-b"}))).is_err());
        assert!(
            BatchJobUpdate::from_fields(fields(json!({
                "status": "RUNNING",
                "batch_job_status": "FAILURE",
            })))
            .is_err()
        );
        assert!(BatchJobUpdate::from_fields(fields(json!({"status": "DONE"}))).is_err());
    }
}
