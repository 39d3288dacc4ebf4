//! Prefixed, time-sortable record identifiers.
//!
//! Every record id has the shape `{prefix}_{token}` where `token` is the
//! lowercase hex rendering of a UUIDv7. UUIDv7 carries a millisecond
//! timestamp in its leading bits, so ids generated later sort after ids
//! generated earlier.

use uuid::Uuid;

/// The kinds of records that receive generated ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Bundle,
    Endpoint,
    BatchJob,
    DockerImageBatchJobBundle,
    Trigger,
}

impl RecordKind {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Bundle => "bun",
            Self::Endpoint => "end",
            Self::BatchJob => "bat",
            Self::DockerImageBatchJobBundle => "batbun",
            Self::Trigger => "trig",
        }
    }

    /// Generate a fresh id for this record kind.
    pub fn new_id(self) -> String {
        format!("{}_{}", self.prefix(), Uuid::now_v7().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(RecordKind::Bundle.new_id().starts_with("bun_"));
        assert!(RecordKind::Endpoint.new_id().starts_with("end_"));
        assert!(RecordKind::BatchJob.new_id().starts_with("bat_"));
        assert!(
            RecordKind::DockerImageBatchJobBundle
                .new_id()
                .starts_with("batbun_")
        );
        assert!(RecordKind::Trigger.new_id().starts_with("trig_"));
    }

    #[test]
    fn ids_are_unique_and_sort_by_creation() {
        let first = RecordKind::Bundle.new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = RecordKind::Bundle.new_id();
        assert_ne!(first, second);
        assert!(first < second);
    }
}
