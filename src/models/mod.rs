//! Record types of the model-serving control plane.
//!
//! Each entity is owned twice: by `created_by`, the acting principal, and by
//! `owner`, the isolation boundary. Storage-facing row types stay
//! crate-private; the public types are what callers and the wire see.

pub mod batch_job;
pub mod bundle;
pub mod docker_image_batch_job_bundle;
pub mod endpoint;
pub mod trigger;
