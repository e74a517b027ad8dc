pub mod keys;
pub mod lifecycle;
pub mod object_store;

pub use object_store::{default_lifecycle_rules, LifecycleRule, ObjectMetadata, ObjectStore, S3ObjectStore, StoreError};
