pub mod service;

pub use service::{IngestError, IngestionService};
