pub mod engine;

pub use engine::{LatestRead, SaveOutcome, VersionEngine, VersionError};
