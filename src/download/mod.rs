pub mod service;

pub use service::{Download, DownloadService};
