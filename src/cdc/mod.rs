pub mod change_capture;

pub use change_capture::{ChangeCapture, ChangeCaptureError};
