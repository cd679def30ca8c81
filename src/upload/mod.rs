pub mod controller;

pub use controller::{ProcessingJob, UploadController, UploadPhase, UploadSnapshot};
