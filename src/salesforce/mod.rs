pub mod controller;
pub mod outcome;

pub use controller::{SalesforceOutcome, SalesforceUploadController};
pub use outcome::{classify_failure, DuplicateResolution, ResolutionOutcome};
