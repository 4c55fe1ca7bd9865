//! Terminal output: live progress and the final result report

pub mod progress;
pub mod reporter;

pub use progress::ProgressTracker;
pub use reporter::Reporter;
