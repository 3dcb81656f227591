pub mod capture;
pub mod dataset;
pub mod display;
pub mod errors;
pub mod gallery;
pub mod lock;
pub mod matcher;
mod persist;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod selector;

pub use errors::{AppError, AppResult};
pub use pipeline::{AuthDecision, DeletionOutcome, EnrollmentOutcome, Pipeline, PipelineConfig};
pub use selector::CancelToken;
