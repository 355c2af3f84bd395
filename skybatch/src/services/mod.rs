//! Service modules for batch image processing
//!
//! Discovery, pacing, retry, the transformation collaborator and the
//! orchestrator that ties them together.

pub mod file_scanner;
pub mod gemini_client;
pub mod orchestrator;
pub mod rate_limiter;
pub mod result_path;
pub mod retry;
pub mod session;
pub mod transformer;

pub use file_scanner::{FileScanner, ScanError, ScanResult};
pub use gemini_client::{GeminiTransformer, DEFAULT_MODEL};
pub use orchestrator::BatchOrchestrator;
pub use rate_limiter::{sleep_with_cancel, RateLimiter};
pub use result_path::{derive_run_output_dir, resolve_output_path, OutputDirPolicy};
pub use retry::{ErrorClass, ErrorClassifier, RetryController, RetryDecision, RetryPhase, RetryPolicy};
pub use session::BatchSession;
pub use transformer::{ImageTransformer, RequestParameters, TransformError};
