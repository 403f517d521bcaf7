pub mod config;
pub mod diagnosis;
pub mod explain;
pub mod image;
pub mod models;
pub mod utils;

// 重新导出主要类型
pub use config::Config;
pub use diagnosis::{predict_robust, DiagnosticPipeline, DiagnosticReport};
pub use explain::{ExplanationRecord, GradCam};
pub use crate::image::{preprocess, CanonicalTensor, ImageSource, OriginalImage};
pub use models::DifferentiableClassifier;
pub use utils::error::ExplainError;

pub type Result<T> = std::result::Result<T, ExplainError>;
