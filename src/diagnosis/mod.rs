pub mod pipeline;
pub mod tta;
pub mod types;

pub use pipeline::{DiagnosticPipeline, DiagnosticReport, ExplanationStatus, ExplanationSummary, ReportSummary};
pub use tta::{predict_robust, Augmentation, AugmentationSampler, RobustPrediction, TtaPredictor};
pub use types::{ConfidenceLevel, Decision, Diagnosis, StageTimings};
