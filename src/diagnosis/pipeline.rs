use crate::config::Config;
use crate::diagnosis::tta::{RobustPrediction, TtaPredictor};
use crate::diagnosis::types::{ConfidenceLevel, Decision, Diagnosis, StageTimings};
use crate::explain::{ExplanationRecord, GradCam, RegionLabel};
use crate::image::{ImageSource, Preprocessor};
use crate::models::{ensure_probability, DifferentiableClassifier};
use crate::Result;
use serde::Serialize;
use std::time::Instant;

/// 解释阶段的结果
#[derive(Debug, Clone)]
pub enum ExplanationStatus {
    Explained(Box<ExplanationRecord>),
    /// 良性结果且未要求解释
    NotRequested,
    /// 归因失败，预测结果仍然有效
    Unavailable { code: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub classifier: String,
    pub decision: Decision,
    pub robust: Option<RobustPrediction>,
    pub explanation: ExplanationStatus,
    pub timings: StageTimings,
    /// 原图尺寸 (height, width)
    pub original_size: (usize, usize),
}

impl DiagnosticReport {
    pub fn explanation_record(&self) -> Option<&ExplanationRecord> {
        match &self.explanation {
            ExplanationStatus::Explained(record) => Some(record.as_ref()),
            _ => None,
        }
    }

    pub fn summary(&self) -> ReportSummary {
        let explanation = match &self.explanation {
            ExplanationStatus::Explained(record) => ExplanationSummary::Explained {
                region: record.region(),
                target_layer: record.target_layer().to_string(),
                text: record.text().to_string(),
            },
            ExplanationStatus::NotRequested => ExplanationSummary::NotRequested,
            ExplanationStatus::Unavailable { code, reason } => ExplanationSummary::Unavailable {
                code: code.to_string(),
                reason: reason.clone(),
            },
        };

        ReportSummary {
            classifier: self.classifier.clone(),
            diagnosis: self.decision.diagnosis,
            probability: self.decision.probability,
            hemorrhage_probability: self.decision.hemorrhage_probability,
            normal_probability: self.decision.normal_probability,
            confidence: self.decision.confidence,
            confidence_level: self.decision.level,
            original_size: self.original_size,
            tta: self.robust.clone(),
            explanation,
            timings: self.timings.clone(),
        }
    }
}

/// 报告的可序列化摘要（不含图像数组）
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub classifier: String,
    pub diagnosis: Diagnosis,
    pub probability: f32,
    pub hemorrhage_probability: f32,
    pub normal_probability: f32,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub original_size: (usize, usize),
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tta: Option<RobustPrediction>,
    pub explanation: ExplanationSummary,
    pub timings: StageTimings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExplanationSummary {
    Explained {
        region: RegionLabel,
        target_layer: String,
        text: String,
    },
    NotRequested,
    Unavailable {
        code: String,
        reason: String,
    },
}

/// 预处理 -> 预测(TTA或单次) -> 按需Grad-CAM
pub struct DiagnosticPipeline {
    config: Config,
    preprocessor: Preprocessor,
    tta: TtaPredictor,
    gradcam: GradCam,
}

impl DiagnosticPipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            preprocessor: Preprocessor::new(config.preprocess.clone()),
            tta: TtaPredictor::new(&config),
            gradcam: GradCam::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(
        &self,
        classifier: &dyn DifferentiableClassifier,
        source: &ImageSource,
    ) -> Result<DiagnosticReport> {
        let start_time = Instant::now();

        let (tensor, original) = self.preprocessor.preprocess(source)?;
        let preprocess_time = start_time.elapsed();

        let prediction_start = Instant::now();
        let use_tta = self.config.tta.enabled && self.tta.count() > 1;
        let (output, robust) = if use_tta {
            let robust = self.tta.predict_detailed(classifier, &original)?;
            (robust.mean, Some(robust))
        } else {
            let output = ensure_probability(classifier.name(), classifier.forward(&tensor)?)?;
            (output, None)
        };
        let prediction_time = prediction_start.elapsed();

        let decision = Decision::from_output(output, &self.config.decision);
        tracing::info!(
            "Prediction: {} (p={:.4}, confidence {:.1}%, {:?})",
            decision.diagnosis,
            decision.probability,
            decision.confidence * 100.0,
            decision.level
        );

        let attribution_start = Instant::now();
        let explanation = if decision.diagnosis.is_concerning() || self.config.attribution.explain_benign {
            match self
                .gradcam
                .explain(classifier, &tensor, &original, None, Some(decision))
            {
                Ok(record) => ExplanationStatus::Explained(Box::new(record)),
                Err(e) if e.is_explanation_error() => {
                    tracing::warn!("Explanation unavailable: {}", e);
                    ExplanationStatus::Unavailable {
                        code: e.error_code(),
                        reason: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            }
        } else {
            tracing::debug!("Benign result, skipping attribution");
            ExplanationStatus::NotRequested
        };
        let attribution_time = attribution_start.elapsed();

        let timings = StageTimings {
            total_time_ms: start_time.elapsed().as_millis() as u64,
            preprocess_time_ms: preprocess_time.as_millis() as u64,
            prediction_time_ms: prediction_time.as_millis() as u64,
            attribution_time_ms: attribution_time.as_millis() as u64,
        };

        tracing::info!(
            "Diagnosis completed in {}ms (preprocess: {}ms, prediction: {}ms, attribution: {}ms)",
            timings.total_time_ms,
            timings.preprocess_time_ms,
            timings.prediction_time_ms,
            timings.attribution_time_ms
        );

        Ok(DiagnosticReport {
            classifier: classifier.name().to_string(),
            decision,
            robust,
            explanation,
            timings,
            original_size: (original.height(), original.width()),
        })
    }
}
