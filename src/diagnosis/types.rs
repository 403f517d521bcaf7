use crate::config::{DecisionConfig, OutputSemantics};
use crate::models::ClassTarget;
use serde::Serialize;
use std::fmt;

/// 二分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    /// 需要解释的类别
    Hemorrhage,
    Normal,
}

impl Diagnosis {
    pub fn is_concerning(self) -> bool {
        matches!(self, Diagnosis::Hemorrhage)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Diagnosis::Hemorrhage => "hemorrhage",
            Diagnosis::Normal => "normal",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.8 {
            ConfidenceLevel::High
        } else if confidence >= 0.6 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// 由模型输出和阈值得到的判定
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    pub diagnosis: Diagnosis,
    /// 模型原始输出
    pub probability: f32,
    pub hemorrhage_probability: f32,
    pub normal_probability: f32,
    /// 预测类别的置信度：输出越过阈值时为 p，否则为 1 - p
    pub confidence: f32,
    pub level: ConfidenceLevel,
    /// 解释预测类别时的梯度目标
    #[serde(skip)]
    pub target: ClassTarget,
}

impl Decision {
    pub fn from_output(output: f32, config: &DecisionConfig) -> Self {
        let high = output >= config.decision_threshold;

        let (diagnosis, hemorrhage_probability) = match config.output_semantics {
            OutputSemantics::HemorrhageProbability => {
                (if high { Diagnosis::Hemorrhage } else { Diagnosis::Normal }, output)
            }
            OutputSemantics::NormalProbability => {
                (if high { Diagnosis::Normal } else { Diagnosis::Hemorrhage }, 1.0 - output)
            }
        };

        let confidence = if high { output } else { 1.0 - output };
        let target = if high { ClassTarget::Output } else { ClassTarget::Complement };

        Self {
            diagnosis,
            probability: output,
            hemorrhage_probability,
            normal_probability: 1.0 - hemorrhage_probability,
            confidence,
            level: ConfidenceLevel::from_confidence(confidence),
            target,
        }
    }
}

/// 各阶段耗时
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    /// 总耗时(毫秒)
    pub total_time_ms: u64,
    /// 加载与预处理耗时(毫秒)
    pub preprocess_time_ms: u64,
    /// 推理(含TTA)耗时(毫秒)
    pub prediction_time_ms: u64,
    /// Grad-CAM 耗时(毫秒)
    pub attribution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hemorrhage_semantics() {
        let config = DecisionConfig::default();
        let decision = Decision::from_output(0.9, &config);
        assert_eq!(decision.diagnosis, Diagnosis::Hemorrhage);
        assert_eq!(decision.target, ClassTarget::Output);
        assert_eq!(decision.level, ConfidenceLevel::High);
        assert!((decision.confidence - 0.9).abs() < 1e-6);

        let decision = Decision::from_output(0.3, &config);
        assert_eq!(decision.diagnosis, Diagnosis::Normal);
        assert_eq!(decision.target, ClassTarget::Complement);
        assert!((decision.confidence - 0.7).abs() < 1e-6);
        assert_eq!(decision.level, ConfidenceLevel::Medium);
    }

    #[test]
    fn normal_semantics_flips_the_class() {
        let config = DecisionConfig {
            decision_threshold: 0.5,
            output_semantics: OutputSemantics::NormalProbability,
        };
        let decision = Decision::from_output(0.2, &config);
        assert_eq!(decision.diagnosis, Diagnosis::Hemorrhage);
        assert_eq!(decision.target, ClassTarget::Complement);
        assert!((decision.hemorrhage_probability - 0.8).abs() < 1e-6);
    }

    #[test]
    fn threshold_is_inclusive() {
        let decision = Decision::from_output(0.5, &DecisionConfig::default());
        assert_eq!(decision.diagnosis, Diagnosis::Hemorrhage);
        assert_eq!(decision.level, ConfidenceLevel::Low);
    }
}
