use crate::config::{AttributionConfig, Config, DecisionConfig};
use crate::diagnosis::types::{ConfidenceLevel, Decision, Diagnosis};
use crate::explain::narrative;
use crate::explain::region::{localize, RegionLabel};
use crate::image::{CanonicalTensor, HeatmapRenderer, OriginalImage, Preprocessor};
use crate::models::{ensure_probability, find_last_spatial_layer, DifferentiableClassifier};
use crate::utils::error::ExplainError;
use crate::Result;
use ndarray::{Array1, Array2, Array3, Array4, Axis};

/// 一次归因的完整结果，构造后只读
#[derive(Debug, Clone)]
pub struct ExplanationRecord {
    decision: Decision,
    region: RegionLabel,
    heatmap: Array2<f32>,
    color_heatmap: Array3<u8>,
    overlay: Array3<u8>,
    text: String,
    target_layer: String,
}

impl ExplanationRecord {
    pub fn predicted_class(&self) -> Diagnosis {
        self.decision.diagnosis
    }

    pub fn probability(&self) -> f32 {
        self.decision.probability
    }

    pub fn confidence(&self) -> f32 {
        self.decision.confidence
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        self.decision.level
    }

    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    pub fn region(&self) -> RegionLabel {
        self.region
    }

    /// 特征图分辨率的热力图，取值 [0, 1]
    pub fn heatmap(&self) -> &Array2<f32> {
        &self.heatmap
    }

    /// 原图尺寸的JET着色热力图
    pub fn color_heatmap(&self) -> &Array3<u8> {
        &self.color_heatmap
    }

    pub fn overlay(&self) -> &Array3<u8> {
        &self.overlay
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn target_layer(&self) -> &str {
        &self.target_layer
    }
}

/// Grad-CAM 归因引擎
#[derive(Debug, Clone)]
pub struct GradCam {
    attribution: AttributionConfig,
    decision: DecisionConfig,
    preprocessor: Preprocessor,
}

impl GradCam {
    pub fn new(config: &Config) -> Self {
        Self {
            attribution: config.attribution.clone(),
            decision: config.decision.clone(),
            preprocessor: Preprocessor::new(config.preprocess.clone()),
        }
    }

    /// 确定目标层：显式指定的层必须存在且为 rank 4，否则自动选择最后一个空间层
    pub fn resolve_layer(
        &self,
        classifier: &dyn DifferentiableClassifier,
        target_layer: Option<&str>,
    ) -> Result<String> {
        let layers = classifier.layers();
        let requested = target_layer.or(self.attribution.target_layer.as_deref());

        match requested {
            Some(name) => match layers.iter().find(|layer| layer.name == name) {
                Some(layer) if layer.is_spatial() => Ok(layer.name.clone()),
                Some(layer) => Err(ExplainError::InvalidTargetLayer {
                    layer: name.to_string(),
                    reason: format!("output rank is {}, expected 4", layer.rank()),
                }),
                None => Err(ExplainError::InvalidTargetLayer {
                    layer: name.to_string(),
                    reason: format!("not found in classifier '{}'", classifier.name()),
                }),
            },
            None => {
                let layer = find_last_spatial_layer(&layers)?;
                tracing::debug!("Selected target layer '{}' ({:?})", layer.name, layer.output_shape);
                Ok(layer.name.clone())
            }
        }
    }

    /// 根据模型自身输出判定类别并解释
    pub fn attribute(
        &self,
        classifier: &dyn DifferentiableClassifier,
        tensor: &CanonicalTensor,
        original: &OriginalImage,
        target_layer: Option<&str>,
    ) -> Result<ExplanationRecord> {
        self.explain(classifier, tensor, original, target_layer, None)
    }

    /// 解释给定判定（如TTA平均后的结果）；`decision` 为空时使用本次前向的输出
    pub fn explain(
        &self,
        classifier: &dyn DifferentiableClassifier,
        tensor: &CanonicalTensor,
        original: &OriginalImage,
        target_layer: Option<&str>,
        decision: Option<Decision>,
    ) -> Result<ExplanationRecord> {
        let layer = self.resolve_layer(classifier, target_layer)?;

        let capture = classifier.forward_with_capture(tensor, &layer)?;
        let output = ensure_probability(classifier.name(), capture.output)?;
        if capture.activation.dim().0 != 1 {
            return Err(ExplainError::ClassifierInvocation(format!(
                "activation of layer '{}' must have batch size 1, got shape {:?}",
                layer,
                capture.activation.shape()
            )));
        }
        if capture.activation.iter().any(|a| !a.is_finite()) {
            return Err(ExplainError::ClassifierInvocation(format!(
                "activation of layer '{}' contains non-finite values",
                layer
            )));
        }
        let decision = decision.unwrap_or_else(|| Decision::from_output(output, &self.decision));

        let gradient = classifier
            .gradient(tensor, &capture, decision.target)?
            .ok_or_else(|| ExplainError::GradientUnavailable {
                layer: layer.clone(),
                reason: "classifier returned no gradient".to_string(),
            })?;

        if gradient.dim() != capture.activation.dim() {
            return Err(ExplainError::ClassifierInvocation(format!(
                "gradient shape {:?} does not match activation shape {:?}",
                gradient.shape(),
                capture.activation.shape()
            )));
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(ExplainError::GradientUnavailable {
                layer,
                reason: "gradient contains non-finite values".to_string(),
            });
        }

        let heatmap = compute_heatmap(&capture.activation, &gradient);

        let display = self.preprocessor.display_rgb(original);
        let (height, width, _) = display.dim();
        let intensity = HeatmapRenderer::upsample_to_u8(heatmap.view(), height, width);
        let color_heatmap = HeatmapRenderer::colorize(&intensity);
        let overlay = HeatmapRenderer::blend(&display, &color_heatmap, self.attribution.blend_alpha);

        let region = localize(heatmap.view(), self.attribution.activation_threshold_fraction);
        let text = narrative::compose(&decision, region);

        tracing::info!(
            "Grad-CAM on '{}': {} ({:.1}%), region: {}",
            layer,
            decision.diagnosis,
            decision.confidence * 100.0,
            region
        );

        Ok(ExplanationRecord {
            decision,
            region,
            heatmap,
            color_heatmap,
            overlay,
            text,
            target_layer: layer,
        })
    }
}

/// 梯度在空间维上取平均，得到每个通道的权重
pub fn channel_weights(gradient: &Array4<f32>) -> Array1<f32> {
    let (_, height, width, channels) = gradient.dim();
    if height * width == 0 {
        return Array1::zeros(channels);
    }
    gradient
        .index_axis(Axis(0), 0)
        .sum_axis(Axis(0))
        .sum_axis(Axis(0))
        .mapv(|v| v / (height * width) as f32)
}

/// 加权求和 -> ReLU -> 除以最大值（最大值非正时保持全0）
pub fn compute_heatmap(activation: &Array4<f32>, gradient: &Array4<f32>) -> Array2<f32> {
    let weights = channel_weights(gradient);
    let features = activation.index_axis(Axis(0), 0);
    let (height, width, channels) = features.dim();

    let mut heatmap = Array2::<f32>::zeros((height, width));
    for c in 0..channels {
        let weight = weights[c];
        heatmap.scaled_add(weight, &features.index_axis(Axis(2), c));
    }

    heatmap.mapv_inplace(|v| v.max(0.0));
    let max = heatmap.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        heatmap.mapv_inplace(|v| v / max);
    }
    heatmap
}
