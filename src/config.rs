use crate::utils::error::ExplainError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 预处理配置
    pub preprocess: PreprocessConfig,

    /// 判定阈值与输出语义
    pub decision: DecisionConfig,

    /// Grad-CAM配置
    pub attribution: AttributionConfig,

    /// 测试时增强配置
    pub tta: TtaConfig,

    /// ONNX Runtime配置
    pub onnx: OnnxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// 模型输入尺寸 (height, width)
    pub target_size: (usize, usize),

    /// 非8位图像是否使用窗宽窗位
    pub apply_windowing: bool,

    /// 窗位 (HU)
    pub window_center: i32,

    /// 窗宽 (HU)
    pub window_width: i32,

    /// 最小边长
    pub min_dimension: usize,

    /// 最大边长
    pub max_dimension: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_size: (224, 224),
            apply_windowing: true,
            window_center: 40, // 脑窗
            window_width: 80,
            min_dimension: 64,
            max_dimension: 4096,
        }
    }
}

/// 模型标量输出的含义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSemantics {
    /// 输出越接近1越倾向出血
    HemorrhageProbability,
    /// 输出越接近1越倾向正常（hemorrhage=0, normal=1 的类别索引）
    NormalProbability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub decision_threshold: f32,
    pub output_semantics: OutputSemantics,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 0.5,
            output_semantics: OutputSemantics::HemorrhageProbability,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// 热力图混合比例（原图占 1 - alpha）
    pub blend_alpha: f32,

    /// 区域定位使用的峰值比例
    pub activation_threshold_fraction: f32,

    /// 对良性结果也生成解释
    pub explain_benign: bool,

    /// 指定目标层；为空时自动选择最后一个空间特征层
    pub target_layer: Option<String>,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            blend_alpha: 0.4,
            activation_threshold_fraction: 0.7,
            explain_benign: false,
            target_layer: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtaConfig {
    pub enabled: bool,

    /// 预测总次数（含原图）
    pub count: usize,

    /// 增强采样种子；为空时使用系统熵
    pub seed: Option<u64>,

    pub max_rotation_degrees: f32,
    pub flip_probability: f64,
    pub rotation_probability: f64,
}

impl Default for TtaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 5,
            seed: None,
            max_rotation_degrees: 5.0,
            flip_probability: 0.5,
            rotation_probability: 0.5,
        }
    }
}

impl TtaConfig {
    /// 采样前的检查，NaN 概率和非有限角度都会被拒绝
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(ExplainError::Config("tta count must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.flip_probability)
            || !(0.0..=1.0).contains(&self.rotation_probability)
        {
            return Err(ExplainError::Config(format!(
                "tta probabilities must lie in [0, 1], got flip={} rotation={}",
                self.flip_probability, self.rotation_probability
            )));
        }
        if !self.max_rotation_degrees.is_finite() || self.max_rotation_degrees < 0.0 {
            return Err(ExplainError::Config(format!(
                "max_rotation_degrees must be a non-negative number, got {}",
                self.max_rotation_degrees
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxConfig {
    /// 模型文件路径
    pub model_path: Option<PathBuf>,

    /// 输入张量名称 (NHWC)
    pub input_name: String,

    /// 概率输出名称
    pub output_name: String,

    /// 作为图输出暴露的特征图名称
    pub feature_output: String,

    /// 导出的梯度输出名称 d(output)/d(feature)
    pub gradient_output: Option<String>,

    /// CPU线程数，0 表示自动
    pub intra_threads: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_name: "input".to_string(),
            output_name: "output".to_string(),
            feature_output: "conv_features".to_string(),
            gradient_output: None,
            intra_threads: 0,
        }
    }
}

impl Config {
    /// 从JSON文件加载配置，缺失字段使用默认值
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExplainError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.preprocess;
        if p.target_size.0 == 0 || p.target_size.1 == 0 {
            return Err(ExplainError::Config(format!(
                "target_size must be non-zero, got {:?}",
                p.target_size
            )));
        }
        if p.window_width <= 0 {
            return Err(ExplainError::Config(format!(
                "window_width must be positive, got {}",
                p.window_width
            )));
        }
        if p.min_dimension == 0 || p.min_dimension > p.max_dimension {
            return Err(ExplainError::Config(format!(
                "invalid dimension bounds [{}, {}]",
                p.min_dimension, p.max_dimension
            )));
        }

        let threshold = self.decision.decision_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(ExplainError::Config(format!(
                "decision_threshold must lie in (0, 1), got {}",
                threshold
            )));
        }

        let a = &self.attribution;
        if !(0.0..=1.0).contains(&a.blend_alpha) {
            return Err(ExplainError::Config(format!(
                "blend_alpha must lie in [0, 1], got {}",
                a.blend_alpha
            )));
        }
        if !(a.activation_threshold_fraction > 0.0 && a.activation_threshold_fraction <= 1.0) {
            return Err(ExplainError::Config(format!(
                "activation_threshold_fraction must lie in (0, 1], got {}",
                a.activation_threshold_fraction
            )));
        }

        self.tta.validate()
    }

    /// ONNX 推理线程数，未设置时使用75%的CPU核心
    #[cfg(feature = "onnx")]
    pub fn onnx_intra_threads(&self) -> usize {
        if self.onnx.intra_threads > 0 {
            self.onnx.intra_threads
        } else {
            (num_cpus::get() * 3 / 4).max(1)
        }
    }
}
