use crate::image::CanonicalTensor;
use crate::utils::error::ExplainError;
use crate::Result;
use ndarray::Array4;

/// 模型层描述：名称与输出形状（`None` 表示动态维度，如 batch）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub output_shape: Vec<Option<usize>>,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, output_shape: Vec<Option<usize>>) -> Self {
        Self {
            name: name.into(),
            output_shape,
        }
    }

    pub fn rank(&self) -> usize {
        self.output_shape.len()
    }

    /// (batch, height, width, channels) 特征图
    pub fn is_spatial(&self) -> bool {
        self.rank() == 4
    }
}

/// 一次前向中捕获的目标层激活与最终标量输出
#[derive(Debug, Clone)]
pub struct LayerCapture {
    pub layer: String,
    pub activation: Array4<f32>,
    pub output: f32,
}

/// 梯度目标：原始输出，或 `1 - output`（解释负方向的类别）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassTarget {
    Output,
    Complement,
}

impl ClassTarget {
    /// d(target)/d(output)
    pub fn sign(self) -> f32 {
        match self {
            ClassTarget::Output => 1.0,
            ClassTarget::Complement => -1.0,
        }
    }
}

/// 可前向、可捕获中间层、可反向求梯度的二分类模型。
///
/// 模型由外部加载并只读共享，核心流程从不修改其参数。
pub trait DifferentiableClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// 按输入 -> 输出顺序排列的层
    fn layers(&self) -> Vec<LayerInfo>;

    /// 单次前向，返回 sigmoid 标量
    fn forward(&self, input: &CanonicalTensor) -> Result<f32>;

    /// 前向并捕获指定层的输出
    fn forward_with_capture(&self, input: &CanonicalTensor, layer: &str) -> Result<LayerCapture>;

    /// 目标标量对捕获激活的梯度，形状与激活相同；图不连通等情况返回 `None`
    fn gradient(
        &self,
        input: &CanonicalTensor,
        capture: &LayerCapture,
        target: ClassTarget,
    ) -> Result<Option<Array4<f32>>>;
}

/// 从输出往输入方向找第一个 rank-4 输出层
pub fn find_last_spatial_layer(layers: &[LayerInfo]) -> Result<&LayerInfo> {
    layers
        .iter()
        .rev()
        .find(|layer| layer.is_spatial())
        .ok_or(ExplainError::NoConvolutionalLayer)
}

/// 检查模型输出是有效概率
pub fn ensure_probability(classifier: &str, value: f32) -> Result<f32> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ExplainError::ClassifierInvocation(format!(
            "classifier '{}' produced {} which is not a probability",
            classifier, value
        )))
    }
}
