use crate::image::CanonicalTensor;
use crate::models::classifier::{ClassTarget, DifferentiableClassifier, LayerCapture, LayerInfo};
use crate::utils::error::ExplainError;
use crate::Result;
use ndarray::{Array1, Array4};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const INPUT_LAYER: &str = "input";
pub const CONV_LAYER: &str = "conv";
pub const POOL_LAYER: &str = "global_pool";
pub const DENSE_LAYER: &str = "dense";

/// GapNet 权重文件格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapNetWeights {
    /// 输入尺寸 (height, width)
    pub input_size: (usize, usize),
    pub kernel_size: usize,
    pub stride: usize,
    pub filters: usize,
    /// (kernel, kernel, 3, filters) 行优先展开
    pub conv_kernel: Vec<f32>,
    pub conv_bias: Vec<f32>,
    pub dense_weights: Vec<f32>,
    pub dense_bias: f32,
}

/// 最小可微分类器：步长卷积 -> ReLU -> 全局平均池化 -> 全连接 -> sigmoid。
///
/// 梯度解析求得，可作为参考实现，也用于没有ONNX模型时的演示和测试。
#[derive(Debug, Clone)]
pub struct GapNet {
    name: String,
    input_size: (usize, usize),
    stride: usize,
    kernel: Array4<f32>,
    conv_bias: Array1<f32>,
    dense_weights: Array1<f32>,
    dense_bias: f32,
}

impl GapNet {
    pub fn new(
        input_size: (usize, usize),
        stride: usize,
        kernel: Array4<f32>,
        conv_bias: Array1<f32>,
        dense_weights: Array1<f32>,
        dense_bias: f32,
    ) -> Result<Self> {
        let (kh, kw, in_channels, filters) = kernel.dim();
        if kh == 0 || kh != kw || in_channels != 3 || filters == 0 {
            return Err(ExplainError::Config(format!(
                "GapNet kernel must be (k, k, 3, filters), got {:?}",
                kernel.shape()
            )));
        }
        if stride == 0 || input_size.0 < kh || input_size.1 < kw {
            return Err(ExplainError::Config(format!(
                "GapNet stride {} / input {:?} incompatible with kernel {}",
                stride, input_size, kh
            )));
        }
        if conv_bias.len() != filters || dense_weights.len() != filters {
            return Err(ExplainError::Config(format!(
                "GapNet expects {} biases and dense weights, got {} and {}",
                filters,
                conv_bias.len(),
                dense_weights.len()
            )));
        }

        Ok(Self {
            name: "gapnet".to_string(),
            input_size,
            stride,
            kernel,
            conv_bias,
            dense_weights,
            dense_bias,
        })
    }

    /// 固定种子的随机初始化
    pub fn seeded(seed: u64, input_size: (usize, usize), kernel_size: usize, filters: usize) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let fan_in = (kernel_size * kernel_size * 3) as f32;
        let scale = 1.0 / fan_in.sqrt();

        let kernel = Array4::from_shape_fn((kernel_size, kernel_size, 3, filters), |_| {
            rng.gen_range(-1.0f32..1.0) * scale
        });
        let dense_weights = Array1::from_shape_fn(filters, |_| rng.gen_range(-1.0f32..1.0));

        Self::new(
            input_size,
            kernel_size,
            kernel,
            Array1::zeros(filters),
            dense_weights,
            0.0,
        )
        .map(|net| net.with_name(format!("gapnet-seed{}", seed)))
    }

    pub fn from_weights(weights: GapNetWeights) -> Result<Self> {
        let k = weights.kernel_size;
        let kernel = Array4::from_shape_vec((k, k, 3, weights.filters), weights.conv_kernel)
            .map_err(|e| ExplainError::Config(format!("invalid GapNet kernel: {}", e)))?;

        Self::new(
            weights.input_size,
            weights.stride,
            kernel,
            Array1::from(weights.conv_bias),
            Array1::from(weights.dense_weights),
            weights.dense_bias,
        )
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading GapNet weights from: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            ExplainError::Config(format!("Failed to read weights {}: {}", path.display(), e))
        })?;
        let weights: GapNetWeights = serde_json::from_str(&content)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("gapnet")
            .to_string();

        Ok(Self::from_weights(weights)?.with_name(name))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn filters(&self) -> usize {
        self.kernel.dim().3
    }

    /// 特征图尺寸 (height, width)
    pub fn feature_size(&self) -> (usize, usize) {
        let k = self.kernel.dim().0;
        (
            (self.input_size.0 - k) / self.stride + 1,
            (self.input_size.1 - k) / self.stride + 1,
        )
    }

    fn check_input(&self, input: &CanonicalTensor) -> Result<()> {
        if input.spatial_size() != self.input_size {
            return Err(ExplainError::ClassifierInvocation(format!(
                "{} expects input {:?}, got {:?}",
                self.name,
                self.input_size,
                input.spatial_size()
            )));
        }
        Ok(())
    }

    /// 卷积（未激活），输出 (1, fh, fw, filters)
    fn convolve(&self, input: &Array4<f32>) -> Array4<f32> {
        let (k, _, in_channels, filters) = self.kernel.dim();
        let (fh, fw) = self.feature_size();
        let mut out = Array4::<f32>::zeros((1, fh, fw, filters));

        for p in 0..fh {
            for q in 0..fw {
                for f in 0..filters {
                    let mut acc = self.conv_bias[f];
                    for di in 0..k {
                        for dj in 0..k {
                            let (i, j) = (p * self.stride + di, q * self.stride + dj);
                            for c in 0..in_channels {
                                acc += input[[0, i, j, c]] * self.kernel[[di, dj, c, f]];
                            }
                        }
                    }
                    out[[0, p, q, f]] = acc;
                }
            }
        }
        out
    }

    /// 全局平均池化 + 全连接 + sigmoid
    fn head(&self, activation: &Array4<f32>) -> f32 {
        let (_, fh, fw, filters) = activation.dim();
        let area = (fh * fw) as f32;
        let mut z = self.dense_bias;
        for f in 0..filters {
            let mut sum = 0.0f32;
            for p in 0..fh {
                for q in 0..fw {
                    sum += activation[[0, p, q, f]];
                }
            }
            z += self.dense_weights[f] * sum / area;
        }
        sigmoid(z)
    }

    /// d(output)/d(卷积激活)，与ReLU后的激活同形状
    fn conv_gradient(&self, output: f32, sign: f32) -> Array4<f32> {
        let (fh, fw) = self.feature_size();
        let filters = self.filters();
        let scale = sign * output * (1.0 - output) / (fh * fw) as f32;
        Array4::from_shape_fn((1, fh, fw, filters), |(_, _, _, f)| scale * self.dense_weights[f])
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

impl DifferentiableClassifier for GapNet {
    fn name(&self) -> &str {
        &self.name
    }

    fn layers(&self) -> Vec<LayerInfo> {
        let (h, w) = self.input_size;
        let (fh, fw) = self.feature_size();
        let filters = self.filters();
        vec![
            LayerInfo::new(INPUT_LAYER, vec![None, Some(h), Some(w), Some(3)]),
            LayerInfo::new(CONV_LAYER, vec![None, Some(fh), Some(fw), Some(filters)]),
            LayerInfo::new(POOL_LAYER, vec![None, Some(filters)]),
            LayerInfo::new(DENSE_LAYER, vec![None, Some(1)]),
        ]
    }

    fn forward(&self, input: &CanonicalTensor) -> Result<f32> {
        self.check_input(input)?;
        let activation = self.convolve(input.array()).mapv(|v| v.max(0.0));
        Ok(self.head(&activation))
    }

    fn forward_with_capture(&self, input: &CanonicalTensor, layer: &str) -> Result<LayerCapture> {
        self.check_input(input)?;
        let activation = self.convolve(input.array()).mapv(|v| v.max(0.0));
        let output = self.head(&activation);

        let captured = match layer {
            CONV_LAYER => activation,
            INPUT_LAYER => input.array().clone(),
            POOL_LAYER | DENSE_LAYER => {
                return Err(ExplainError::ClassifierInvocation(format!(
                    "layer '{}' of {} is not a spatial tensor",
                    layer, self.name
                )))
            }
            other => {
                return Err(ExplainError::ClassifierInvocation(format!(
                    "{} has no layer named '{}'",
                    self.name, other
                )))
            }
        };

        Ok(LayerCapture {
            layer: layer.to_string(),
            activation: captured,
            output,
        })
    }

    fn gradient(
        &self,
        input: &CanonicalTensor,
        capture: &LayerCapture,
        target: ClassTarget,
    ) -> Result<Option<Array4<f32>>> {
        let conv_grad = self.conv_gradient(capture.output, target.sign());

        match capture.layer.as_str() {
            CONV_LAYER => Ok(Some(conv_grad)),
            INPUT_LAYER => {
                self.check_input(input)?;
                // 经ReLU掩码后反传到输入
                let pre_activation = self.convolve(input.array());
                let (k, _, in_channels, filters) = self.kernel.dim();
                let (fh, fw) = self.feature_size();
                let (h, w) = self.input_size;
                let mut grad = Array4::<f32>::zeros((1, h, w, in_channels));

                for p in 0..fh {
                    for q in 0..fw {
                        for f in 0..filters {
                            if pre_activation[[0, p, q, f]] <= 0.0 {
                                continue;
                            }
                            let g = conv_grad[[0, p, q, f]];
                            for di in 0..k {
                                for dj in 0..k {
                                    let (i, j) = (p * self.stride + di, q * self.stride + dj);
                                    for c in 0..in_channels {
                                        grad[[0, i, j, c]] += g * self.kernel[[di, dj, c, f]];
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(Some(grad))
            }
            _ => Ok(None),
        }
    }
}
