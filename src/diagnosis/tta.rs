use crate::config::{Config, TtaConfig};
use crate::image::{ImageSource, ImageTransforms, Preprocessor, RawImage};
use crate::models::{ensure_probability, DifferentiableClassifier};
use crate::utils::error::ExplainError;
use crate::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

/// 单个增强变体的描述
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Augmentation {
    pub flip: bool,
    /// 逆时针角度，0 表示不旋转
    pub rotation_degrees: f32,
}

impl Augmentation {
    pub fn identity() -> Self {
        Self {
            flip: false,
            rotation_degrees: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        !self.flip && self.rotation_degrees == 0.0
    }

    /// 在缩放之前作用于加载后的原图；整数类型的像素旋转后取整
    pub fn apply(&self, image: &RawImage) -> RawImage {
        let mut pixels = if self.flip {
            ImageTransforms::flip_horizontal(image.pixels())
        } else {
            image.pixels().to_owned()
        };

        if self.rotation_degrees != 0.0 {
            pixels = ImageTransforms::rotate(pixels.view(), self.rotation_degrees);
            if image.depth().is_integral() {
                pixels.mapv_inplace(f32::round);
            }
        }

        image.with_pixels(pixels)
    }
}

/// 可设种子的增强采样器，相同种子产生相同序列
#[derive(Debug, Clone)]
pub struct AugmentationSampler {
    rng: ChaCha8Rng,
    flip_probability: f64,
    rotation_probability: f64,
    max_rotation_degrees: f32,
}

impl AugmentationSampler {
    pub fn new(config: &TtaConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            rng,
            flip_probability: config.flip_probability.clamp(0.0, 1.0),
            rotation_probability: config.rotation_probability.clamp(0.0, 1.0),
            max_rotation_degrees: config.max_rotation_degrees.abs(),
        }
    }

    pub fn next_augmentation(&mut self) -> Augmentation {
        let flip = self.rng.gen_bool(self.flip_probability);
        let rotate = self.rng.gen_bool(self.rotation_probability);
        let rotation_degrees = if rotate {
            let max = self.max_rotation_degrees;
            self.rng.gen_range(-max..=max)
        } else {
            0.0
        };
        Augmentation {
            flip,
            rotation_degrees,
        }
    }
}

impl Iterator for AugmentationSampler {
    type Item = Augmentation;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_augmentation())
    }
}

/// TTA结果：首个预测对应未增强的原图
#[derive(Debug, Clone, Serialize)]
pub struct RobustPrediction {
    pub mean: f32,
    pub predictions: Vec<f32>,
    pub augmentations: Vec<Augmentation>,
}

impl RobustPrediction {
    pub fn min(&self) -> f32 {
        self.predictions.iter().cloned().fold(f32::INFINITY, f32::min)
    }

    pub fn max(&self) -> f32 {
        self.predictions.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
    }
}

/// 测试时增强预测器。
///
/// 按顺序执行 k 次前向：原图一次，再加 k-1 个随机变体；任一变体失败则整体失败，
/// 不返回部分平均值。
#[derive(Debug, Clone)]
pub struct TtaPredictor {
    config: TtaConfig,
    preprocessor: Preprocessor,
}

impl TtaPredictor {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.tta.clone(),
            preprocessor: Preprocessor::new(config.preprocess.clone()),
        }
    }

    pub fn count(&self) -> usize {
        self.config.count.max(1)
    }

    /// 对已加载并通过校验的原图执行TTA
    pub fn predict_detailed(
        &self,
        classifier: &dyn DifferentiableClassifier,
        original: &RawImage,
    ) -> Result<RobustPrediction> {
        self.config.validate()?;
        let count = self.count();
        let mut sampler = AugmentationSampler::new(&self.config);

        let mut augmentations = Vec::with_capacity(count);
        augmentations.push(Augmentation::identity());
        augmentations.extend(sampler.by_ref().take(count - 1));

        let mut predictions = Vec::with_capacity(count);
        for (i, augmentation) in augmentations.iter().enumerate() {
            let tensor = if augmentation.is_identity() {
                self.preprocessor.to_canonical(original)
            } else {
                self.preprocessor.to_canonical(&augmentation.apply(original))
            };

            let output = classifier.forward(&tensor).and_then(|p| ensure_probability(classifier.name(), p));
            let prediction = output.map_err(|e| match e {
                ExplainError::ClassifierInvocation(msg) => {
                    ExplainError::ClassifierInvocation(format!("TTA variant {} failed: {}", i, msg))
                }
                other => other,
            })?;

            tracing::debug!(
                "TTA variant {}: flip={}, rotation={:.2}, p={:.4}",
                i,
                augmentation.flip,
                augmentation.rotation_degrees,
                prediction
            );
            predictions.push(prediction);
        }

        let mean = mean_within_bounds(&predictions);
        tracing::info!("TTA mean over {} predictions: {:.4}", predictions.len(), mean);

        Ok(RobustPrediction {
            mean,
            predictions,
            augmentations,
        })
    }

    /// 从来源开始：加载、校验后执行TTA
    pub fn predict_source(
        &self,
        classifier: &dyn DifferentiableClassifier,
        source: &ImageSource,
    ) -> Result<RobustPrediction> {
        let (_, original) = self.preprocessor.preprocess(source)?;
        self.predict_detailed(classifier, &original)
    }
}

/// 增强后的平均预测，取值在各次预测的 [min, max] 之间
pub fn predict_robust(
    classifier: &dyn DifferentiableClassifier,
    source: &ImageSource,
    config: &Config,
) -> Result<f32> {
    TtaPredictor::new(config)
        .predict_source(classifier, source)
        .map(|robust| robust.mean)
}

fn mean_within_bounds(predictions: &[f32]) -> f32 {
    let sum: f64 = predictions.iter().map(|p| *p as f64).sum();
    let mean = (sum / predictions.len() as f64) as f32;
    let min = predictions.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = predictions.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    mean.clamp(min, max)
}
