use crate::config::PreprocessConfig;
use crate::image::loader::ImageLoader;
use crate::image::transforms::ImageTransforms;
use crate::image::types::{CanonicalTensor, ImageSource, OriginalImage, RawImage, ValidationResult};
use crate::utils::error::ExplainError;
use crate::Result;
use ndarray::{s, Array3, ArrayView3, Axis};

/// CT图像预处理：加载 -> 校验 -> 强度归一化 -> 三通道 -> 缩放 -> [0,1] -> batch。
///
/// 所有阶段都是纯函数，训练和推理使用同一套流程。
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// 完整流水线，返回 (模型输入, 原图)
    pub fn preprocess(&self, source: &ImageSource) -> Result<(CanonicalTensor, OriginalImage)> {
        tracing::debug!("Preprocessing {}", source.describe());

        let image = ImageLoader::load(source)?;

        // 必须在任何缩放之前校验
        let validation = self.validate(&image);
        if !validation.valid {
            return Err(ExplainError::Validation(validation.message));
        }

        let tensor = self.to_canonical(&image);
        Ok((tensor, image))
    }

    /// 尺寸校验
    pub fn validate(&self, image: &RawImage) -> ValidationResult {
        if image.is_empty() {
            return ValidationResult::rejected("Image is empty.");
        }

        let (height, width) = (image.height(), image.width());
        let (min, max) = (self.config.min_dimension, self.config.max_dimension);

        if height < min || width < min {
            return ValidationResult::rejected(format!(
                "Image too small: {}x{}, minimum {}x{}",
                height, width, min, min
            ));
        }

        if height > max || width > max {
            return ValidationResult::rejected(format!(
                "Image too large: {}x{}, maximum {}x{}",
                height, width, max, max
            ));
        }

        ValidationResult::ok()
    }

    /// 校验后的图像 -> 模型输入（阶段3-7）
    pub fn to_canonical(&self, image: &RawImage) -> CanonicalTensor {
        let intensity = self.normalize_intensity(image);
        let rgb = to_three_channels(&intensity);
        let (target_h, target_w) = self.config.target_size;
        let resized = ImageTransforms::resize_area(&rgb, target_h, target_w);

        let scaled = resized.mapv(|v| v as f32 / 255.0);
        tracing::debug!(
            "Canonical tensor: {}x{} -> {}x{}x3",
            image.height(),
            image.width(),
            target_h,
            target_w
        );
        CanonicalTensor::new_unchecked(scaled.insert_axis(Axis(0)))
    }

    /// 强度归一化到8位：8位输入原样保留；否则按配置选择窗宽窗位或最小-最大拉伸
    pub fn normalize_intensity(&self, image: &RawImage) -> Array3<u8> {
        let pixels = image.pixels();
        if image.depth().is_8bit() {
            return pixels.mapv(|v| v.clamp(0.0, 255.0) as u8);
        }

        if self.config.apply_windowing {
            apply_window(pixels, self.config.window_center as f32, self.config.window_width as f32)
        } else {
            min_max_stretch(pixels)
        }
    }

    /// 原图的8位RGB展示版本（原始尺寸），用于叠加热力图
    pub fn display_rgb(&self, original: &OriginalImage) -> Array3<u8> {
        to_three_channels(&self.normalize_intensity(original))
    }
}

/// 窗宽窗位：裁剪到 [center - width/2, center + width/2] 后线性映射到 [0, 255]。
///
/// 下界及以下为0，上界及以上为255；区间内部截断取整后限制在 [1, 254]，
/// 因此0和255只出现在窗外。
pub fn apply_window(pixels: ArrayView3<'_, f32>, center: f32, width: f32) -> Array3<u8> {
    let lower = center - width / 2.0;
    let upper = center + width / 2.0;
    let span = upper - lower;

    pixels.mapv(|v| {
        if v <= lower {
            0
        } else if v >= upper {
            255
        } else {
            ((v - lower) / span * 255.0).clamp(1.0, 254.0) as u8
        }
    })
}

/// 最小-最大拉伸到 [0, 255]；常数图像返回全0
pub fn min_max_stretch(pixels: ArrayView3<'_, f32>) -> Array3<u8> {
    let min = pixels.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = pixels.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    if !(range > 0.0) {
        return Array3::zeros(pixels.dim());
    }

    pixels.mapv(|v| ((v - min) / range * 255.0).clamp(0.0, 255.0) as u8)
}

/// 通道统一为3：单通道复制，灰度+alpha 和 RGBA 去掉 alpha
pub fn to_three_channels(image: &Array3<u8>) -> Array3<u8> {
    let (height, width, channels) = image.dim();
    match channels {
        3 => image.clone(),
        1 | 2 => {
            let gray = image.slice(s![.., .., 0..1]);
            let mut rgb = Array3::<u8>::zeros((height, width, 3));
            for c in 0..3 {
                rgb.slice_mut(s![.., .., c..c + 1]).assign(&gray);
            }
            rgb
        }
        _ => image.slice(s![.., .., 0..3]).to_owned(),
    }
}
