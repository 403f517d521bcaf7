use crate::utils::error::ExplainError;
use crate::Result;
use ndarray::{Array3, Array4, ArrayView3};
use std::path::PathBuf;

/// 图像来源
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// 文件路径（`.dcm` 后缀走DICOM解码器）
    Path(PathBuf),
    /// 内存字节，`name` 用于后缀判断，`dicom` 为显式标记
    Bytes {
        data: Vec<u8>,
        name: Option<String>,
        dicom: bool,
    },
    /// base64字符串，可带 data URL 前缀
    Base64(String),
}

impl ImageSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        ImageSource::Bytes {
            data: data.into(),
            name: None,
            dicom: false,
        }
    }

    pub fn dicom_bytes(data: impl Into<Vec<u8>>) -> Self {
        ImageSource::Bytes {
            data: data.into(),
            name: None,
            dicom: true,
        }
    }

    /// 日志用的简短描述
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Bytes { data, name, .. } => match name {
                Some(name) => format!("{} ({} bytes)", name, data.len()),
                None => format!("<buffer {} bytes>", data.len()),
            },
            ImageSource::Base64(data) => format!("<base64 {} chars>", data.len()),
        }
    }
}

/// 解码后的原始样本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDepth {
    Uint8,
    Uint16,
    Int16,
    Int32,
    Float32,
}

impl PixelDepth {
    pub fn is_8bit(self) -> bool {
        matches!(self, PixelDepth::Uint8)
    }

    /// 样本是否为整数（几何变换后需要取整）
    pub fn is_integral(self) -> bool {
        !matches!(self, PixelDepth::Float32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Dicom,
    Raster,
}

/// 加载后的像素网格 (H, W, C)，C ∈ {1, 2, 3, 4}。
///
/// 像素值保留原始数值范围（8位图像为0-255，CT为HU），统一以 `f32` 存储；
/// 16位整数在 `f32` 中可以精确表示。加载后不再修改，后续阶段都生成新数组。
#[derive(Debug, Clone)]
pub struct RawImage {
    pixels: Array3<f32>,
    depth: PixelDepth,
    kind: SourceKind,
}

/// 用于展示和热力图回映射的原图，即加载阶段的输出
pub type OriginalImage = RawImage;

impl RawImage {
    pub fn new(pixels: Array3<f32>, depth: PixelDepth, kind: SourceKind) -> Self {
        Self { pixels, depth, kind }
    }

    pub fn pixels(&self) -> ArrayView3<'_, f32> {
        self.pixels.view()
    }

    pub fn depth(&self) -> PixelDepth {
        self.depth
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// 同样的深度和来源，替换像素（用于增强变体）
    pub(crate) fn with_pixels(&self, pixels: Array3<f32>) -> Self {
        Self {
            pixels,
            depth: self.depth,
            kind: self.kind,
        }
    }
}

/// 尺寸校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: "Valid image.".to_string(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// 模型输入张量 (1, H, W, 3)，取值范围 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTensor {
    data: Array4<f32>,
}

impl CanonicalTensor {
    /// 由预处理流水线构造，调用方保证不变量
    pub(crate) fn new_unchecked(data: Array4<f32>) -> Self {
        debug_assert_eq!(data.dim().0, 1);
        debug_assert_eq!(data.dim().3, 3);
        Self { data }
    }

    /// 校验后构造：batch=1、3通道、数值在 [0, 1]
    pub fn from_array(data: Array4<f32>) -> Result<Self> {
        let (batch, height, width, channels) = data.dim();
        if batch != 1 || channels != 3 || height == 0 || width == 0 {
            return Err(ExplainError::Validation(format!(
                "canonical tensor must have shape (1, H, W, 3), got {:?}",
                data.shape()
            )));
        }
        if data.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(ExplainError::Validation(
                "canonical tensor values must lie in [0, 1]".to_string(),
            ));
        }
        Ok(Self { data })
    }

    pub fn array(&self) -> &Array4<f32> {
        &self.data
    }

    /// (height, width)
    pub fn spatial_size(&self) -> (usize, usize) {
        let (_, h, w, _) = self.data.dim();
        (h, w)
    }

    pub fn shape(&self) -> [usize; 4] {
        let (b, h, w, c) = self.data.dim();
        [b, h, w, c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_tensor_rejects_bad_shapes_and_ranges() {
        assert!(CanonicalTensor::from_array(Array4::zeros((2, 4, 4, 3))).is_err());
        assert!(CanonicalTensor::from_array(Array4::zeros((1, 4, 4, 1))).is_err());
        assert!(CanonicalTensor::from_array(Array4::from_elem((1, 4, 4, 3), 1.5)).is_err());

        let tensor = CanonicalTensor::from_array(Array4::from_elem((1, 4, 5, 3), 0.5)).unwrap();
        assert_eq!(tensor.shape(), [1, 4, 5, 3]);
        assert_eq!(tensor.spatial_size(), (4, 5));
    }
}
