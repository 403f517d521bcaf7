use crate::image::dicom;
use crate::image::types::{ImageSource, PixelDepth, RawImage, SourceKind};
use crate::utils::error::ExplainError;
use crate::Result;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use ndarray::Array3;
use std::path::Path;

/// 单个输入的大小上限
pub const MAX_SOURCE_BYTES: usize = 50 * 1024 * 1024; // 50MB

pub struct ImageLoader;

impl ImageLoader {
    /// 加载任意来源：DICOM优先（后缀、显式标记或 DICM 标识），失败后回退到通用栅格解码
    pub fn load(source: &ImageSource) -> Result<RawImage> {
        match source {
            ImageSource::Path(path) => Self::from_path(path),
            ImageSource::Bytes { data, name, dicom } => {
                let by_name = name.as_deref().map(has_dicom_suffix).unwrap_or(false);
                Self::from_bytes(data, *dicom || by_name)
            }
            ImageSource::Base64(data) => Self::from_base64(data),
        }
    }

    /// 从文件路径加载图像
    pub fn from_path(path: &Path) -> Result<RawImage> {
        let bytes = std::fs::read(path)
            .map_err(|e| ExplainError::Load(format!("failed to read {}: {}", path.display(), e)))?;
        let dicom_hint = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(has_dicom_suffix)
            .unwrap_or(false);

        Self::from_bytes(&bytes, dicom_hint)
    }

    /// 从base64字符串加载图像
    pub fn from_base64(base64_data: &str) -> Result<RawImage> {
        // 检测并移除可能的数据URL前缀 (data:image/xxx;base64,)
        let (base64_clean, dicom_hint) = if base64_data.starts_with("data:") {
            let mut parts = base64_data.splitn(2, ',');
            let header = parts.next().unwrap_or("");
            let body = parts.next().unwrap_or(base64_data);
            (body, header.contains("dicom"))
        } else {
            (base64_data, false)
        };

        let image_bytes = base64::engine::general_purpose::STANDARD.decode(base64_clean.trim())?;

        Self::from_bytes(&image_bytes, dicom_hint)
    }

    /// 从字节加载图像
    pub fn from_bytes(bytes: &[u8], dicom_hint: bool) -> Result<RawImage> {
        if bytes.is_empty() {
            return Err(ExplainError::Load("empty image source".to_string()));
        }

        // 检查文件大小
        if bytes.len() > MAX_SOURCE_BYTES {
            return Err(ExplainError::Load(format!(
                "source too large: {} bytes, max allowed: {} bytes",
                bytes.len(),
                MAX_SOURCE_BYTES
            )));
        }

        let mut dicom_failure = None;
        if dicom_hint || dicom::has_dicom_magic(bytes) {
            match dicom::decode(bytes) {
                Ok(image) => {
                    tracing::info!(
                        "Decoded DICOM image: {}x{} ({:?})",
                        image.width(),
                        image.height(),
                        image.depth()
                    );
                    return Ok(image);
                }
                Err(e) => {
                    tracing::warn!("DICOM decode failed, falling back to raster decoder: {}", e);
                    dicom_failure = Some(e.to_string());
                }
            }
        }

        match Self::decode_raster(bytes) {
            Ok(image) => Ok(image),
            Err(raster_error) => Err(match dicom_failure {
                Some(dicom_error) => ExplainError::Load(format!(
                    "no decoder accepted the source ({}; {})",
                    dicom_error, raster_error
                )),
                None => raster_error,
            }),
        }
    }

    /// 通用栅格解码（JPEG、PNG等）
    fn decode_raster(bytes: &[u8]) -> Result<RawImage> {
        let format = Self::detect_format(bytes);
        let image = image::load_from_memory(bytes)?;
        tracing::info!(
            "Decoded raster image: {}x{} ({:?}, {:?})",
            image.width(),
            image.height(),
            format,
            image.color()
        );
        Self::from_dynamic(&image)
    }

    /// 检测图像格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// 转换 DynamicImage 为 (H, W, C) 像素数组，保留原始位深
    pub fn from_dynamic(image: &DynamicImage) -> Result<RawImage> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let (channels, depth, data): (usize, PixelDepth, Vec<f32>) = match image {
            DynamicImage::ImageLuma8(buf) => (1, PixelDepth::Uint8, to_f32(buf.as_raw())),
            DynamicImage::ImageLumaA8(buf) => (2, PixelDepth::Uint8, to_f32(buf.as_raw())),
            DynamicImage::ImageRgb8(buf) => (3, PixelDepth::Uint8, to_f32(buf.as_raw())),
            DynamicImage::ImageRgba8(buf) => (4, PixelDepth::Uint8, to_f32(buf.as_raw())),
            DynamicImage::ImageLuma16(buf) => (1, PixelDepth::Uint16, to_f32(buf.as_raw())),
            DynamicImage::ImageLumaA16(buf) => (2, PixelDepth::Uint16, to_f32(buf.as_raw())),
            DynamicImage::ImageRgb16(buf) => (3, PixelDepth::Uint16, to_f32(buf.as_raw())),
            DynamicImage::ImageRgba16(buf) => (4, PixelDepth::Uint16, to_f32(buf.as_raw())),
            DynamicImage::ImageRgb32F(buf) => (3, PixelDepth::Float32, buf.as_raw().clone()),
            DynamicImage::ImageRgba32F(buf) => (4, PixelDepth::Float32, buf.as_raw().clone()),
            other => (3, PixelDepth::Uint8, to_f32(other.to_rgb8().as_raw())),
        };

        let pixels = raster_pixels(height, width, channels, data)?;
        Ok(RawImage::new(pixels, depth, SourceKind::Raster))
    }
}

/// 按 (H, W, C) 排列解码缓冲区，长度不符时报加载错误
fn raster_pixels(height: usize, width: usize, channels: usize, data: Vec<f32>) -> Result<Array3<f32>> {
    let len = data.len();
    Array3::from_shape_vec((height, width, channels), data).map_err(|e| {
        ExplainError::Load(format!(
            "invalid raster buffer: {} values for {}x{}x{}: {}",
            len, height, width, channels, e
        ))
    })
}

fn to_f32<T: Copy + Into<f32>>(raw: &[T]) -> Vec<f32> {
    raw.iter().map(|v| (*v).into()).collect()
}

/// `.dcm` / `.dicom` 后缀（忽略大小写）
pub fn has_dicom_suffix(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".dcm") || lower.ends_with(".dicom")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(image: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn decodes_gray_png_as_8bit() {
        let png = encode_png(DynamicImage::ImageLuma8(GrayImage::from_pixel(70, 80, Luma([128]))));
        let image = ImageLoader::from_bytes(&png, false).unwrap();
        assert_eq!((image.height(), image.width(), image.channels()), (80, 70, 1));
        assert_eq!(image.depth(), PixelDepth::Uint8);
        assert_eq!(image.kind(), SourceKind::Raster);
        assert!(image.pixels().iter().all(|v| *v == 128.0));
    }

    #[test]
    fn rgba_keeps_four_channels() {
        let png = encode_png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            4,
            4,
            Rgba([10, 20, 30, 40]),
        )));
        let image = ImageLoader::from_bytes(&png, false).unwrap();
        assert_eq!(image.channels(), 4);
        assert_eq!(image.pixels()[[0, 0, 3]], 40.0);
    }

    #[test]
    fn dicom_hint_falls_back_to_raster() {
        let png = encode_png(DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([3]))));
        let image = ImageLoader::load(&ImageSource::Bytes {
            data: png,
            name: Some("scan.DCM".to_string()),
            dicom: false,
        })
        .unwrap();
        assert_eq!(image.kind(), SourceKind::Raster);
    }

    #[test]
    fn undecodable_bytes_fail_with_load_error() {
        let err = ImageLoader::from_bytes(b"definitely not an image", true).unwrap_err();
        assert!(matches!(err, ExplainError::Load(_)));
        assert!(ImageLoader::from_bytes(&[], false).is_err());
    }

    #[test]
    fn base64_with_data_url_prefix() {
        let png = encode_png(DynamicImage::ImageLuma8(GrayImage::from_pixel(5, 6, Luma([9]))));
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let data_url = format!("data:image/png;base64,{}", encoded);

        let image = ImageLoader::load(&ImageSource::Base64(data_url)).unwrap();
        assert_eq!((image.height(), image.width()), (6, 5));

        let err = ImageLoader::load(&ImageSource::Base64("@@not base64@@".to_string())).unwrap_err();
        assert!(matches!(err, ExplainError::Load(_)));
    }

    #[test]
    fn short_raster_buffer_is_a_load_error() {
        let err = raster_pixels(4, 4, 3, vec![0.0; 47]).unwrap_err();
        assert!(matches!(err, ExplainError::Load(_)));
        assert_eq!(raster_pixels(4, 4, 3, vec![0.0; 48]).unwrap().dim(), (4, 4, 3));
    }

    #[test]
    fn sixteen_bit_raster_keeps_depth() {
        let image = ImageLoader::from_dynamic(&DynamicImage::ImageLuma16(image::ImageBuffer::from_pixel(
            3,
            2,
            Luma([4000u16]),
        )))
        .unwrap();
        assert_eq!(image.depth(), PixelDepth::Uint16);
        assert_eq!(image.pixels()[[1, 2, 0]], 4000.0);
    }

    #[test]
    fn suffix_detection_ignores_case() {
        assert!(has_dicom_suffix("IMG0001.DCM"));
        assert!(has_dicom_suffix("brain.dicom"));
        assert!(!has_dicom_suffix("brain.png"));
    }
}
