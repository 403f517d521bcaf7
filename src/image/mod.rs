pub mod dicom;
pub mod loader;
pub mod postprocessing;
pub mod preprocessing;
pub mod transforms;
pub mod types;

pub use loader::ImageLoader;
pub use postprocessing::HeatmapRenderer;
pub use preprocessing::Preprocessor;
pub use transforms::ImageTransforms;
pub use types::{
    CanonicalTensor, ImageSource, OriginalImage, PixelDepth, RawImage, SourceKind, ValidationResult,
};

use crate::config::PreprocessConfig;
use crate::Result;

/// 便捷函数：按配置完成预处理
pub fn preprocess(source: &ImageSource, config: &PreprocessConfig) -> Result<(CanonicalTensor, OriginalImage)> {
    Preprocessor::new(config.clone()).preprocess(source)
}
