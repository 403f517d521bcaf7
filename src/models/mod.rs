pub mod classifier;
pub mod gapnet;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use classifier::{
    ensure_probability, find_last_spatial_layer, ClassTarget, DifferentiableClassifier, LayerCapture, LayerInfo,
};
pub use gapnet::{GapNet, GapNetWeights};
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;
