use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Image load failed: {0}")]
    Load(String),

    #[error("Image validation failed: {0}")]
    Validation(String),

    #[error("Classifier exposes no layer with a rank-4 (batch, height, width, channels) output")]
    NoConvolutionalLayer,

    #[error("Invalid target layer '{layer}': {reason}")]
    InvalidTargetLayer { layer: String, reason: String },

    #[error("Gradient unavailable for layer '{layer}': {reason}")]
    GradientUnavailable { layer: String, reason: String },

    #[error("Classifier invocation failed: {0}")]
    ClassifierInvocation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExplainError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ExplainError::Load(_) => "LOAD_ERROR",
            ExplainError::Validation(_) => "VALIDATION_ERROR",
            ExplainError::NoConvolutionalLayer => "NO_CONVOLUTIONAL_LAYER",
            ExplainError::InvalidTargetLayer { .. } => "INVALID_TARGET_LAYER",
            ExplainError::GradientUnavailable { .. } => "GRADIENT_UNAVAILABLE",
            ExplainError::ClassifierInvocation(_) => "CLASSIFIER_INVOCATION_ERROR",
            ExplainError::Config(_) => "CONFIG_ERROR",
            ExplainError::Json(_) => "JSON_ERROR",
            ExplainError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 输入图像本身的问题（需要换一张图）
    pub fn is_input_error(&self) -> bool {
        matches!(self, ExplainError::Load(_) | ExplainError::Validation(_))
    }

    /// 仅解释失败，预测结果仍然有效
    pub fn is_explanation_error(&self) -> bool {
        matches!(
            self,
            ExplainError::NoConvolutionalLayer
                | ExplainError::InvalidTargetLayer { .. }
                | ExplainError::GradientUnavailable { .. }
        )
    }

    /// 面向展示层的提示文本
    pub fn user_message(&self) -> &'static str {
        if self.is_input_error() {
            "Please provide a different image."
        } else if self.is_explanation_error() {
            "Explanation unavailable, showing prediction only."
        } else {
            "Analysis failed due to an internal error."
        }
    }
}

impl From<image::ImageError> for ExplainError {
    fn from(err: image::ImageError) -> Self {
        ExplainError::Load(format!("raster decode error: {}", err))
    }
}

impl From<base64::DecodeError> for ExplainError {
    fn from(err: base64::DecodeError) -> Self {
        ExplainError::Load(format!("base64 decode error: {}", err))
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for ExplainError {
    fn from(err: ort::Error) -> Self {
        ExplainError::ClassifierInvocation(format!("ONNX runtime error: {}", err))
    }
}
