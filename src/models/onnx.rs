use crate::config::Config;
use crate::image::CanonicalTensor;
use crate::models::classifier::{ClassTarget, DifferentiableClassifier, LayerCapture, LayerInfo};
use crate::utils::error::ExplainError;
use crate::Result;
use ndarray::{Array4, ArrayD, Ix4};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// ONNX 导出的分类器。
///
/// 导出时需要把目标特征图作为额外的图输出；若同时导出了
/// d(output)/d(feature)，即可生成 Grad-CAM，否则 `gradient` 返回 `None`。
pub struct OnnxClassifier {
    session: Arc<Mutex<Session>>,
    name: String,
    input_name: String,
    output_name: String,
    feature_output: String,
    gradient_output: Option<String>,
}

impl OnnxClassifier {
    pub fn new(config: &Config) -> Result<Self> {
        let onnx = &config.onnx;
        let model_path = onnx
            .model_path
            .as_ref()
            .ok_or_else(|| ExplainError::Config("onnx.model_path is not set".to_string()))?;

        if !model_path.exists() {
            return Err(ExplainError::Config(format!(
                "Classifier model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading classifier model from: {}", model_path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.onnx_intra_threads())?
            .commit_from_file(model_path)?;

        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Classifier output[{}]: '{}'", i, output.name);
        }

        let available: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let mut required = vec![&onnx.output_name, &onnx.feature_output];
        if let Some(gradient) = &onnx.gradient_output {
            required.push(gradient);
        }
        for name in required {
            if !available.contains(name) {
                return Err(ExplainError::Config(format!(
                    "Output '{}' not found in model. Available outputs: {:?}",
                    name, available
                )));
            }
        }

        if onnx.gradient_output.is_none() {
            tracing::warn!("No gradient output configured, explanations will be unavailable");
        }

        let name = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx")
            .to_string();

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            name,
            input_name: onnx.input_name.clone(),
            output_name: onnx.output_name.clone(),
            feature_output: onnx.feature_output.clone(),
            gradient_output: onnx.gradient_output.clone(),
        })
    }

    /// 运行一次推理并取出指定输出
    fn run(&self, input: &CanonicalTensor, names: &[&str]) -> Result<Vec<ArrayD<f32>>> {
        let input_tensor = Tensor::from_array(input.array().clone())?;

        let mut session = self.session.lock();
        let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

        let extracted = names
            .iter()
            .map(|name| match outputs.get(*name) {
                Some(output) => Ok(output.try_extract_array::<f32>()?.into_owned()),
                None => {
                    let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                    Err(ExplainError::ClassifierInvocation(format!(
                        "Output '{}' not found. Available outputs: {:?}",
                        name, available
                    )))
                }
            })
            .collect::<Result<Vec<_>>>();
        extracted
    }

    fn scalar(&self, output: &ArrayD<f32>) -> Result<f32> {
        match output.iter().next() {
            Some(value) if output.len() == 1 => Ok(*value),
            _ => Err(ExplainError::ClassifierInvocation(format!(
                "Output '{}' must hold a single value, got shape {:?}",
                self.output_name,
                output.shape()
            ))),
        }
    }

    fn to_rank4(&self, name: &str, array: ArrayD<f32>) -> Result<Array4<f32>> {
        let shape = array.shape().to_vec();
        array.into_dimensionality::<Ix4>().map_err(|_| {
            ExplainError::ClassifierInvocation(format!(
                "Output '{}' is not a rank-4 tensor, got shape {:?}",
                name, shape
            ))
        })
    }
}

impl DifferentiableClassifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    /// ONNX 图只暴露输入和导出的输出，空间维度在运行时确定
    fn layers(&self) -> Vec<LayerInfo> {
        vec![
            LayerInfo::new(self.input_name.clone(), vec![None, None, None, Some(3)]),
            LayerInfo::new(self.feature_output.clone(), vec![None, None, None, None]),
            LayerInfo::new(self.output_name.clone(), vec![None, Some(1)]),
        ]
    }

    fn forward(&self, input: &CanonicalTensor) -> Result<f32> {
        let outputs = self.run(input, &[self.output_name.as_str()])?;
        self.scalar(&outputs[0])
    }

    fn forward_with_capture(&self, input: &CanonicalTensor, layer: &str) -> Result<LayerCapture> {
        if layer == self.input_name {
            return Ok(LayerCapture {
                layer: layer.to_string(),
                activation: input.array().clone(),
                output: self.forward(input)?,
            });
        }
        if layer != self.feature_output {
            return Err(ExplainError::ClassifierInvocation(format!(
                "layer '{}' is not exported by model {}",
                layer, self.name
            )));
        }

        let mut outputs = self
            .run(input, &[self.output_name.as_str(), self.feature_output.as_str()])?
            .into_iter();
        let (prediction, features) = match (outputs.next(), outputs.next()) {
            (Some(prediction), Some(features)) => (prediction, features),
            _ => return Err(ExplainError::Internal("missing model outputs".to_string())),
        };

        Ok(LayerCapture {
            layer: layer.to_string(),
            activation: self.to_rank4(layer, features)?,
            output: self.scalar(&prediction)?,
        })
    }

    fn gradient(
        &self,
        input: &CanonicalTensor,
        capture: &LayerCapture,
        target: ClassTarget,
    ) -> Result<Option<Array4<f32>>> {
        let gradient_output = match &self.gradient_output {
            Some(name) if capture.layer == self.feature_output => name,
            _ => return Ok(None),
        };

        let mut outputs = self.run(input, &[gradient_output.as_str()])?;
        let gradient = match outputs.pop() {
            Some(gradient) => self.to_rank4(gradient_output, gradient)?,
            None => return Ok(None),
        };

        let sign = target.sign();
        Ok(Some(gradient.mapv(|g| g * sign)))
    }
}
