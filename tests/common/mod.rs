#![allow(dead_code)]

use ct_explain::image::CanonicalTensor;
use ct_explain::models::{ClassTarget, DifferentiableClassifier, GapNet, LayerCapture, LayerInfo};
use ct_explain::{ExplainError, Result};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use ndarray::{Array1, Array4};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 8位灰度PNG
pub fn png_bytes(width: u32, height: u32, pixel: impl Fn(u32, u32) -> u8) -> Vec<u8> {
    let gray = GrayImage::from_fn(width, height, |x, y| Luma([pixel(x, y)]));
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(gray)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn element(out: &mut Vec<u8>, group: u16, elem: u16, vr: &[u8; 2], value: &[u8]) {
    out.extend_from_slice(&group.to_le_bytes());
    out.extend_from_slice(&elem.to_le_bytes());
    out.extend_from_slice(vr);
    if matches!(vr, b"OB" | b"OW" | b"SQ" | b"UN" | b"UT") {
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    }
    out.extend_from_slice(value);
}

fn even(text: &str, pad: u8) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    if bytes.len() % 2 == 1 {
        bytes.push(pad);
    }
    bytes
}

/// 显式VR little endian 的单帧 CT 切片，带符号16位
pub fn ct_dicom(rows: u16, columns: u16, values: &[i16], rescale: Option<(f64, f64)>) -> Vec<u8> {
    assert_eq!(values.len(), rows as usize * columns as usize);

    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");
    element(&mut out, 0x0002, 0x0010, b"UI", &even("1.2.840.10008.1.2.1", 0));
    element(&mut out, 0x0008, 0x0060, b"CS", &even("CT", b' '));
    element(&mut out, 0x0028, 0x0002, b"US", &1u16.to_le_bytes());
    element(&mut out, 0x0028, 0x0004, b"CS", &even("MONOCHROME2", b' '));
    element(&mut out, 0x0028, 0x0010, b"US", &rows.to_le_bytes());
    element(&mut out, 0x0028, 0x0011, b"US", &columns.to_le_bytes());
    element(&mut out, 0x0028, 0x0100, b"US", &16u16.to_le_bytes());
    element(&mut out, 0x0028, 0x0101, b"US", &16u16.to_le_bytes());
    element(&mut out, 0x0028, 0x0103, b"US", &1u16.to_le_bytes());
    if let Some((slope, intercept)) = rescale {
        element(&mut out, 0x0028, 0x1052, b"DS", &even(&intercept.to_string(), b' '));
        element(&mut out, 0x0028, 0x1053, b"DS", &even(&slope.to_string(), b' '));
    }
    let pixels: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    element(&mut out, 0x7FE0, 0x0010, b"OW", &pixels);
    out
}

/// 对亮度敏感的 GapNet：32x32 输入，8x8 步长卷积取块均值，4x4 特征图，单通道。
///
/// 输出 sigmoid(dense_bias + 16 * 平均激活)，因此热区就是原图的亮区。
pub fn brightness_net(dense_bias: f32) -> GapNet {
    GapNet::new(
        (32, 32),
        8,
        Array4::from_elem((8, 8, 3, 1), 1.0 / 192.0),
        Array1::zeros(1),
        Array1::from_elem(1, 16.0),
        dense_bias,
    )
    .unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientMode {
    Ones,
    Missing,
    NonFinite,
    WrongShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationMode {
    Ones,
    EmptyBatch,
    NonFinite,
}

/// 固定输出的桩分类器，可模拟畸形激活、梯度缺失和第N次调用失败
pub struct StubClassifier {
    pub output: f32,
    pub gradient: GradientMode,
    pub activation: ActivationMode,
    pub spatial: bool,
    pub fail_on_call: Option<usize>,
    calls: AtomicUsize,
}

impl StubClassifier {
    pub fn new(output: f32) -> Self {
        Self {
            output,
            gradient: GradientMode::Ones,
            activation: ActivationMode::Ones,
            spatial: true,
            fail_on_call: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_gradient(mut self, mode: GradientMode) -> Self {
        self.gradient = mode;
        self
    }

    pub fn with_activation(mut self, mode: ActivationMode) -> Self {
        self.activation = mode;
        self
    }

    pub fn without_spatial_layers(mut self) -> Self {
        self.spatial = false;
        self
    }

    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(call) == self.fail_on_call {
            return Err(ExplainError::ClassifierInvocation(format!("stub failed on call {}", call)));
        }
        Ok(())
    }
}

impl DifferentiableClassifier for StubClassifier {
    fn name(&self) -> &str {
        "stub"
    }

    fn layers(&self) -> Vec<LayerInfo> {
        if self.spatial {
            vec![
                LayerInfo::new("features", vec![None, Some(4), Some(4), Some(2)]),
                LayerInfo::new("dense", vec![None, Some(1)]),
            ]
        } else {
            vec![
                LayerInfo::new("flatten", vec![None, Some(32)]),
                LayerInfo::new("dense", vec![None, Some(1)]),
            ]
        }
    }

    fn forward(&self, _input: &CanonicalTensor) -> Result<f32> {
        self.tick()?;
        Ok(self.output)
    }

    fn forward_with_capture(&self, _input: &CanonicalTensor, layer: &str) -> Result<LayerCapture> {
        self.tick()?;
        let activation = match self.activation {
            ActivationMode::Ones => Array4::from_elem((1, 4, 4, 2), 1.0),
            ActivationMode::EmptyBatch => Array4::zeros((0, 4, 4, 2)),
            ActivationMode::NonFinite => {
                let mut activation = Array4::from_elem((1, 4, 4, 2), 1.0);
                activation[[0, 0, 0, 0]] = f32::INFINITY;
                activation
            }
        };
        Ok(LayerCapture {
            layer: layer.to_string(),
            activation,
            output: self.output,
        })
    }

    fn gradient(
        &self,
        _input: &CanonicalTensor,
        capture: &LayerCapture,
        target: ClassTarget,
    ) -> Result<Option<Array4<f32>>> {
        Ok(match self.gradient {
            GradientMode::Ones => Some(Array4::from_elem(capture.activation.dim(), target.sign())),
            GradientMode::Missing => None,
            GradientMode::NonFinite => Some(Array4::from_elem((1, 4, 4, 2), f32::NAN)),
            GradientMode::WrongShape => Some(Array4::from_elem((1, 2, 2, 2), 1.0)),
        })
    }
}
