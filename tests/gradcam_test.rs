mod common;

use common::{brightness_net, ActivationMode, GradientMode, StubClassifier};
use ct_explain::config::Config;
use ct_explain::diagnosis::Diagnosis;
use ct_explain::explain::{GradCam, RegionLabel, DISCLAIMER};
use ct_explain::image::{CanonicalTensor, ImageSource, OriginalImage, Preprocessor};
use ct_explain::ExplainError;

fn small_config() -> Config {
    let mut config = Config::default();
    config.preprocess.target_size = (32, 32);
    config
}

fn load(config: &Config, png: Vec<u8>) -> (CanonicalTensor, OriginalImage) {
    Preprocessor::new(config.preprocess.clone())
        .preprocess(&ImageSource::bytes(png))
        .unwrap()
}

/// 64x64 黑底，给定区域为白色
fn blob(rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> Vec<u8> {
    common::png_bytes(64, 64, move |x, y| {
        if rows.contains(&y) && cols.contains(&x) {
            255
        } else {
            0
        }
    })
}

#[test]
fn heatmap_is_normalized_and_localized() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let net = brightness_net(0.0);

    let record = GradCam::new(&config).attribute(&net, &tensor, &original, None).unwrap();

    assert_eq!(record.target_layer(), "conv");
    assert_eq!(record.heatmap().dim(), (4, 4));
    assert!(record.heatmap().iter().all(|v| (0.0..=1.0).contains(v)));
    assert!(record.heatmap().iter().any(|v| *v == 1.0));
    assert_eq!(record.heatmap()[[0, 0]], 1.0);

    assert_eq!(record.predicted_class(), Diagnosis::Hemorrhage);
    assert_eq!(record.region().as_str(), "left frontal lobe");
    assert!(record.text().contains("left frontal lobe"));
    assert!(record.text().ends_with(DISCLAIMER));

    assert_eq!(record.overlay().dim(), (64, 64, 3));
    assert_eq!(record.color_heatmap().dim(), (64, 64, 3));
}

#[test]
fn centered_activation_maps_to_basal_ganglia_every_time() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(24..40, 24..40));
    let net = brightness_net(0.0);
    let gradcam = GradCam::new(&config);

    let first = gradcam.attribute(&net, &tensor, &original, None).unwrap();
    assert_eq!(first.region().as_str(), "basal ganglia/thalamus region");
    for _ in 0..3 {
        let again = gradcam.attribute(&net, &tensor, &original, None).unwrap();
        assert_eq!(again.region(), first.region());
        assert_eq!(again.heatmap(), first.heatmap());
    }
}

#[test]
fn zero_activation_falls_back_to_whole_region() {
    let config = small_config();
    let (tensor, original) = load(&config, common::png_bytes(64, 64, |_, _| 0));
    let net = brightness_net(0.0);

    let record = GradCam::new(&config).attribute(&net, &tensor, &original, None).unwrap();
    assert!(record.heatmap().iter().all(|v| *v == 0.0));
    assert_eq!(record.region(), RegionLabel::WholeRegion);
    assert!(record.text().contains("whole region"));
}

#[test]
fn benign_prediction_explains_the_complement() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let net = brightness_net(-6.0);

    let record = GradCam::new(&config).attribute(&net, &tensor, &original, None).unwrap();
    assert_eq!(record.predicted_class(), Diagnosis::Normal);
    assert!(record.confidence() > 0.5);
    assert!(record.text().contains("no hemorrhage detected"));
    // 亮区是出血方向的证据，对"正常"没有正向贡献
    assert_eq!(record.region(), RegionLabel::WholeRegion);
}

#[test]
fn input_layer_can_be_targeted_explicitly() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let net = brightness_net(0.0);

    let record = GradCam::new(&config)
        .attribute(&net, &tensor, &original, Some("input"))
        .unwrap();
    assert_eq!(record.target_layer(), "input");
    assert_eq!(record.heatmap().dim(), (32, 32));
    assert!(record.heatmap().iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn invalid_explicit_layers_are_rejected() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let net = brightness_net(0.0);
    let gradcam = GradCam::new(&config);

    for layer in ["global_pool", "missing"] {
        match gradcam.attribute(&net, &tensor, &original, Some(layer)) {
            Err(err @ ExplainError::InvalidTargetLayer { .. }) => assert!(err.is_explanation_error()),
            other => panic!("expected invalid layer for {}, got {:?}", layer, other.map(|r| r.region())),
        }
    }
}

#[test]
fn classifier_without_spatial_layers() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let stub = StubClassifier::new(0.9).without_spatial_layers();

    let result = GradCam::new(&config).attribute(&stub, &tensor, &original, None);
    assert!(matches!(result, Err(ExplainError::NoConvolutionalLayer)));
}

#[test]
fn missing_or_non_finite_gradient_is_an_error() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let gradcam = GradCam::new(&config);

    for mode in [GradientMode::Missing, GradientMode::NonFinite] {
        let stub = StubClassifier::new(0.9).with_gradient(mode);
        match gradcam.attribute(&stub, &tensor, &original, None) {
            Err(ExplainError::GradientUnavailable { layer, .. }) => assert_eq!(layer, "features"),
            other => panic!("expected gradient error for {:?}, got {:?}", mode, other.map(|r| r.region())),
        }
    }

    let stub = StubClassifier::new(0.9).with_gradient(GradientMode::WrongShape);
    assert!(matches!(
        gradcam.attribute(&stub, &tensor, &original, None),
        Err(ExplainError::ClassifierInvocation(_))
    ));
}

#[test]
fn malformed_activation_is_a_classifier_error() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let gradcam = GradCam::new(&config);

    for mode in [ActivationMode::EmptyBatch, ActivationMode::NonFinite] {
        let stub = StubClassifier::new(0.9).with_activation(mode);
        match gradcam.attribute(&stub, &tensor, &original, None) {
            Err(ExplainError::ClassifierInvocation(message)) => assert!(message.contains("features")),
            other => panic!("expected classifier error for {:?}, got {:?}", mode, other.map(|r| r.region())),
        }
    }
}

#[test]
fn forward_failure_is_propagated() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let stub = StubClassifier::new(0.9).failing_on_call(1);

    assert!(matches!(
        GradCam::new(&config).attribute(&stub, &tensor, &original, None),
        Err(ExplainError::ClassifierInvocation(_))
    ));
}

#[test]
fn uniform_gradient_over_uniform_activation_peaks_everywhere() {
    let config = small_config();
    let (tensor, original) = load(&config, blob(0..16, 0..16));
    let stub = StubClassifier::new(0.9);

    let record = GradCam::new(&config).attribute(&stub, &tensor, &original, None).unwrap();
    assert!(record.heatmap().iter().all(|v| *v == 1.0));
    // 全图质心落在正中
    assert_eq!(record.region().as_str(), "basal ganglia/thalamus region");
}
