use crate::image::transforms::ImageTransforms;
use ndarray::{Array2, Array3, ArrayView2};

/// 热力图着色与叠加
pub struct HeatmapRenderer;

impl HeatmapRenderer {
    /// 热力图放大到原图尺寸并转为8位强度（截断）
    pub fn upsample_to_u8(heatmap: ArrayView2<'_, f32>, height: usize, width: usize) -> Array2<u8> {
        ImageTransforms::resize_bilinear(heatmap, height, width)
            .mapv(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
    }

    /// JET色带（蓝 -> 青 -> 黄 -> 红），输出RGB
    pub fn colorize(intensity: &Array2<u8>) -> Array3<u8> {
        let (height, width) = intensity.dim();
        let lut: Vec<[u8; 3]> = (0..=255u16).map(|i| jet(i as f32 / 255.0)).collect();

        let mut colored = Array3::<u8>::zeros((height, width, 3));
        for h in 0..height {
            for w in 0..width {
                let rgb = lut[intensity[[h, w]] as usize];
                for c in 0..3 {
                    colored[[h, w, c]] = rgb[c];
                }
            }
        }
        colored
    }

    /// 按 alpha 混合：original * (1 - alpha) + heatmap * alpha，四舍五入并饱和
    pub fn blend(original: &Array3<u8>, colored: &Array3<u8>, alpha: f32) -> Array3<u8> {
        debug_assert_eq!(original.dim(), colored.dim());
        let mut overlay = Array3::<u8>::zeros(original.dim());
        ndarray::Zip::from(&mut overlay)
            .and(original)
            .and(colored)
            .for_each(|out, &o, &c| {
                let value = o as f32 * (1.0 - alpha) + c as f32 * alpha;
                *out = value.round().clamp(0.0, 255.0) as u8;
            });
        overlay
    }
}

fn jet(v: f32) -> [u8; 3] {
    let channel = |offset: f32| -> u8 {
        let value = (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
        (value * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jet_runs_from_blue_to_red() {
        let ramp = Array2::from_shape_vec((1, 3), vec![0u8, 128, 255]).unwrap();
        let colored = HeatmapRenderer::colorize(&ramp);
        // 低值偏蓝
        assert!(colored[[0, 0, 2]] > colored[[0, 0, 0]]);
        // 高值偏红
        assert!(colored[[0, 2, 0]] > colored[[0, 2, 2]]);
        // 中间绿色最强
        assert_eq!(colored[[0, 1, 1]], 255);
    }

    #[test]
    fn blend_respects_alpha() {
        let original = Array3::<u8>::from_elem((2, 2, 3), 100);
        let colored = Array3::<u8>::from_elem((2, 2, 3), 200);
        let overlay = HeatmapRenderer::blend(&original, &colored, 0.4);
        assert!(overlay.iter().all(|v| *v == 140));

        let untouched = HeatmapRenderer::blend(&original, &colored, 0.0);
        assert_eq!(untouched, original);
    }

    #[test]
    fn upsample_matches_requested_size() {
        let heatmap = Array2::from_elem((7, 7), 1.0f32);
        let up = HeatmapRenderer::upsample_to_u8(heatmap.view(), 64, 80);
        assert_eq!(up.dim(), (64, 80));
        assert!(up.iter().all(|v| *v == 255));
    }

    #[test]
    fn upsample_rounds_to_nearest_level() {
        let heatmap = Array2::from_shape_vec((1, 2), vec![0.999_999_94f32, 0.5]).unwrap();
        let up = HeatmapRenderer::upsample_to_u8(heatmap.view(), 1, 2);
        assert_eq!(up[[0, 0]], 255);
        assert_eq!(up[[0, 1]], 128);
    }
}
