use ndarray::ArrayView2;
use serde::{Serialize, Serializer};
use std::fmt;

/// 水平方向三分区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Horizontal {
    Left,
    Center,
    Right,
}

/// 垂直方向三分区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vertical {
    Top,
    Middle,
    Bottom,
}

/// 热力图峰值对应的粗略解剖区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionLabel {
    Zone(Horizontal, Vertical),
    /// 没有超过阈值的激活
    WholeRegion,
}

impl RegionLabel {
    pub fn as_str(&self) -> &'static str {
        use Horizontal::*;
        use Vertical::*;
        match self {
            RegionLabel::Zone(Left, Top) => "left frontal lobe",
            RegionLabel::Zone(Center, Top) => "central frontal lobe",
            RegionLabel::Zone(Right, Top) => "right frontal lobe",
            RegionLabel::Zone(Left, Middle) => "left temporal/parietal lobe",
            RegionLabel::Zone(Center, Middle) => "basal ganglia/thalamus region",
            RegionLabel::Zone(Right, Middle) => "right temporal/parietal lobe",
            RegionLabel::Zone(Left, Bottom) => "left occipital lobe/cerebellum",
            RegionLabel::Zone(Center, Bottom) => "brainstem/cerebellum",
            RegionLabel::Zone(Right, Bottom) => "right occipital lobe/cerebellum",
            RegionLabel::WholeRegion => "whole region",
        }
    }

    /// 按三等分把质心 (row, col) 归入九宫格
    pub fn from_centroid(row: f32, col: f32, height: usize, width: usize) -> Self {
        let w_third = width as f32 / 3.0;
        let h_third = height as f32 / 3.0;

        let horizontal = if col < w_third {
            Horizontal::Left
        } else if col > 2.0 * w_third {
            Horizontal::Right
        } else {
            Horizontal::Center
        };

        let vertical = if row < h_third {
            Vertical::Top
        } else if row > 2.0 * h_third {
            Vertical::Bottom
        } else {
            Vertical::Middle
        };

        RegionLabel::Zone(horizontal, vertical)
    }
}

impl fmt::Display for RegionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RegionLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 取不低于 `fraction * peak` 的单元格质心并定位区域；峰值非正时返回 `WholeRegion`
pub fn localize(heatmap: ArrayView2<'_, f32>, fraction: f32) -> RegionLabel {
    let (height, width) = heatmap.dim();
    let peak = heatmap.iter().cloned().fold(0.0f32, f32::max);
    if !(peak > 0.0) {
        return RegionLabel::WholeRegion;
    }

    let threshold = fraction * peak;
    let (mut row_sum, mut col_sum, mut count) = (0.0f64, 0.0f64, 0usize);
    for ((row, col), value) in heatmap.indexed_iter() {
        if *value >= threshold {
            row_sum += row as f64;
            col_sum += col as f64;
            count += 1;
        }
    }

    if count == 0 {
        return RegionLabel::WholeRegion;
    }

    let row = (row_sum / count as f64) as f32;
    let col = (col_sum / count as f64) as f32;
    tracing::debug!("Activation centroid ({:.2}, {:.2}) over {} cells", row, col, count);
    RegionLabel::from_centroid(row, col, height, width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn exact_center_maps_to_basal_ganglia() {
        for _ in 0..3 {
            let label = RegionLabel::from_centroid(112.0, 112.0, 224, 224);
            assert_eq!(label.as_str(), "basal ganglia/thalamus region");
        }
    }

    #[test]
    fn corners_map_to_outer_zones() {
        assert_eq!(RegionLabel::from_centroid(0.0, 0.0, 9, 9).as_str(), "left frontal lobe");
        assert_eq!(RegionLabel::from_centroid(0.0, 8.0, 9, 9).as_str(), "right frontal lobe");
        assert_eq!(RegionLabel::from_centroid(8.0, 4.0, 9, 9).as_str(), "brainstem/cerebellum");
        assert_eq!(
            RegionLabel::from_centroid(8.0, 0.0, 9, 9).as_str(),
            "left occipital lobe/cerebellum"
        );
    }

    #[test]
    fn zero_map_is_whole_region() {
        let heatmap = Array2::<f32>::zeros((7, 7));
        assert_eq!(localize(heatmap.view(), 0.7), RegionLabel::WholeRegion);
    }

    #[test]
    fn centroid_follows_hot_cells() {
        let mut heatmap = Array2::<f32>::zeros((6, 6));
        heatmap[[5, 5]] = 1.0;
        heatmap[[4, 5]] = 0.8;
        heatmap[[0, 0]] = 0.5;
        assert_eq!(
            localize(heatmap.view(), 0.7).as_str(),
            "right occipital lobe/cerebellum"
        );
    }

    #[test]
    fn serializes_as_label_text() {
        let json = serde_json::to_string(&RegionLabel::WholeRegion).unwrap();
        assert_eq!(json, "\"whole region\"");
    }
}
