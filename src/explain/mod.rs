pub mod gradcam;
pub mod narrative;
pub mod region;

pub use gradcam::{channel_weights, compute_heatmap, ExplanationRecord, GradCam};
pub use narrative::DISCLAIMER;
pub use region::{localize, Horizontal, RegionLabel, Vertical};
