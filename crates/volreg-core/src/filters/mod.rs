pub mod edge;
pub mod intensity;
pub mod label;

pub use edge::{edge_map, gradient, mean_filter, sobel_magnitude};
pub use intensity::{correlation, match_intensity, normalize, otsu_threshold, remove_background};
pub use label::{is_label_image, select_interpolation};
