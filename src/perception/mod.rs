pub mod annotator;
pub mod cursor;
pub mod focus_crop;
pub mod pipeline;
pub mod screenshot;
pub mod traits;
pub mod types;
pub mod yolo_detector;
