//! ONNX YOLOv8 inference for UI element detection.
//!
//! Every detection is labeled `~1`, `~2`, … in reading order.
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::errors::{OperatorError, OperatorResult};
use crate::perception::traits::ElementDetector;
use crate::perception::types::{BoundingBox, LabelMap};

/// Raw detection before NMS and label assignment, in original image pixels.
#[derive(Debug, Clone)]
struct RawDetection {
    bbox: BoundingBox,
    confidence: f32,
}

struct Inner {
    session: Session,
    input_size: u32,
    conf_threshold: f32,
    iou_threshold: f32,
}

/// Holds the ONNX Runtime session; inference runs on a blocking thread.
#[derive(Clone)]
pub struct YoloDetector {
    inner: Arc<Mutex<Inner>>,
}

impl YoloDetector {
    /// Try to construct a detector. Returns `None` if the model file does not exist.
    pub fn try_new(model_path: &str, conf_threshold: f32, iou_threshold: f32) -> Option<Self> {
        if !Path::new(model_path).exists() {
            tracing::warn!(path = %model_path, "YOLO model not found, detection disabled");
            return None;
        }
        match Self::build(model_path, conf_threshold, iou_threshold) {
            Ok(det) => {
                tracing::info!(path = %model_path, "YOLO detector loaded");
                Some(det)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load YOLO model");
                None
            }
        }
    }

    fn build(model_path: &str, conf_threshold: f32, iou_threshold: f32) -> OperatorResult<Self> {
        let session = Session::builder()
            .map_err(|e| OperatorError::Perception(format!("ort session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| OperatorError::Perception(format!("ort opt-level: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| OperatorError::Perception(format!("ort load model: {e}")))?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                session,
                input_size: 640,
                conf_threshold,
                iou_threshold,
            })),
        })
    }
}

#[async_trait]
impl ElementDetector for YoloDetector {
    async fn detect(&self, image_bytes: &[u8]) -> OperatorResult<LabelMap> {
        let inner = self.inner.clone();
        let bytes = image_bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| OperatorError::Perception("detector lock poisoned".into()))?;
            guard.detect(&bytes)
        })
        .await
        .map_err(|e| OperatorError::Perception(format!("detector join: {e}")))?
    }
}

impl Inner {
    fn detect(&mut self, image_bytes: &[u8]) -> OperatorResult<LabelMap> {
        let img = image::load_from_memory(image_bytes)?;
        let (orig_w, orig_h) = (img.width(), img.height());

        let (input_tensor, pad_x, pad_y, scale) = self.preprocess(&img);

        let input_value = Tensor::from_array(input_tensor)
            .map_err(|e| OperatorError::Perception(format!("ort tensor: {e}")))?;

        let output_owned = {
            let outputs = self
                .session
                .run(ort::inputs![input_value])
                .map_err(|e| OperatorError::Perception(format!("ort run: {e}")))?;

            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| OperatorError::Perception(format!("extract tensor: {e}")))?
                .to_owned()
        };

        let raw = self.postprocess(&output_owned.view(), orig_w, orig_h, pad_x, pad_y, scale)?;
        let labels = assign_labels(raw, orig_w, orig_h);
        tracing::debug!(count = labels.len(), "YOLO detections labelled");
        Ok(labels)
    }

    /// Resize + letterbox + normalise → NCHW f32 tensor.
    fn preprocess(&self, img: &image::DynamicImage) -> (Array4<f32>, f32, f32, f32) {
        let sz = self.input_size;
        let (ow, oh) = (img.width() as f32, img.height() as f32);
        let scale = (sz as f32 / ow).min(sz as f32 / oh);
        let nw = (ow * scale).round() as u32;
        let nh = (oh * scale).round() as u32;
        let pad_x = (sz - nw) as f32 / 2.0;
        let pad_y = (sz - nh) as f32 / 2.0;

        let resized = img.resize_exact(nw, nh, image::imageops::FilterType::CatmullRom);
        let rgb = resized.to_rgb8();

        let mut canvas = image::RgbImage::from_pixel(sz, sz, image::Rgb([114, 114, 114]));
        image::imageops::overlay(&mut canvas, &rgb, pad_x.round() as i64, pad_y.round() as i64);

        let mut tensor = Array4::<f32>::zeros((1, 3, sz as usize, sz as usize));
        for y in 0..sz {
            for x in 0..sz {
                let p = canvas.get_pixel(x, y);
                tensor[[0, 0, y as usize, x as usize]] = p[0] as f32 / 255.0;
                tensor[[0, 1, y as usize, x as usize]] = p[1] as f32 / 255.0;
                tensor[[0, 2, y as usize, x as usize]] = p[2] as f32 / 255.0;
            }
        }

        (tensor, pad_x, pad_y, scale)
    }

    fn postprocess(
        &self,
        output: &ndarray::ArrayViewD<f32>,
        orig_w: u32,
        orig_h: u32,
        pad_x: f32,
        pad_y: f32,
        scale: f32,
    ) -> OperatorResult<Vec<RawDetection>> {
        // YOLOv8 output: [1, 4+num_classes, num_proposals]
        let shape = output.shape();
        if shape.len() < 3 || shape[1] < 5 {
            return Err(OperatorError::Perception(format!(
                "unexpected output shape: {:?}",
                shape
            )));
        }
        let num_classes = shape[1] - 4;
        let num_preds = shape[2];

        let mut detections = Vec::new();
        for i in 0..num_preds {
            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];

            let max_score = (0..num_classes)
                .map(|c| output[[0, 4 + c, i]])
                .fold(0.0f32, f32::max);
            if max_score < self.conf_threshold {
                continue;
            }

            // Undo letterbox → original pixel space
            let x1 = (((cx - w / 2.0) - pad_x) / scale).clamp(0.0, orig_w as f32);
            let y1 = (((cy - h / 2.0) - pad_y) / scale).clamp(0.0, orig_h as f32);
            let x2 = (((cx + w / 2.0) - pad_x) / scale).clamp(0.0, orig_w as f32);
            let y2 = (((cy + h / 2.0) - pad_y) / scale).clamp(0.0, orig_h as f32);

            detections.push(RawDetection {
                bbox: BoundingBox { min_x: x1, min_y: y1, max_x: x2, max_y: y2 },
                confidence: max_score,
            });
        }

        let kept = nms(&detections, self.iou_threshold);
        Ok(kept.into_iter().map(|i| detections[i].clone()).collect())
    }
}

/// Greedy class-agnostic NMS; returns indices of kept detections.
fn nms(dets: &[RawDetection], iou_threshold: f32) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..dets.len()).collect();
    indices.sort_by(|&a, &b| {
        dets[b]
            .confidence
            .partial_cmp(&dets[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];
    for &i in &indices {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &indices {
            if !suppressed[j] && i != j && iou(&dets[i].bbox, &dets[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

/// Number detections top-to-bottom, then left-to-right.
fn assign_labels(mut raws: Vec<RawDetection>, w: u32, h: u32) -> LabelMap {
    raws.sort_by(|a, b| {
        let (ay, by) = (a.bbox.min_y.round() as i64, b.bbox.min_y.round() as i64);
        ay.cmp(&by).then_with(|| {
            a.bbox
                .min_x
                .partial_cmp(&b.bbox.min_x)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    let mut labels = LabelMap::new(w, h);
    for (idx, det) in raws.into_iter().enumerate() {
        labels.insert(format!("~{}", idx + 1), det.bbox);
    }
    labels
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix1 = a.min_x.max(b.min_x);
    let iy1 = a.min_y.max(b.min_y);
    let ix2 = a.max_x.min(b.max_x);
    let iy2 = a.max_y.min(b.max_y);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
