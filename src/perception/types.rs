use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub monitor_index: u32,
    pub scale_factor: f64,
    pub physical_width: u32,
    pub physical_height: u32,
    pub logical_width: u32,
    pub logical_height: u32,
}

impl ScreenshotMeta {
    /// Metadata for an unscaled screen of the given size.
    pub fn unscaled(width: u32, height: u32) -> Self {
        Self {
            monitor_index: 0,
            scale_factor: 1.0,
            physical_width: width,
            physical_height: height,
            logical_width: width,
            logical_height: height,
        }
    }
}

/// A captured frame, PNG encoded.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub image_bytes: Vec<u8>,
    pub image_base64: String,
    pub meta: ScreenshotMeta,
}

/// Axis-aligned box in image-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    pub fn area(&self) -> f32 {
        (self.max_x - self.min_x).max(0.0) * (self.max_y - self.min_y).max(0.0)
    }
}

/// Label token → element box, valid only for the image it was detected on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelMap {
    pub image_width: u32,
    pub image_height: u32,
    entries: BTreeMap<String, BoundingBox>,
}

impl LabelMap {
    pub fn new(image_width: u32, image_height: u32) -> Self {
        Self {
            image_width,
            image_height,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, label: impl Into<String>, bbox: BoundingBox) {
        self.entries.insert(label.into(), bbox);
    }

    /// Look up a label, tolerating surrounding whitespace and quotes.
    pub fn get(&self, label: &str) -> Option<&BoundingBox> {
        let key = label.trim().trim_matches(|c| c == '"' || c == '\'');
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BoundingBox)> {
        self.entries.iter()
    }
}

/// What the model is shown for one turn.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Image sent to the model (annotated when labels exist).
    pub image_base64: String,
    pub meta: ScreenshotMeta,
    /// Present only for the labeled strategy.
    pub labels: Option<LabelMap>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_lookup_trims_quotes() {
        let mut map = LabelMap::new(100, 100);
        map.insert(
            "~3",
            BoundingBox { min_x: 10.0, min_y: 20.0, max_x: 30.0, max_y: 40.0 },
        );
        assert!(map.get(" \"~3\" ").is_some());
        assert!(map.get("~4").is_none());
        assert_eq!(map.get("~3").unwrap().center(), (20.0, 30.0));
    }
}
