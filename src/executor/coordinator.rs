// Coordinate mapping between the model's percent-of-screen space and pixels.
use crate::errors::{OperatorError, OperatorResult};
use crate::perception::types::BoundingBox;

/// Anything the model may hand us as a percentage: `"42%"`, `"42"`, `42.0`.
pub trait AsPercent {
    fn as_percent(&self) -> OperatorResult<f64>;
}

impl AsPercent for str {
    fn as_percent(&self) -> OperatorResult<f64> {
        let trimmed = self.trim();
        let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
        let value: f64 = number
            .parse()
            .map_err(|_| OperatorError::MalformedCoordinate(format!("'{self}' is not a number")))?;
        value.as_percent()
    }
}

impl AsPercent for String {
    fn as_percent(&self) -> OperatorResult<f64> {
        self.as_str().as_percent()
    }
}

impl AsPercent for f64 {
    fn as_percent(&self) -> OperatorResult<f64> {
        if !self.is_finite() || !(0.0..=100.0).contains(self) {
            return Err(OperatorError::MalformedCoordinate(format!(
                "{self} is outside [0, 100]"
            )));
        }
        Ok(*self)
    }
}

impl<T: AsPercent + ?Sized> AsPercent for &T {
    fn as_percent(&self) -> OperatorResult<f64> {
        (**self).as_percent()
    }
}

/// Map a percentage of `extent` to an on-screen pixel index.
///
/// 100% lands on the last pixel rather than one past the edge.
pub fn percent_to_pixel<P: AsPercent + ?Sized>(percent: &P, extent: u32) -> OperatorResult<i32> {
    let pct = percent.as_percent()?;
    let max = extent.saturating_sub(1) as f64;
    Ok((pct / 100.0 * extent as f64).round().min(max) as i32)
}

pub fn pixel_to_percent(pixel: i32, extent: u32) -> f64 {
    if extent == 0 {
        return 0.0;
    }
    pixel as f64 / extent as f64 * 100.0
}

/// Convert a `[0, 1]` screen fraction (`"0.25"`, `0.25`, or an explicit
/// `"25%"`) to percent.
pub fn fraction_to_percent(value: &serde_json::Value) -> OperatorResult<f64> {
    match value {
        serde_json::Value::String(s) if s.trim().ends_with('%') => s.as_percent(),
        serde_json::Value::String(s) => {
            let fraction: f64 = s.trim().parse().map_err(|_| {
                OperatorError::MalformedCoordinate(format!("'{s}' is not a number"))
            })?;
            fraction_value(fraction)
        }
        serde_json::Value::Number(n) => fraction_value(n.as_f64().unwrap_or(f64::NAN)),
        other => Err(OperatorError::MalformedCoordinate(format!(
            "{other} is not a coordinate"
        ))),
    }
}

fn fraction_value(fraction: f64) -> OperatorResult<f64> {
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return Err(OperatorError::MalformedCoordinate(format!(
            "{fraction} is outside [0, 1]"
        )));
    }
    (fraction * 100.0).as_percent()
}

/// Half-width and half-height of a `crop_px` square, in percent of the screen.
/// Kept exact: callers format the final value once.
pub fn crop_half_extent_percent(crop_px: u32, screen_w: u32, screen_h: u32) -> (f64, f64) {
    let half = crop_px as f64 / 2.0;
    (
        half / screen_w.max(1) as f64 * 100.0,
        half / screen_h.max(1) as f64 * 100.0,
    )
}

/// Center of an image-space box as percent of that image.
pub fn bbox_center_percent(bbox: &BoundingBox, image_w: u32, image_h: u32) -> OperatorResult<(f64, f64)> {
    if image_w == 0 || image_h == 0 {
        return Err(OperatorError::MalformedCoordinate("label map has no image size".into()));
    }
    let (cx, cy) = bbox.center();
    let x = (cx as f64 / image_w as f64 * 100.0).clamp(0.0, 100.0);
    let y = (cy as f64 / image_h as f64 * 100.0).clamp(0.0, 100.0);
    Ok((x, y))
}
