use async_trait::async_trait;
use base64::Engine as _;
use enigo::Mouse as _;

use crate::errors::{OperatorError, OperatorResult};
use crate::perception::cursor::draw_cursor;
use crate::perception::focus_crop::crop_around_point;
use crate::perception::traits::ScreenCapture;
use crate::perception::types::{Screenshot, ScreenshotMeta};

/// Minimum edge of a refinement close-up after upscaling.
const REGION_MIN_SIZE: u32 = 512;

/// Primary-monitor capture via `xcap`, with the live cursor drawn in.
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapCapture;

#[async_trait]
impl ScreenCapture for XcapCapture {
    async fn capture(&self) -> OperatorResult<Screenshot> {
        tokio::task::spawn_blocking(|| {
            let (mut frame, meta, ratio) = grab_primary()?;
            if let Some((cx, cy)) = cursor_in_frame(ratio) {
                draw_cursor(&mut frame, cx, cy, ratio.round().max(1.0) as u32);
            }
            encode(frame, meta)
        })
        .await
        .map_err(|e| OperatorError::Perception(format!("capture join: {e}")))?
    }

    async fn capture_region(&self, x: i32, y: i32, size: u32) -> OperatorResult<Screenshot> {
        tokio::task::spawn_blocking(move || {
            let (frame, meta, _) = grab_primary()?;
            let crop = crop_around_point(
                &image::DynamicImage::ImageRgba8(frame),
                x,
                y,
                size,
                REGION_MIN_SIZE,
            )?;
            Ok(Screenshot {
                image_bytes: crop.image_bytes,
                image_base64: crop.image_base64,
                meta,
            })
        })
        .await
        .map_err(|e| OperatorError::Perception(format!("capture join: {e}")))?
    }
}

/// Returns the raw frame, its metadata and the physical/logical pixel ratio.
fn grab_primary() -> OperatorResult<(image::RgbaImage, ScreenshotMeta, f64)> {
    let monitors =
        xcap::Monitor::all().map_err(|e| OperatorError::Perception(format!("list monitors: {e}")))?;
    let (index, monitor) = monitors
        .iter()
        .enumerate()
        .find(|(_, m)| m.is_primary())
        .or_else(|| monitors.iter().enumerate().next())
        .ok_or_else(|| OperatorError::Perception("no monitor found".into()))?;

    let frame = monitor
        .capture_image()
        .map_err(|e| OperatorError::Perception(format!("capture monitor {index}: {e}")))?;

    let (pw, ph) = frame.dimensions();
    let logical_w = monitor.width().max(1);
    let logical_h = monitor.height().max(1);
    let ratio = pw as f64 / logical_w as f64;

    let meta = ScreenshotMeta {
        monitor_index: index as u32,
        scale_factor: monitor.scale_factor() as f64,
        physical_width: pw,
        physical_height: ph,
        logical_width: logical_w,
        logical_height: logical_h,
    };
    tracing::debug!(
        monitor = index,
        phys = %format!("{pw}×{ph}"),
        logical = %format!("{logical_w}×{logical_h}"),
        "primary monitor captured"
    );
    Ok((frame, meta, ratio))
}

/// Cursor position in frame pixels, if the input backend can report it.
fn cursor_in_frame(ratio: f64) -> Option<(u32, u32)> {
    let enigo = enigo::Enigo::new(&enigo::Settings::default()).ok()?;
    let (x, y) = enigo.location().ok()?;
    if x < 0 || y < 0 {
        return None;
    }
    Some(((x as f64 * ratio) as u32, (y as f64 * ratio) as u32))
}

fn encode(frame: image::RgbaImage, meta: ScreenshotMeta) -> OperatorResult<Screenshot> {
    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(frame)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(&png);
    Ok(Screenshot {
        image_bytes: png,
        image_base64: b64,
        meta,
    })
}
