//! Cut and upscale a square region around a proposed click point for the
//! accurate-mode close-up.
use crate::errors::{OperatorError, OperatorResult};
use crate::perception::cursor::draw_cursor;

/// Result of a focus crop operation.
pub struct FocusCrop {
    /// PNG bytes of the (possibly upscaled) crop.
    pub image_bytes: Vec<u8>,
    pub image_base64: String,
    /// The pixel offset of the crop's top-left corner in the original image.
    pub origin_x: u32,
    pub origin_y: u32,
    /// Size of the crop in the original image (before upscaling).
    pub crop_w: u32,
    pub crop_h: u32,
}

/// Crop a `size`×`size` square centered on `(cx, cy)` from `img`, clamped to
/// the image bounds, mark the center with a cursor, and upscale to at least
/// `min_size`.
pub fn crop_around_point(
    img: &image::DynamicImage,
    cx: i32,
    cy: i32,
    size: u32,
    min_size: u32,
) -> OperatorResult<FocusCrop> {
    let (w, h) = (img.width() as i32, img.height() as i32);
    if cx < 0 || cy < 0 || cx >= w || cy >= h {
        return Err(OperatorError::Perception(format!(
            "crop center ({cx},{cy}) outside {w}x{h} image"
        )));
    }

    let half = (size / 2) as i32;
    let x1 = (cx - half).max(0);
    let y1 = (cy - half).max(0);
    let x2 = (cx + half).min(w);
    let y2 = (cy + half).min(h);
    let cw = (x2 - x1) as u32;
    let ch = (y2 - y1) as u32;

    if cw == 0 || ch == 0 {
        return Err(OperatorError::Perception("zero-size crop".into()));
    }

    let mut cropped = img.crop_imm(x1 as u32, y1 as u32, cw, ch).to_rgba8();
    draw_cursor(&mut cropped, (cx - x1) as u32, (cy - y1) as u32, 1);

    // Upscale if smaller than min_size
    let scale = if cw < min_size || ch < min_size {
        let sw = min_size as f32 / cw as f32;
        let sh = min_size as f32 / ch as f32;
        sw.max(sh).max(1.0)
    } else {
        1.0
    };

    let result_img = image::DynamicImage::ImageRgba8(cropped);
    let result_img = if scale > 1.0 {
        let out_w = (cw as f32 * scale).round() as u32;
        let out_h = (ch as f32 * scale).round() as u32;
        result_img.resize_exact(out_w, out_h, image::imageops::FilterType::Lanczos3)
    } else {
        result_img
    };

    let mut png_bytes = Vec::new();
    result_img.write_to(
        &mut std::io::Cursor::new(&mut png_bytes),
        image::ImageFormat::Png,
    )?;

    let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &png_bytes);

    Ok(FocusCrop {
        image_bytes: png_bytes,
        image_base64: b64,
        origin_x: x1 as u32,
        origin_y: y1 as u32,
        crop_w: cw,
        crop_h: ch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32) -> image::DynamicImage {
        image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            w,
            h,
            image::Rgba([40, 40, 40, 255]),
        ))
    }

    #[test]
    fn crop_is_centered_and_upscaled() {
        let crop = crop_around_point(&blank(1920, 1080), 960, 540, 200, 512).unwrap();
        assert_eq!((crop.origin_x, crop.origin_y), (860, 440));
        assert_eq!((crop.crop_w, crop.crop_h), (200, 200));
        let decoded = image::load_from_memory(&crop.image_bytes).unwrap();
        assert_eq!(decoded.width(), 512);
    }

    #[test]
    fn crop_is_clamped_at_edges() {
        let crop = crop_around_point(&blank(1920, 1080), 10, 10, 200, 0).unwrap();
        assert_eq!((crop.origin_x, crop.origin_y), (0, 0));
        assert_eq!((crop.crop_w, crop.crop_h), (110, 110));
    }

    #[test]
    fn center_outside_image_fails() {
        assert!(crop_around_point(&blank(100, 100), 150, 10, 50, 0).is_err());
    }
}
