//! Draws detected element boxes and their `~N` labels onto a screenshot.
use crate::errors::OperatorResult;
use crate::perception::types::LabelMap;

const BOX_COLOUR: [u8; 4] = [255, 40, 40, 220];
const LABEL_COLOUR: [u8; 4] = [255, 230, 0, 255];

/// Annotate `src_bytes` (JPEG/PNG) with one box and label per LabelMap entry.
/// Returns PNG-encoded bytes.
///
/// On high-resolution images (width > 1600) labels are drawn at 2× so they
/// remain readable after the provider downsamples the image.
pub fn annotate_image(src_bytes: &[u8], labels: &LabelMap) -> OperatorResult<Vec<u8>> {
    let img = image::load_from_memory(src_bytes)?;
    let mut canvas = img.to_rgba8();
    let (w, _) = canvas.dimensions();

    let label_scale: u32 = if w > 1600 { 2 } else { 1 };
    let box_thickness: i32 = if w > 1600 { 3 } else { 2 };

    for (label, bbox) in labels.iter() {
        let x1 = bbox.min_x.round() as i32;
        let y1 = bbox.min_y.round() as i32;
        let x2 = bbox.max_x.round() as i32;
        let y2 = bbox.max_y.round() as i32;

        draw_rect(&mut canvas, x1, y1, x2, y2, BOX_COLOUR, box_thickness);

        let label_h_px = (5 * label_scale + 4 * label_scale) as i32;
        draw_label_bg(&mut canvas, x1.max(0), (y1 - label_h_px).max(0), label, label_scale);
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)?;
    Ok(out)
}

/// Text listing of labels for the prompt, e.g. `~1 at (12%, 40%)`.
pub fn build_label_list(labels: &LabelMap) -> String {
    if labels.is_empty() {
        return "No UI elements detected.".to_string();
    }
    let w = labels.image_width.max(1) as f32;
    let h = labels.image_height.max(1) as f32;
    let mut lines = vec!["Detected elements:".to_string()];
    for (label, bbox) in labels.iter() {
        let (cx, cy) = bbox.center();
        lines.push(format!(
            "  - {label} at ({:.0}%, {:.0}%)",
            cx / w * 100.0,
            cy / h * 100.0
        ));
    }
    lines.join("\n")
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_rect(
    canvas: &mut image::RgbaImage,
    x1: i32, y1: i32, x2: i32, y2: i32,
    col: [u8; 4],
    thickness: i32,
) {
    let (w, h) = canvas.dimensions();
    let (iw, ih) = (w as i32, h as i32);

    for t in 0..thickness {
        let ty = y1 + t;
        let by = y2 - t;
        for x in x1..=x2 {
            if x >= 0 && x < iw {
                if ty >= 0 && ty < ih { set_pixel(canvas, x as u32, ty as u32, col); }
                if by >= 0 && by < ih { set_pixel(canvas, x as u32, by as u32, col); }
            }
        }
    }
    for t in 0..thickness {
        let lx = x1 + t;
        let rx = x2 - t;
        for y in y1..=y2 {
            if y >= 0 && y < ih {
                if lx >= 0 && lx < iw { set_pixel(canvas, lx as u32, y as u32, col); }
                if rx >= 0 && rx < iw { set_pixel(canvas, rx as u32, y as u32, col); }
            }
        }
    }
}

fn draw_label_bg(canvas: &mut image::RgbaImage, x: i32, y: i32, text: &str, scale: u32) {
    let (w, h) = canvas.dimensions();
    let step = 5 * scale + scale;
    let pad = 2 * scale;
    let label_w = text.chars().count() as u32 * step + pad * 2;
    let label_h = 5 * scale + pad * 2;

    for dy in 0..label_h {
        for dx in 0..label_w {
            let px = x as u32 + dx;
            let py = y as u32 + dy;
            if px < w && py < h {
                set_pixel(canvas, px, py, [0, 0, 0, 200]);
            }
        }
    }

    let text_x = x as u32 + pad;
    let text_y = y as u32 + pad;
    for (i, c) in text.chars().enumerate() {
        let gx = text_x + i as u32 * step;
        if gx + 5 * scale >= w {
            break;
        }
        draw_glyph(canvas, c, gx, text_y, scale);
    }
}

fn draw_glyph(canvas: &mut image::RgbaImage, c: char, px: u32, py: u32, scale: u32) {
    let glyph = match c {
        '0'..='9' => DIGITS[(c as u8 - b'0') as usize],
        '~' => [0b00000, 0b01000, 0b10101, 0b00010, 0b00000],
        _ => return,
    };
    let (w, h) = canvas.dimensions();
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 { continue; }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + bit * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        set_pixel(canvas, x, y, LABEL_COLOUR);
                    }
                }
            }
        }
    }
}

fn set_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

/// 5×5 bitmap digits; bit4 is the leftmost pixel.
const DIGITS: [[u8; 5]; 10] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::BoundingBox;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(w, h, image::Rgba([255; 4])))
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn boxes_are_drawn() {
        let mut labels = LabelMap::new(100, 100);
        labels.insert("~1", BoundingBox { min_x: 20.0, min_y: 40.0, max_x: 60.0, max_y: 80.0 });
        let out = annotate_image(&png(100, 100), &labels).unwrap();
        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        // Box edge is tinted red, interior stays white.
        assert_ne!(img.get_pixel(40, 80).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(40, 60).0, [255, 255, 255, 255]);
    }

    #[test]
    fn label_list_reports_centers_in_percent() {
        let mut labels = LabelMap::new(200, 100);
        labels.insert("~7", BoundingBox { min_x: 0.0, min_y: 0.0, max_x: 100.0, max_y: 50.0 });
        assert!(build_label_list(&labels).contains("~7 at (25%, 25%)"));
        assert_eq!(build_label_list(&LabelMap::new(1, 1)), "No UI elements detected.");
    }
}
