//! Arrow-pointer overlay for frames captured without the cursor.

/// Draw an arrow cursor with its tip at `(x, y)`. `scale` multiplies the
/// 12×19 px base size for high-DPI frames.
pub fn draw_cursor(canvas: &mut image::RgbaImage, x: u32, y: u32, scale: u32) {
    let scale = scale.max(1);
    let height = 19 * scale;
    let (w, h) = canvas.dimensions();

    for dy in 0..height {
        // The arrow widens by one pixel every two rows, capped at 12.
        let row_w = ((dy / scale) / 2 + 1).min(12) * scale;
        for dx in 0..row_w {
            let px = x + dx;
            let py = y + dy;
            if px >= w || py >= h {
                continue;
            }
            let edge = dx < scale || dx + scale >= row_w || dy + scale >= height;
            let col = if edge { [0, 0, 0, 255] } else { [255, 255, 255, 255] };
            canvas.put_pixel(px, py, image::Rgba(col));
        }
    }
}
