//! RGBA raster helpers: centred crop, bilinear scale, rotation about centre.

use image::{Rgba, RgbaImage};

/// Luminance weights (ITU-R BT.601), matching the integral image's channel.
#[inline]
pub fn luminance(p: &Rgba<u8>) -> f64 {
    0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64
}

/// Crop a `(2r+1) x (2r+1)` square centred at `(cx, cy)`, clamped to the
/// source bounds. The returned image is always `(2r+1) x (2r+1)`; pixels
/// that would fall outside `img` are filled transparent black.
pub fn crop_centered(img: &RgbaImage, cx: i64, cy: i64, r: i64) -> RgbaImage {
    let side = (2 * r + 1) as u32;
    let mut out = RgbaImage::new(side, side);
    let (w, h) = (img.width() as i64, img.height() as i64);
    for oy in 0..side as i64 {
        let sy = cy - r + oy;
        if sy < 0 || sy >= h {
            continue;
        }
        for ox in 0..side as i64 {
            let sx = cx - r + ox;
            if sx < 0 || sx >= w {
                continue;
            }
            out.put_pixel(ox as u32, oy as u32, *img.get_pixel(sx as u32, sy as u32));
        }
    }
    out
}

/// Bilinear-resample `img` by factor `s`. `s == 1.0` returns a clone of the
/// input unchanged (no resampling error introduced by a no-op resize).
pub fn scale(img: &RgbaImage, s: f64) -> RgbaImage {
    if (s - 1.0).abs() < f64::EPSILON {
        return img.clone();
    }
    let (sw, sh) = (img.width() as f64, img.height() as f64);
    let dw = ((sw * s).round() as u32).max(1);
    let dh = ((sh * s).round() as u32).max(1);
    let mut out = RgbaImage::new(dw, dh);
    let x_ratio = sw / dw as f64;
    let y_ratio = sh / dh as f64;
    for dy in 0..dh {
        let sy = (dy as f64 + 0.5) * y_ratio - 0.5;
        for dx in 0..dw {
            let sx = (dx as f64 + 0.5) * x_ratio - 0.5;
            out.put_pixel(dx, dy, sample_bilinear(img, sx, sy));
        }
    }
    out
}

/// Rotate `img` clockwise by `theta_deg` about its own centre. Output has
/// the same dimensions as the input; uncovered pixels are transparent
/// black. Uses inverse mapping (each destination pixel samples the source)
/// so the output is fully populated with no gaps.
pub fn rotate(img: &RgbaImage, theta_deg: f64) -> RgbaImage {
    let (w, h) = (img.width(), img.height());
    let mut out = RgbaImage::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }
    let cx = (w as f64 - 1.0) / 2.0;
    let cy = (h as f64 - 1.0) / 2.0;
    let theta = theta_deg.to_radians();
    // Destination samples source, so we rotate by -theta to find the
    // source coordinate that maps onto this destination pixel under a
    // clockwise rotation of the image by theta.
    let (sin_t, cos_t) = (-theta).sin_cos();
    for dy in 0..h {
        for dx in 0..w {
            let rx = dx as f64 - cx;
            let ry = dy as f64 - cy;
            let sx = rx * cos_t - ry * sin_t + cx;
            let sy = rx * sin_t + ry * cos_t + cy;
            if sx < 0.0 || sy < 0.0 || sx > (w - 1) as f64 || sy > (h - 1) as f64 {
                continue;
            }
            out.put_pixel(dx, dy, sample_bilinear(img, sx, sy));
        }
    }
    out
}

fn sample_bilinear(img: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = x0 + 1;
    let y1 = y0 + 1;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let get = |px: i64, py: i64| -> [f64; 4] {
        if px < 0 || py < 0 || px >= w || py >= h {
            [0.0; 4]
        } else {
            let p = img.get_pixel(px as u32, py as u32);
            [p[0] as f64, p[1] as f64, p[2] as f64, p[3] as f64]
        }
    };

    let c00 = get(x0, y0);
    let c10 = get(x1, y0);
    let c01 = get(x0, y1);
    let c11 = get(x1, y1);

    let mut out = [0u8; 4];
    for i in 0..4 {
        let top = c00[i] * (1.0 - fx) + c10[i] * fx;
        let bot = c01[i] * (1.0 - fx) + c11[i] * fx;
        out[i] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_identity_is_clone() {
        let mut img = RgbaImage::new(4, 4);
        img.put_pixel(1, 1, Rgba([10, 20, 30, 255]));
        let scaled = scale(&img, 1.0);
        assert_eq!(scaled, img);
    }

    #[test]
    fn crop_centered_clamps_and_pads() {
        let mut img = RgbaImage::new(4, 4);
        img.put_pixel(0, 0, Rgba([5, 5, 5, 255]));
        let cropped = crop_centered(&img, 0, 0, 1);
        assert_eq!(cropped.dimensions(), (3, 3));
        assert_eq!(*cropped.get_pixel(1, 1), Rgba([5, 5, 5, 255]));
        assert_eq!(*cropped.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn rotate_full_turn_is_identity() {
        let mut img = RgbaImage::new(5, 5);
        img.put_pixel(3, 2, Rgba([1, 2, 3, 255]));
        let rotated = rotate(&img, 360.0);
        assert_eq!(rotated.get_pixel(3, 2)[0], 1);
    }
}
