//! Zero-mean normalized cross-correlation, backed by integral images so a
//! haystack of any size can be searched without recomputing per-window
//! statistics from scratch.

use image::RgbaImage;

use crate::image_utils::luminance;
use crate::integral::IntegralImage;

/// Denominator below this is treated as a degenerate (flat) window: any
/// NCC computed against it is meaningless and skipped.
const DENOM_EPSILON: f64 = 1e-6;

/// Precomputed needle statistics, reused across every haystack window so
/// the needle's own mean/variance are only computed once per search.
#[derive(Debug, Clone, Copy)]
pub struct NeedleStats {
    pub sum: f64,
    pub sum_sq: f64,
    pub count: f64,
    pub denom: f64,
}

impl NeedleStats {
    /// Returns `None` if the needle is degenerate (uniform luminance),
    /// matching the "skip, no usable signal" contract of the matcher.
    pub fn compute(needle: &RgbaImage) -> Option<Self> {
        let (w, h) = (needle.width() as usize, needle.height() as usize);
        let count = (w * h) as f64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for y in 0..h as u32 {
            for x in 0..w as u32 {
                let l = luminance(needle.get_pixel(x, y));
                sum += l;
                sum_sq += l * l;
            }
        }
        let variance = sum_sq - sum * sum / count;
        let denom = (variance.max(0.0)).sqrt();
        if denom < DENOM_EPSILON {
            return None;
        }
        Some(NeedleStats {
            sum,
            sum_sq,
            count,
            denom,
        })
    }
}

/// Best match found by sliding `needle` over `haystack`. `ncc` is in
/// `[-1, 1]`; `-1.0` means no window had usable variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub x: u32,
    pub y: u32,
    pub ncc: f64,
}

/// Slide a needle of size `nw x nh` over `haystack` (whose integral image
/// and luminance buffer are provided), returning the best-scoring
/// position. Ties break to the smaller `y`, then the smaller `x`, which is
/// the scan order below, so a strict `>` update already implements it.
pub fn match_template(
    haystack: &RgbaImage,
    haystack_integral: &IntegralImage,
    needle: &RgbaImage,
    needle_stats: &NeedleStats,
) -> MatchResult {
    let (nw, nh) = (needle.width() as usize, needle.height() as usize);
    let (hw, hh) = (haystack.width() as usize, haystack.height() as usize);

    let mut best = MatchResult {
        x: 0,
        y: 0,
        ncc: -1.0,
    };

    if nw == 0 || nh == 0 || nw > hw || nh > hh {
        return best;
    }

    let count = needle_stats.count;

    for y0 in 0..=(hh - nh) {
        let y1 = y0 + nh;
        for x0 in 0..=(hw - nw) {
            let x1 = x0 + nw;
            let win_sum = haystack_integral.window_sum(x0, y0, x1, y1);
            let win_sum_sq = haystack_integral.window_sum_sq(x0, y0, x1, y1);
            let win_variance = win_sum_sq - win_sum * win_sum / count;
            let win_denom = win_variance.max(0.0).sqrt();
            if win_denom < DENOM_EPSILON {
                continue;
            }

            let mut cross = 0.0;
            for dy in 0..nh as u32 {
                for dx in 0..nw as u32 {
                    let hp = haystack.get_pixel(x0 as u32 + dx, y0 as u32 + dy);
                    let np = needle.get_pixel(dx, dy);
                    cross += luminance(hp) * luminance(np);
                }
            }

            let numerator = cross - win_sum * needle_stats.sum / count;
            let ncc = numerator / (win_denom * needle_stats.denom);

            if ncc > best.ncc {
                best = MatchResult {
                    x: x0 as u32,
                    y: y0 as u32,
                    ncc,
                };
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gray(w: u32, h: u32, f: impl Fn(u32, u32) -> u8) -> RgbaImage {
        let mut img = RgbaImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let v = f(x, y);
                img.put_pixel(x, y, Rgba([v, v, v, 255]));
            }
        }
        img
    }

    #[test]
    fn self_match_scores_one() {
        let needle = gray(6, 6, |x, y| ((x * 7 + y * 13) % 200) as u8);
        let haystack = gray(20, 20, |x, y| {
            if x < 6 && y < 6 {
                ((x * 7 + y * 13) % 200) as u8
            } else {
                ((x + y * 3) % 200) as u8
            }
        });
        let stats = NeedleStats::compute(&needle).unwrap();
        let integral = IntegralImage::new(&haystack);
        let result = match_template(&haystack, &integral, &needle, &stats);
        assert_eq!((result.x, result.y), (0, 0));
        assert!((result.ncc - 1.0).abs() < 1e-6, "ncc={}", result.ncc);
    }

    #[test]
    fn brightness_offset_is_invariant() {
        let needle = gray(6, 6, |x, y| ((x * 7 + y * 13) % 200) as u8);
        let brighter = gray(6, 6, |x, y| {
            (((x * 7 + y * 13) % 200) as u8).saturating_add(30)
        });
        let haystack = gray(20, 20, |x, y| {
            if x < 6 && y < 6 {
                (((x * 7 + y * 13) % 200) as u8).saturating_add(30)
            } else {
                ((x * 3 + y) % 200) as u8
            }
        });
        let stats = NeedleStats::compute(&needle).unwrap();
        let integral = IntegralImage::new(&haystack);
        let result = match_template(&haystack, &integral, &brighter, &stats);
        assert!(result.ncc > 0.99, "ncc={}", result.ncc);
    }

    #[test]
    fn degenerate_needle_is_rejected() {
        let flat = gray(4, 4, |_, _| 128);
        assert!(NeedleStats::compute(&flat).is_none());
    }
}
