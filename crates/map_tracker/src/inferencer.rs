//! Localization + rotation estimation from a single frame against the
//! cached map tiles and compass pointer template.

use std::time::Instant;

use image::RgbaImage;
use regex::Regex;

use crate::error::Result;
use crate::image_utils::{crop_centered, rotate, scale};
use crate::integral::IntegralImage;
use crate::map_cache::{filter_by_regex, MapCache};
use crate::ncc::{match_template, NeedleStats};
use crate::pose::{InferParam, Pose};

const LOC_CENTER_X: i64 = 108;
const LOC_CENTER_Y: i64 = 111;
const LOC_RADIUS: i64 = 40;

const ROT_CENTER_X: i64 = 108;
const ROT_CENTER_Y: i64 = 111;
const ROT_RADIUS: i64 = 12;

fn rot_step_for(precision: f64) -> i64 {
    if precision < 0.3 {
        12
    } else if precision < 0.6 {
        6
    } else {
        3
    }
}

/// Stateless over any single call: owns nothing but a reference to the
/// shared map cache, so many frames can be inferred concurrently if the
/// embedder wants to (the cache itself serializes scaled-set rebuilds).
pub struct Inferencer<'a> {
    cache: &'a MapCache,
}

impl<'a> Inferencer<'a> {
    pub fn new(cache: &'a MapCache) -> Self {
        Inferencer { cache }
    }

    pub fn infer(&self, frame: &RgbaImage, param: &InferParam) -> Result<Pose> {
        let name_regex = Regex::new(&param.map_name_regex)?;
        let loc_scale = param.precision.clamp(f64::MIN_POSITIVE, 1.0);

        let (loc_name, loc_x, loc_y, loc_conf, loc_time_ms) =
            self.infer_location(frame, loc_scale, &name_regex)?;

        if loc_name == "None" {
            return Ok(Pose {
                map_name: "None".to_string(),
                x: 0,
                y: 0,
                rot_deg: 0.0,
                loc_conf,
                rot_conf: 0.0,
                loc_time_ms,
                rot_time_ms: 0,
            });
        }

        let rot_step = rot_step_for(param.precision);
        let (rot_deg, rot_conf, rot_time_ms) = self.infer_rotation(frame, rot_step)?;

        Ok(Pose {
            map_name: loc_name,
            x: loc_x,
            y: loc_y,
            rot_deg,
            loc_conf,
            rot_conf,
            loc_time_ms,
            rot_time_ms,
        })
    }

    fn infer_location(
        &self,
        frame: &RgbaImage,
        loc_scale: f64,
        name_regex: &Regex,
    ) -> Result<(String, i64, i64, f64, u64)> {
        let start = Instant::now();

        let crop = crop_centered(frame, LOC_CENTER_X, LOC_CENTER_Y, LOC_RADIUS);
        let crop_w = crop.width() as f64;
        let needle = scale(&crop, loc_scale);

        let Some(needle_stats) = NeedleStats::compute(&needle) else {
            return Ok(("None".to_string(), 0, 0, 0.0, elapsed_ms(start)));
        };

        let result = self.cache.with_scaled(loc_scale, |tiles| {
            let matching = filter_by_regex(tiles, name_regex);
            let mut best: Option<(&str, (i64, i64), f64)> = None;
            for tile in matching {
                let m = match_template(&tile.image, &tile.integral, &needle, &needle_stats);
                let better = match &best {
                    Some((_, _, best_ncc)) => m.ncc > *best_ncc,
                    None => true,
                };
                if better {
                    let scaled_crop_w = crop_w * loc_scale;
                    let x = ((m.x as f64 + scaled_crop_w / 2.0) / loc_scale).round() as i64
                        + tile.offset.0;
                    let y = ((m.y as f64 + scaled_crop_w / 2.0) / loc_scale).round() as i64
                        + tile.offset.1;
                    best = Some((&tile.name, (x, y), m.ncc));
                }
            }
            best.map(|(name, (x, y), ncc)| (name.to_string(), x, y, ncc))
        })?;

        let elapsed = elapsed_ms(start);
        match result {
            Some((name, x, y, ncc)) => Ok((name, x, y, ncc, elapsed)),
            None => Ok(("None".to_string(), 0, 0, 0.0, elapsed)),
        }
    }

    fn infer_rotation(&self, frame: &RgbaImage, rot_step: i64) -> Result<(f64, f64, u64)> {
        let start = Instant::now();
        let crop = crop_centered(frame, ROT_CENTER_X, ROT_CENTER_Y, ROT_RADIUS);
        let pointer = self.cache.pointer()?;
        let Some(pointer_stats) = NeedleStats::compute(pointer) else {
            return Ok((0.0, 0.0, elapsed_ms(start)));
        };

        let mut best_angle = 0i64;
        let mut best_ncc = -1.0f64;
        let mut angle = 0i64;
        while angle < 360 {
            let rotated = rotate(&crop, angle as f64);
            let integral = IntegralImage::new(&rotated);
            let m = match_template(&rotated, &integral, pointer, &pointer_stats);
            if m.ncc > best_ncc {
                best_ncc = m.ncc;
                best_angle = angle;
            }
            angle += rot_step;
        }

        let rot_deg = ((360 - best_angle).rem_euclid(360)) as f64;
        Ok((rot_deg, best_ncc, elapsed_ms(start)))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::rot_step_for;

    #[test]
    fn rot_step_tiers() {
        assert_eq!(rot_step_for(0.1), 12);
        assert_eq!(rot_step_for(0.4), 6);
        assert_eq!(rot_step_for(0.9), 3);
    }
}
