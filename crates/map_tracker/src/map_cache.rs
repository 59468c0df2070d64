//! Process-wide cache of map tiles and the compass pointer template.
//!
//! Both the map set and the pointer are loaded at most once per process,
//! memoizing failure as well as success: a missing resource directory
//! fails every subsequent lookup without touching the filesystem again,
//! and is logged only the first time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use image::RgbaImage;
use regex::Regex;

use crate::error::{Error, Result};
use crate::image_utils::scale;
use crate::integral::IntegralImage;

pub const MAP_DIR: &str = "image/MapTracker/map";
pub const POINTER_PATH: &str = "image/MapTracker/pointer.png";
const MAP_RECT_FILE: &str = "map_rect.json";

/// One named map tile: its raster, the integral image over that raster,
/// and the offset to translate match coordinates back into the original
/// (uncropped) map's coordinate space.
pub struct MapTile {
    pub name: String,
    pub image: RgbaImage,
    pub offset: (i64, i64),
    pub integral: IntegralImage,
}

impl MapTile {
    fn from_image(name: String, image: RgbaImage, offset: (i64, i64)) -> Self {
        let integral = IntegralImage::new(&image);
        MapTile {
            name,
            image,
            offset,
            integral,
        }
    }
}

struct ScaledEntry {
    scale: f64,
    tiles: Vec<MapTile>,
}

/// Searches, in order, a caller-supplied cache directory, the directory
/// containing the running executable, and the current working directory,
/// returning the first existing path for `relative`.
pub fn resolve_resource_path(relative: &str, cache_dir: Option<&Path>) -> Option<PathBuf> {
    let candidates = [
        cache_dir.map(|d| d.join(relative)),
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join(relative))),
        std::env::current_dir().ok().map(|d| d.join(relative)),
    ];
    candidates.into_iter().flatten().find(|p| p.exists())
}

pub struct MapCache {
    cache_dir: Option<PathBuf>,
    maps: OnceLock<std::result::Result<Vec<MapTile>, String>>,
    pointer: OnceLock<std::result::Result<RgbaImage, String>>,
    scaled: Mutex<Option<ScaledEntry>>,
}

impl MapCache {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        MapCache {
            cache_dir,
            maps: OnceLock::new(),
            pointer: OnceLock::new(),
            scaled: Mutex::new(None),
        }
    }

    /// Original-resolution map tiles, loaded on first use.
    pub fn maps(&self) -> Result<&[MapTile]> {
        let result = self.maps.get_or_init(|| match load_maps(self.cache_dir.as_deref()) {
            Ok(tiles) => Ok(tiles),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load map tiles");
                Err(e.to_string())
            }
        });
        result
            .as_deref()
            .map_err(|e| Error::ResourceMissing(e.clone()))
    }

    /// The compass pointer template, loaded on first use.
    pub fn pointer(&self) -> Result<&RgbaImage> {
        let result = self.pointer.get_or_init(|| {
            match load_pointer(self.cache_dir.as_deref()) {
                Ok(img) => Ok(img),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load pointer template");
                    Err(e.to_string())
                }
            }
        });
        result.as_ref().map_err(|e| Error::ResourceMissing(e.clone()))
    }

    /// Recomputes the scaled tile set if `target_scale` doesn't match
    /// whatever is currently cached, then hands the (possibly just
    /// rebuilt) tiles to `f` while the cache lock is held. Replacement is
    /// a single atomic swap of the whole list, matching the single-entry
    /// `ScaledCache` contract: readers never see a partially-updated set.
    pub fn with_scaled<F, R>(&self, target_scale: f64, f: F) -> Result<R>
    where
        F: FnOnce(&[MapTile]) -> R,
    {
        let maps = self.maps()?;
        let mut guard = self.scaled.lock().expect("scaled cache mutex poisoned");

        let needs_rebuild = match guard.as_ref() {
            Some(entry) => (entry.scale - target_scale).abs() > f64::EPSILON,
            None => true,
        };

        if needs_rebuild {
            let tiles: Vec<MapTile> = maps
                .iter()
                .map(|tile| {
                    let scaled_image = scale(&tile.image, target_scale);
                    MapTile::from_image(tile.name.clone(), scaled_image, tile.offset)
                })
                .collect();
            *guard = Some(ScaledEntry {
                scale: target_scale,
                tiles,
            });
        }

        Ok(f(&guard.as_ref().expect("just populated").tiles))
    }
}

fn load_maps(cache_dir: Option<&Path>) -> Result<Vec<MapTile>> {
    let dir = resolve_resource_path(MAP_DIR, cache_dir)
        .ok_or_else(|| Error::ResourceMissing(format!("map directory `{MAP_DIR}` not found")))?;

    let rects = load_map_rects(&dir);

    let mut tiles = Vec::new();
    let entries = std::fs::read_dir(&dir)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !ext.eq_ignore_ascii_case("png") {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string();
        let name = stem.strip_suffix("_merged").unwrap_or(&stem).to_string();

        let image = match image::open(&path) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping corrupt map tile");
                continue;
            }
        };

        let (image, offset) = match rects.get(&name) {
            Some(&[x0, y0, x1, y1]) => {
                let (x0, y0) = (x0.max(0) as u32, y0.max(0) as u32);
                let (x1, y1) = (
                    (x1 as u32).min(image.width()),
                    (y1 as u32).min(image.height()),
                );
                let cropped = image::imageops::crop_imm(&image, x0, y0, x1 - x0, y1 - y0)
                    .to_image();
                (cropped, (x0 as i64, y0 as i64))
            }
            None => (image, (0, 0)),
        };

        tiles.push(MapTile::from_image(name, image, offset));
    }

    if tiles.is_empty() {
        return Err(Error::ResourceMissing(format!(
            "map directory `{}` has no usable PNG tiles",
            dir.display()
        )));
    }

    Ok(tiles)
}

fn load_map_rects(dir: &Path) -> HashMap<String, [i64; 4]> {
    let path = dir.join(MAP_RECT_FILE);
    if !path.exists() {
        return HashMap::new();
    }
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read map_rect.json, ignoring crop rectangles");
            return HashMap::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(rects) => rects,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "malformed map_rect.json, ignoring crop rectangles");
            HashMap::new()
        }
    }
}

fn load_pointer(cache_dir: Option<&Path>) -> Result<RgbaImage> {
    let path = resolve_resource_path(POINTER_PATH, cache_dir).ok_or_else(|| {
        Error::ResourceMissing(format!("pointer template `{POINTER_PATH}` not found"))
    })?;
    let img = image::open(&path)?;
    Ok(img.to_rgba8())
}

/// Maps currently cached at `scale`, filtered by `name_regex`.
pub fn filter_by_regex<'a>(tiles: &'a [MapTile], name_regex: &Regex) -> Vec<&'a MapTile> {
    tiles
        .iter()
        .filter(|t| name_regex.is_match(&t.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn write_png(path: &Path, w: u32, h: u32, fill: Rgba<u8>) {
        let mut img = RgbaImage::new(w, h);
        for p in img.pixels_mut() {
            *p = fill;
        }
        img.save(path).expect("write fixture png");
    }

    #[test]
    fn loads_tiles_and_strips_merged_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let map_dir = dir.path().join(MAP_DIR);
        std::fs::create_dir_all(&map_dir).unwrap();
        write_png(
            &map_dir.join("map1_lv1_merged.png"),
            16,
            16,
            Rgba([10, 10, 10, 255]),
        );
        write_png(
            &map_dir.join("map2_lv3.png"),
            16,
            16,
            Rgba([20, 20, 20, 255]),
        );

        let cache = MapCache::new(Some(dir.path().to_path_buf()));
        let tiles = cache.maps().expect("load succeeds");
        let mut names: Vec<_> = tiles.iter().map(|t| t.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["map1_lv1", "map2_lv3"]);
    }

    #[test]
    fn map_rect_crops_and_records_offset() {
        let dir = tempfile::tempdir().unwrap();
        let map_dir = dir.path().join(MAP_DIR);
        std::fs::create_dir_all(&map_dir).unwrap();
        write_png(&map_dir.join("map9_lv1.png"), 40, 40, Rgba([1, 1, 1, 255]));
        std::fs::write(
            map_dir.join("map_rect.json"),
            r#"{"map9_lv1": [5, 5, 25, 25]}"#,
        )
        .unwrap();

        let cache = MapCache::new(Some(dir.path().to_path_buf()));
        let tiles = cache.maps().expect("load succeeds");
        let tile = tiles.iter().find(|t| t.name == "map9_lv1").unwrap();
        assert_eq!(tile.image.dimensions(), (20, 20));
        assert_eq!(tile.offset, (5, 5));
    }

    #[test]
    fn malformed_map_rect_is_ignored_with_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let map_dir = dir.path().join(MAP_DIR);
        std::fs::create_dir_all(&map_dir).unwrap();
        write_png(&map_dir.join("map9_lv1.png"), 40, 40, Rgba([1, 1, 1, 255]));
        std::fs::write(map_dir.join("map_rect.json"), "{ not valid json").unwrap();

        let cache = MapCache::new(Some(dir.path().to_path_buf()));
        let tiles = cache.maps().expect("malformed rect file doesn't fail the load");
        let tile = tiles.iter().find(|t| t.name == "map9_lv1").unwrap();
        assert_eq!(tile.image.dimensions(), (40, 40));
        assert_eq!(tile.offset, (0, 0));
    }

    #[test]
    fn missing_directory_is_resource_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MapCache::new(Some(dir.path().to_path_buf()));
        let err = cache.maps().unwrap_err();
        assert!(matches!(err, Error::ResourceMissing(_)));
        // Second call must memoize the failure without touching the fs.
        let err2 = cache.maps().unwrap_err();
        assert!(matches!(err2, Error::ResourceMissing(_)));
    }
}
