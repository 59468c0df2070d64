//! End-to-end location inference against a synthetic 512x512 noise map,
//! exercising the full crop -> scale -> NCC -> coordinate-conversion path.

use image::{Rgba, RgbaImage};
use map_tracker::{InferParam, Inferencer, MapCache};

fn noise_tile(w: u32, h: u32, seed: u64) -> RgbaImage {
    let mut state = seed;
    let mut next = || {
        // xorshift64, deterministic across runs
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 256) as u8
    };
    let mut img = RgbaImage::new(w, h);
    for p in img.pixels_mut() {
        let v = next();
        *p = Rgba([v, v, v, 255]);
    }
    img
}

#[test]
fn locates_known_position_on_synthetic_map() {
    let dir = tempfile::tempdir().unwrap();
    let map_dir = dir.path().join("image/MapTracker/map");
    std::fs::create_dir_all(&map_dir).unwrap();

    let map = noise_tile(512, 512, 0xDEADBEEF);
    map.save(map_dir.join("map3_lv1.png")).unwrap();

    // The pointer template just needs usable (non-flat) variance; reuse a
    // small noise patch.
    let pointer_dir = dir.path().join("image/MapTracker");
    let pointer = noise_tile(25, 25, 12345);
    pointer.save(pointer_dir.join("pointer.png")).unwrap();

    let known_x = 200u32;
    let known_y = 220u32;
    let mut frame = RgbaImage::new(1280, 720);
    // Stamp the 81x81 neighborhood the inferencer crops at (108, 111) with
    // the map content centred at (known_x, known_y), so the localization
    // crop exactly matches that map region.
    for dy in -40i64..=40 {
        for dx in -40i64..=40 {
            let mx = known_x as i64 + dx;
            let my = known_y as i64 + dy;
            if mx < 0 || my < 0 || mx >= 512 || my >= 512 {
                continue;
            }
            let fx = 108 + dx;
            let fy = 111 + dy;
            if fx < 0 || fy < 0 || fx >= 1280 || fy >= 720 {
                continue;
            }
            frame.put_pixel(fx as u32, fy as u32, *map.get_pixel(mx as u32, my as u32));
        }
    }

    let cache = MapCache::new(Some(dir.path().to_path_buf()));
    let inferencer = Inferencer::new(&cache);
    let param = InferParam {
        map_name_regex: r"^map3_lv1$".to_string(),
        precision: 1.0,
        threshold: 0.0,
    };

    let pose = inferencer.infer(&frame, &param).expect("inference runs");
    assert_eq!(pose.map_name, "map3_lv1");
    assert!(
        (pose.x - known_x as i64).abs() <= 2,
        "x={} expected near {known_x}",
        pose.x
    );
    assert!(
        (pose.y - known_y as i64).abs() <= 2,
        "y={} expected near {known_y}",
        pose.y
    );
    assert!(pose.loc_conf > 0.99, "loc_conf={}", pose.loc_conf);
}
