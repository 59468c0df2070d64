//! Per-waypoint closed-loop navigation: periodically re-infers pose,
//! steers rotation, walks/sprints, and guards against arrival, stuck, and
//! rotation timeouts.

use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::actions::{vk, ActionWrapper, DeviceSurface};
use crate::error::{Error, Result};
use crate::inferencer::Inferencer;
use crate::map_cache::MapCache;
use crate::pose::{InferParam, MoveParam, Pose};

/// Produces a [`Pose`] for a single frame, scoped to one map. The move
/// controller depends on this rather than on the inferencer and map cache
/// directly, the same way it depends on [`TaskHost`] rather than the real
/// task framework: the concrete NCC-backed inferencer is one
/// implementation, a simulated one (for tests and the demo harness) is
/// another.
pub trait PoseSource {
    fn infer(&self, frame: &RgbaImage, map_name: &str) -> Result<Pose>;
}

/// The production [`PoseSource`]: overrides precision/threshold/regex the
/// way the original move loop's internal inference calls do, regardless
/// of whatever parameters a direct `MapTrackerInfer` request might use.
pub struct CachePoseSource<'a> {
    cache: &'a MapCache,
}

impl<'a> CachePoseSource<'a> {
    pub fn new(cache: &'a MapCache) -> Self {
        CachePoseSource { cache }
    }
}

impl<'a> PoseSource for CachePoseSource<'a> {
    fn infer(&self, frame: &RgbaImage, map_name: &str) -> Result<Pose> {
        let infer_param = InferParam {
            map_name_regex: format!("^{}$", regex::escape(map_name)),
            precision: MOVE_PRECISION,
            threshold: MOVE_THRESHOLD,
        };
        let inferencer = Inferencer::new(self.cache);
        let pose = inferencer.infer(frame, &infer_param)?;
        if pose.map_name == "None" {
            return Err(Error::MapNotRecognized);
        }
        Ok(pose)
    }
}

pub const INFER_INTERVAL_MS: u64 = 200;
pub const ARRIVAL_TOLERANCE: f64 = 4.5;
pub const ROTATION_LOW_TOLERANCE: f64 = 8.0;
pub const ROTATION_HIGH_TOLERANCE: f64 = 60.0;
pub const ROTATION_SENSITIVITY: f64 = 2.0;
pub const STUCK_MIN_DURATION_MS: u64 = 1500;
pub const SPRINT_MIN_DISTANCE: f64 = 15.0;
pub const FAILURE_ARRIVAL_MAX_DURATION_MS: u64 = 60_000;
pub const FAILURE_ROTATION_MAX_DURATION_MS: u64 = 30_000;
pub const FAILURE_STUCK_MAX_DURATION_MS: u64 = 10_000;

const MOVE_PRECISION: f64 = 0.6;
const MOVE_THRESHOLD: f64 = 0.5;

const MSG_EMERGENCY_STOP: &str = "<p>emergency stop: navigation aborted</p>";

fn format_moving(tx: i64, ty: i64, initial_distance: f64) -> String {
    format!(
        "<p>navigating to ({tx}, {ty}), {} px away</p>",
        initial_distance.round() as i64
    )
}

fn format_finished(waypoint_count: usize) -> String {
    format!("<p>navigation finished: {waypoint_count} waypoint(s) reached</p>")
}

/// What the controller needs from the surrounding task framework: a way
/// to check/signal cancellation and a sink for human-readable progress.
pub trait TaskHost {
    fn stopping(&self) -> bool;
    fn post_stop(&self);
    fn post_ui(&self, html: &str);
}

/// Per-waypoint mutable state. `last_rotation_adjust_begin` unset means
/// "not currently correcting heading"; it is Some only while the most
/// recent tick plus every tick since has exceeded the low tolerance.
struct ControllerState {
    last_infer_time: Instant,
    last_rotation_adjust_begin: Option<Instant>,
    last_arrival_begin: Instant,
    prev_location: Option<(i64, i64)>,
    prev_location_time: Option<Instant>,
}

impl ControllerState {
    fn new(now: Instant) -> Self {
        ControllerState {
            last_infer_time: now,
            last_rotation_adjust_begin: None,
            last_arrival_begin: now,
            prev_location: None,
            prev_location_time: None,
        }
    }
}

pub struct MoveController<'a> {
    surface: &'a dyn DeviceSurface,
    host: &'a dyn TaskHost,
    poses: &'a dyn PoseSource,
}

impl<'a> MoveController<'a> {
    pub fn new(surface: &'a dyn DeviceSurface, host: &'a dyn TaskHost, poses: &'a dyn PoseSource) -> Self {
        MoveController {
            surface,
            host,
            poses,
        }
    }

    pub fn navigate(&self, param: &MoveParam) -> Result<()> {
        if param.targets.is_empty() {
            return Err(Error::ParamError("targets must not be empty".to_string()));
        }

        let actions = ActionWrapper::new(self.surface);

        for &target in &param.targets {
            let warm_up = self.infer_pose(param);
            let initial_distance = match &warm_up {
                Ok(pose) => distance((pose.x, pose.y), target),
                Err(e) => {
                    tracing::warn!(error = %e, "warm-up inference failed before waypoint");
                    0.0
                }
            };
            self.host
                .post_ui(&format_moving(target.0, target.1, initial_distance));
            self.run_waypoint(&actions, param, target, warm_up.ok())?;
        }

        self.host.post_ui(&format_finished(param.targets.len()));
        Ok(())
    }

    fn run_waypoint(
        &self,
        actions: &ActionWrapper,
        param: &MoveParam,
        target: (i64, i64),
        warm_up: Option<Pose>,
    ) -> Result<()> {
        let start = Instant::now();
        let mut state = ControllerState::new(start);
        let mut current: Option<Pose> = warm_up;
        if current.is_some() {
            state.last_infer_time = Instant::now();
        }

        loop {
            if self.host.stopping() {
                actions.key_up(vk::W, 100)?;
                return Err(Error::Cancelled);
            }

            let arrival_elapsed_ms = state.last_arrival_begin.elapsed().as_millis() as u64;
            if arrival_elapsed_ms > FAILURE_ARRIVAL_MAX_DURATION_MS {
                return self.emergency_stop(actions, Error::ArrivalTimeout(arrival_elapsed_ms));
            }

            let due_for_infer =
                state.last_infer_time.elapsed().as_millis() as u64 >= INFER_INTERVAL_MS;
            if due_for_infer || current.is_none() {
                match self.infer_pose(param) {
                    Ok(pose) => {
                        state.last_infer_time = Instant::now();
                        current = Some(pose);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "inference failed this tick");
                        actions.key_up(vk::W, 0)?;
                        continue;
                    }
                }
            }

            let Some(pose) = current.clone() else {
                continue;
            };

            // Stuck detection: if the reported location is pixel-identical
            // to the last sample, tap jump once the stuck window opens,
            // and abort if it persists too long.
            if let Some(prev) = state.prev_location {
                if prev == (pose.x, pose.y) {
                    let stuck_since = state.prev_location_time.unwrap_or(start);
                    let stuck_ms = stuck_since.elapsed().as_millis() as u64;
                    if stuck_ms > FAILURE_STUCK_MAX_DURATION_MS {
                        return self.emergency_stop(actions, Error::StuckTimeout(stuck_ms));
                    }
                    if stuck_ms > STUCK_MIN_DURATION_MS {
                        actions.key_type(vk::SPACE, 100, 100)?;
                    }
                } else {
                    state.prev_location = Some((pose.x, pose.y));
                    state.prev_location_time = Some(Instant::now());
                }
            } else {
                state.prev_location = Some((pose.x, pose.y));
                state.prev_location_time = Some(Instant::now());
            }

            let dist = distance((pose.x, pose.y), target);
            if dist < ARRIVAL_TOLERANCE {
                break;
            }

            let target_rotation = calc_target_rotation(pose.x, pose.y, target.0, target.1);
            let delta = calc_delta_rotation(pose.rot_deg, target_rotation);

            if delta.abs() > ROTATION_LOW_TOLERANCE {
                if state.last_rotation_adjust_begin.is_none() {
                    state.last_rotation_adjust_begin = Some(Instant::now());
                }
            } else {
                state.last_rotation_adjust_begin = None;
            }

            if let Some(begin) = state.last_rotation_adjust_begin {
                let rotation_elapsed_ms = begin.elapsed().as_millis() as u64;
                if rotation_elapsed_ms > FAILURE_ROTATION_MAX_DURATION_MS {
                    return self
                        .emergency_stop(actions, Error::RotationTimeout(rotation_elapsed_ms));
                }
            }

            if delta.abs() > ROTATION_HIGH_TOLERANCE {
                actions.key_up(vk::W, 0)?;
                actions.rotate_camera(delta * ROTATION_SENSITIVITY, 0.0, 100, 100)?;
                actions.key_down(vk::W, 0)?;
            } else if delta.abs() > ROTATION_LOW_TOLERANCE {
                actions.key_down(vk::W, 0)?;
                actions.rotate_camera(delta * ROTATION_SENSITIVITY, 0.0, 100, 0)?;
            } else {
                actions.key_down(vk::W, 0)?;
                if dist > SPRINT_MIN_DISTANCE {
                    actions.key_type(vk::SHIFT, 50, 0)?;
                }
            }

            std::thread::sleep(Duration::from_millis(
                INFER_INTERVAL_MS.saturating_sub(state.last_infer_time.elapsed().as_millis() as u64),
            ));
        }

        actions.key_up(vk::W, 0)?;
        Ok(())
    }

    fn infer_pose(&self, param: &MoveParam) -> Result<Pose> {
        self.surface.post_screencap_wait()?;
        let frame: RgbaImage = self.surface.cache_image()?;
        self.poses.infer(&frame, &param.map_name)
    }

    fn emergency_stop(&self, actions: &ActionWrapper, err: Error) -> Result<()> {
        tracing::warn!(error = %err, "emergency stop");
        self.host.post_ui(MSG_EMERGENCY_STOP);
        actions.key_up(vk::W, 100)?;
        self.host.post_stop();
        Err(err)
    }
}

fn distance(a: (i64, i64), b: (i64, i64)) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Clockwise heading (0 = north, negative Y is forward) from `(from_x,
/// from_y)` toward `(to_x, to_y)`, normalized to `[0, 360)`.
pub fn calc_target_rotation(from_x: i64, from_y: i64, to_x: i64, to_y: i64) -> f64 {
    let dx = (to_x - from_x) as f64;
    let dy = (to_y - from_y) as f64;
    let deg = dx.atan2(-dy).to_degrees();
    ((deg % 360.0) + 360.0) % 360.0
}

/// Shortest signed rotation from `current` to `target`, normalized to
/// `(-180, 180]`.
pub fn calc_delta_rotation(current: f64, target: f64) -> f64 {
    let mut diff = target - current;
    while diff > 180.0 {
        diff -= 360.0;
    }
    while diff <= -180.0 {
        diff += 360.0;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_rotation_cardinal_directions() {
        assert_eq!(calc_target_rotation(10, 10, 10, 0).round(), 0.0);
        assert_eq!(calc_target_rotation(10, 10, 20, 10).round(), 90.0);
    }

    #[test]
    fn delta_rotation_wraps_shortest_way() {
        assert_eq!(calc_delta_rotation(350.0, 10.0).round(), 20.0);
        assert_eq!(calc_delta_rotation(10.0, 350.0).round(), -20.0);
    }

    struct StubSurface {
        w_presses: std::sync::atomic::AtomicU32,
        w_releases: std::sync::atomic::AtomicU32,
    }

    impl StubSurface {
        fn new() -> Self {
            StubSurface {
                w_presses: std::sync::atomic::AtomicU32::new(0),
                w_releases: std::sync::atomic::AtomicU32::new(0),
            }
        }
    }

    impl DeviceSurface for StubSurface {
        fn post_screencap_wait(&self) -> Result<()> {
            Ok(())
        }
        fn cache_image(&self) -> Result<RgbaImage> {
            Ok(RgbaImage::new(1, 1))
        }
        fn press_key(&self, code: u16, _duration_ms: u64) -> Result<()> {
            if code == vk::W {
                self.w_presses.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            Ok(())
        }
        fn release_key(&self, code: u16) -> Result<()> {
            if code == vk::W {
                self.w_releases.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            Ok(())
        }
        fn move_mouse_relative(&self, _dx: f64, _dy: f64, _duration_ms: u64) -> Result<()> {
            Ok(())
        }
    }

    struct StubHost {
        stop: std::sync::atomic::AtomicBool,
        stops_posted: std::sync::atomic::AtomicU32,
    }

    impl StubHost {
        fn new(stop: bool) -> Self {
            StubHost {
                stop: std::sync::atomic::AtomicBool::new(stop),
                stops_posted: std::sync::atomic::AtomicU32::new(0),
            }
        }
    }

    impl TaskHost for StubHost {
        fn stopping(&self) -> bool {
            self.stop.load(std::sync::atomic::Ordering::SeqCst)
        }
        fn post_stop(&self) {
            self.stops_posted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        fn post_ui(&self, _html: &str) {}
    }

    struct FixedPoseSource {
        pose: Pose,
    }

    impl PoseSource for FixedPoseSource {
        fn infer(&self, _frame: &RgbaImage, _map_name: &str) -> Result<Pose> {
            Ok(self.pose.clone())
        }
    }

    fn fixed_pose(x: i64, y: i64) -> Pose {
        Pose {
            map_name: "map1_lv1".to_string(),
            x,
            y,
            rot_deg: 0.0,
            loc_conf: 0.9,
            rot_conf: 0.9,
            loc_time_ms: 1,
            rot_time_ms: 1,
        }
    }

    #[test]
    fn navigate_completes_immediately_when_already_at_target() {
        let surface = StubSurface::new();
        let host = StubHost::new(false);
        let poses = FixedPoseSource {
            pose: fixed_pose(10, 10),
        };
        let controller = MoveController::new(&surface, &host, &poses);
        let param = MoveParam {
            map_name: "map1_lv1".to_string(),
            targets: vec![(10, 10)],
        };
        assert!(controller.navigate(&param).is_ok());
        assert_eq!(
            surface.w_releases.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn navigate_honors_preexisting_cancellation() {
        let surface = StubSurface::new();
        let host = StubHost::new(true);
        let poses = FixedPoseSource {
            pose: fixed_pose(0, 0),
        };
        let controller = MoveController::new(&surface, &host, &poses);
        let param = MoveParam {
            map_name: "map1_lv1".to_string(),
            targets: vec![(100, 100)],
        };
        let result = controller.navigate(&param);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(
            surface.w_releases.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        // Plain cancellation releases W and returns, but it is not an
        // emergency stop: it must not signal a global stop.
        assert_eq!(
            host.stops_posted.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }
}
