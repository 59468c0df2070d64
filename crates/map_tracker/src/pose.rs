//! Wire-format types exchanged with the task host: the inferencer's
//! result and the move controller's input parameters.

use serde::{Deserialize, Serialize};

/// Result of one localization + rotation pass over a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub map_name: String,
    pub x: i64,
    pub y: i64,
    /// Clockwise heading in degrees, `0 <= rot_deg < 360`.
    pub rot_deg: f64,
    /// Location match confidence in `[-1, 1]`.
    pub loc_conf: f64,
    /// Rotation match confidence in `[-1, 1]`.
    pub rot_conf: f64,
    pub loc_time_ms: u64,
    pub rot_time_ms: u64,
}

impl Pose {
    /// Sentinel returned when localization could not even attempt a match
    /// (e.g. degenerate needle). Mirrors the original's `"None"` map name.
    pub fn none() -> Self {
        Pose {
            map_name: "None".to_string(),
            x: 0,
            y: 0,
            rot_deg: 0.0,
            loc_conf: 0.0,
            rot_conf: 0.0,
            loc_time_ms: 0,
            rot_time_ms: 0,
        }
    }

    pub fn is_hit(&self, threshold: f64) -> bool {
        self.loc_conf > threshold && self.rot_conf > threshold
    }
}

/// Parameters for a `MapTrackerInfer` recognition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferParam {
    pub map_name_regex: String,
    pub precision: f64,
    pub threshold: f64,
}

impl Default for InferParam {
    fn default() -> Self {
        InferParam {
            map_name_regex: r"^map\d+_lv\d+$".to_string(),
            precision: 0.4,
            threshold: 0.5,
        }
    }
}

/// Parameters for a `MapTrackerMove` action request: the map the targets
/// are defined on, and the ordered waypoint list in that map's world
/// coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveParam {
    pub map_name: String,
    pub targets: Vec<(i64, i64)>,
}
