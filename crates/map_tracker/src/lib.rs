//! Visual localization and closed-loop navigation over pre-rendered map
//! tiles: normalized cross-correlation template matching accelerated by
//! integral images, feeding a per-waypoint move controller.

pub mod actions;
pub mod controller;
pub mod error;
pub mod image_utils;
pub mod inferencer;
pub mod integral;
pub mod map_cache;
pub mod metrics;
pub mod ncc;
pub mod pose;

pub use actions::{vk, ActionWrapper, DeviceSurface};
pub use controller::{CachePoseSource, MoveController, PoseSource, TaskHost};
pub use error::{Error, Result};
pub use inferencer::Inferencer;
pub use map_cache::MapCache;
pub use pose::{InferParam, MoveParam, Pose};
