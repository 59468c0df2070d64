//! Thin synchronous façade over the device surface for the handful of
//! input primitives the move controller needs.

use std::time::Duration;

use image::RgbaImage;

use crate::error::Result;

pub mod vk {
    pub const W: u16 = 0x57;
    pub const A: u16 = 0x41;
    pub const S: u16 = 0x53;
    pub const D: u16 = 0x44;
    pub const SHIFT: u16 = 0x10;
    pub const CTRL: u16 = 0x11;
    pub const ALT: u16 = 0x12;
    pub const SPACE: u16 = 0x20;
}

/// Everything the action wrapper and inferencer need from whatever is
/// actually driving the game client. A real implementation posts to a
/// capture/injection backend; tests and the demo harness can implement it
/// in-process.
pub trait DeviceSurface {
    /// Requests a fresh screen capture and blocks until it lands.
    fn post_screencap_wait(&self) -> Result<()>;
    /// Returns the most recently captured frame.
    fn cache_image(&self) -> Result<RgbaImage>;
    /// Presses `code` and holds it for `duration_ms`, blocking until the
    /// device acknowledges the press.
    fn press_key(&self, code: u16, duration_ms: u64) -> Result<()>;
    /// Releases `code`, blocking until acknowledged.
    fn release_key(&self, code: u16) -> Result<()>;
    /// Moves the mouse by `(dx, dy)` relative to its current position over
    /// `duration_ms`, blocking until acknowledged.
    fn move_mouse_relative(&self, dx: f64, dy: f64, duration_ms: u64) -> Result<()>;
}

/// Wraps a [`DeviceSurface`], turning each call into "act, then pause" so
/// callers don't need to thread sleeps through every site.
pub struct ActionWrapper<'a> {
    surface: &'a dyn DeviceSurface,
}

impl<'a> ActionWrapper<'a> {
    pub fn new(surface: &'a dyn DeviceSurface) -> Self {
        ActionWrapper { surface }
    }

    pub fn key_down(&self, code: u16, pause_ms: u64) -> Result<()> {
        self.surface.press_key(code, 0)?;
        sleep(pause_ms);
        Ok(())
    }

    pub fn key_up(&self, code: u16, pause_ms: u64) -> Result<()> {
        self.surface.release_key(code)?;
        sleep(pause_ms);
        Ok(())
    }

    pub fn key_type(&self, code: u16, duration_ms: u64, pause_ms: u64) -> Result<()> {
        self.surface.press_key(code, duration_ms)?;
        sleep(pause_ms);
        Ok(())
    }

    pub fn rotate_camera(&self, dx: f64, dy: f64, move_ms: u64, pause_ms: u64) -> Result<()> {
        self.surface.move_mouse_relative(dx, dy, move_ms)?;
        sleep(pause_ms);
        Ok(())
    }
}

fn sleep(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
