//! Smoke-drives the move controller against a simulated device surface,
//! with no real capture backend or map tiles required.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use clap::Parser;
use image::RgbaImage;
use prometheus::Registry;
use rand::Rng;
use tracing_subscriber::EnvFilter;

use map_tracker::controller::{calc_delta_rotation, calc_target_rotation, PoseSource};
use map_tracker::{DeviceSurface, Error, MoveController, MoveParam, Pose, Result, TaskHost};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Config {
    #[arg(long, env = "MAP_TRACKER_METRICS_LISTEN_ADDR", default_value = "127.0.0.1:9898")]
    metrics_listen_addr: SocketAddr,

    #[arg(long, env = "MAP_TRACKER_TARGET_X", default_value_t = 50)]
    target_x: i64,

    #[arg(long, env = "MAP_TRACKER_TARGET_Y", default_value_t = 50)]
    target_y: i64,
}

/// A toy kinematic avatar: walking nudges it forward along its current
/// heading, rotating the camera turns it, noise is added so the run is
/// not perfectly deterministic.
struct SimState {
    x: f64,
    y: f64,
    heading_deg: f64,
    walking: bool,
    sprinting: bool,
}

struct SimSurface {
    state: Mutex<SimState>,
}

impl SimSurface {
    fn new() -> Self {
        SimSurface {
            state: Mutex::new(SimState {
                x: 0.0,
                y: 0.0,
                heading_deg: 0.0,
                walking: false,
                sprinting: false,
            }),
        }
    }

    fn tick(&self) {
        let mut s = self.state.lock().expect("sim state poisoned");
        if s.walking {
            let speed = if s.sprinting { 6.0 } else { 3.0 };
            let rad = s.heading_deg.to_radians();
            s.x += rad.sin() * speed;
            s.y -= rad.cos() * speed;
        }
    }
}

impl DeviceSurface for SimSurface {
    fn post_screencap_wait(&self) -> Result<()> {
        self.tick();
        Ok(())
    }

    fn cache_image(&self) -> Result<RgbaImage> {
        Ok(RgbaImage::new(1280, 720))
    }

    fn press_key(&self, code: u16, _duration_ms: u64) -> Result<()> {
        let mut s = self.state.lock().expect("sim state poisoned");
        match code {
            map_tracker::vk::W => s.walking = true,
            map_tracker::vk::SHIFT => s.sprinting = true,
            _ => {}
        }
        Ok(())
    }

    fn release_key(&self, code: u16) -> Result<()> {
        let mut s = self.state.lock().expect("sim state poisoned");
        match code {
            map_tracker::vk::W => s.walking = false,
            map_tracker::vk::SHIFT => s.sprinting = false,
            _ => {}
        }
        Ok(())
    }

    fn move_mouse_relative(&self, dx: f64, _dy: f64, _duration_ms: u64) -> Result<()> {
        let mut s = self.state.lock().expect("sim state poisoned");
        s.heading_deg = ((s.heading_deg + dx / 10.0) % 360.0 + 360.0) % 360.0;
        Ok(())
    }
}

/// Reads pose straight off the simulated avatar's ground truth, with a
/// little noise, instead of running NCC over a synthetic frame.
struct SimPoseSource<'a> {
    surface: &'a SimSurface,
}

impl<'a> PoseSource for SimPoseSource<'a> {
    fn infer(&self, _frame: &RgbaImage, map_name: &str) -> Result<Pose> {
        let s = self.surface.state.lock().expect("sim state poisoned");
        let mut rng = rand::thread_rng();
        let noise = rng.gen_range(-0.5..0.5);
        Ok(Pose {
            map_name: map_name.to_string(),
            x: (s.x + noise).round() as i64,
            y: (s.y + noise).round() as i64,
            rot_deg: s.heading_deg,
            loc_conf: 0.9,
            rot_conf: 0.9,
            loc_time_ms: 5,
            rot_time_ms: 3,
        })
    }
}

struct SimHost {
    stop_requested: AtomicBool,
}

impl TaskHost for SimHost {
    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn post_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn post_ui(&self, html: &str) {
        tracing::info!(html, "ui update");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    tracing::info!(config = ?config, "starting map tracker demo");

    let registry = Registry::new();
    let _metrics = map_tracker::metrics::Metrics::new(&registry);
    let metrics_addr = config.metrics_listen_addr;
    tokio::spawn(async move {
        let app = map_tracker::metrics::router(registry);
        if let Ok(listener) = tokio::net::TcpListener::bind(metrics_addr).await {
            let _ = axum::serve(listener, app).await;
        }
    });

    let surface = SimSurface::new();
    let pose_source = SimPoseSource { surface: &surface };
    let host = SimHost {
        stop_requested: AtomicBool::new(false),
    };
    let controller = MoveController::new(&surface, &host, &pose_source);

    let param = MoveParam {
        map_name: "map1_lv1".to_string(),
        targets: vec![(config.target_x, config.target_y)],
    };

    match controller.navigate(&param) {
        Ok(()) => tracing::info!("navigation finished"),
        Err(Error::Cancelled) => tracing::warn!("navigation cancelled before completion"),
        Err(e) => tracing::error!(error = %e, "navigation failed"),
    }

    let heading_sample = calc_target_rotation(0, 0, 10, 0);
    let delta_sample = calc_delta_rotation(0.0, heading_sample);
    tracing::debug!(heading_sample, delta_sample, "sanity check of heading math");

    Ok(())
}
