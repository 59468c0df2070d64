//! Prometheus counters/gauges for the inference and control loop. The
//! library only updates the registry; exposing it over HTTP is left to
//! the embedder (the demo binary shows one way).

use prometheus::{Counter, Gauge, Registry};

pub struct Metrics {
    pub loc_infer_duration_ms: Gauge,
    pub rot_infer_duration_ms: Gauge,
    pub ncc_windows_evaluated_total: Counter,
    pub controller_ticks_total: Counter,
    pub emergency_stops_total: Counter,
    pub map_cache_reloads_total: Counter,
}

macro_rules! reg_gauge {
    ($registry:expr, $name:expr, $help:expr) => {{
        let g = Gauge::new($name, $help).expect("valid metric spec");
        $registry.register(Box::new(g.clone())).expect("unique metric name");
        g
    }};
}

macro_rules! reg_counter {
    ($registry:expr, $name:expr, $help:expr) => {{
        let c = Counter::new($name, $help).expect("valid metric spec");
        $registry.register(Box::new(c.clone())).expect("unique metric name");
        c
    }};
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        Metrics {
            loc_infer_duration_ms: reg_gauge!(
                registry,
                "map_tracker_loc_infer_duration_ms",
                "Duration of the most recent location inference, in milliseconds"
            ),
            rot_infer_duration_ms: reg_gauge!(
                registry,
                "map_tracker_rot_infer_duration_ms",
                "Duration of the most recent rotation inference, in milliseconds"
            ),
            ncc_windows_evaluated_total: reg_counter!(
                registry,
                "map_tracker_ncc_windows_evaluated_total",
                "Total NCC windows evaluated across all matches"
            ),
            controller_ticks_total: reg_counter!(
                registry,
                "map_tracker_controller_ticks_total",
                "Total move controller ticks processed"
            ),
            emergency_stops_total: reg_counter!(
                registry,
                "map_tracker_emergency_stops_total",
                "Total emergency stops triggered"
            ),
            map_cache_reloads_total: reg_counter!(
                registry,
                "map_tracker_map_cache_reloads_total",
                "Total times the scaled map cache was rebuilt"
            ),
        }
    }

    pub fn record_pose(&self, pose: &crate::pose::Pose) {
        self.loc_infer_duration_ms.set(pose.loc_time_ms as f64);
        self.rot_infer_duration_ms.set(pose.rot_time_ms as f64);
    }
}

pub fn router(registry: Registry) -> axum::Router {
    use axum::routing::get;
    use prometheus::Encoder;

    axum::Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                let encoder = prometheus::TextEncoder::new();
                let metric_families = registry.gather();
                let mut buffer = Vec::new();
                encoder
                    .encode(&metric_families, &mut buffer)
                    .expect("metrics encode");
                String::from_utf8(buffer).expect("metrics are valid utf8")
            }
        }),
    )
}
