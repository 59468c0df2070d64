use thiserror::Error;

/// Crate-wide error type. Each variant corresponds to one row of the
/// error-policy table: callers match on these to decide whether to retry
/// the current tick, fail the whole inference, or trigger an emergency
/// stop.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid move parameters: {0}")]
    ParamError(String),

    #[error("map tracker resources missing: {0}")]
    ResourceMissing(String),

    #[error("frame unavailable from device surface")]
    FrameUnavailable,

    #[error("recognition request failed: {0}")]
    RecognitionError(String),

    #[error("map not recognized")]
    MapNotRecognized,

    #[error("arrival timed out after {0}ms")]
    ArrivalTimeout(u64),

    #[error("movement appears stuck for {0}ms")]
    StuckTimeout(u64),

    #[error("rotation adjustment timed out after {0}ms")]
    RotationTimeout(u64),

    #[error("navigation cancelled")]
    Cancelled,

    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid map_rect.json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid map_name_regex: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
