use thiserror::Error;

/// Errors raised by the engine's configuration layer.
///
/// The frame loop itself never fails: read and detector problems end a session
/// and are reported through `tracing`, not through this type.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("distance threshold {0} px is out of range (max {max} px)", max = crate::config::MAX_DISTANCE_THRESHOLD)]
    InvalidDistanceThreshold(u64),

    #[error("isolation time must be between 0 and {max} seconds (got {0})", max = crate::config::MAX_ISOLATION_TIME_SECS)]
    InvalidIsolationTime(f64),

    #[error("record TTL must be between 0 and {max} seconds (got {0})", max = crate::config::MAX_ISOLATION_TIME_SECS)]
    InvalidRecordTtl(f64),

    #[error("task pool needs at least {needed} distinct prompts, found {found}")]
    TaskPoolTooSmall { needed: usize, found: usize },

    #[error("identity bin size must be at least 1 px")]
    InvalidBinSize,

    #[error("failed to read config file: {0}")]
    ConfigRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
