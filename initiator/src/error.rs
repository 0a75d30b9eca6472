use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Index granularity must be positive")]
    ZeroGranularity,

    #[error("Failed to build the tokio runtime")]
    Runtime(#[from] std::io::Error),
}
