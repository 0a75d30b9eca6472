use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Unknown setting `{0}`")]
    UnknownSetting(String),

    #[error("Value `{value}` is invalid for setting `{key}`")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("An IO error raised")]
    Io(#[from] std::io::Error),

    #[error("Malformed YAML configuration")]
    Yaml(#[from] serde_yaml::Error),
}
