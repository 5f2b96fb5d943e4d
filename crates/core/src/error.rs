use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// One or more required environment keys are unset or empty.
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}
