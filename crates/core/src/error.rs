/// Result alias that carries the custom [`VisualiserError`] type.
pub type Result<T> = std::result::Result<T, VisualiserError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VisualiserError {
    /// The audio engine cannot run with the requested parameters. Fatal to the
    /// instance; no graph is built.
    #[error("unsupported audio environment: {0}")]
    UnsupportedEnvironment(String),
    /// A node could not be created or connected while wiring the graph.
    #[error("graph wiring failed: {0}")]
    GraphWiring(String),
    /// The audio bytes could not be retrieved.
    #[error("failed to fetch `{source_id}`: {reason}")]
    Fetch { source_id: String, reason: String },
    /// The retrieved bytes are not playable audio.
    #[error("failed to decode audio: {0}")]
    Decode(String),
    /// An operation was attempted from a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Configuration values outside their accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration file could not be parsed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl VisualiserError {
    pub fn wiring<T: Into<String>>(msg: T) -> Self {
        Self::GraphWiring(msg.into())
    }

    pub fn invalid_state<T: Into<String>>(msg: T) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Returns `true` for failures that happen while loading a source rather
    /// than while setting up the instance.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Decode(_))
    }
}

impl From<hound::Error> for VisualiserError {
    fn from(value: hound::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
