use thiserror::Error;

/// Failure of a single provider query.
///
/// None of these abort a batch: the pipeline records them against the record
/// that triggered the query and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider rejected credentials")]
    Unauthorized,
}

impl ProviderError {
    /// Short machine-friendly name, used in status columns.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Transport(_) => "transport",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::MalformedResponse(_) => "malformed_response",
            ProviderError::Unauthorized => "unauthorized",
        }
    }

    /// Whether a retry has any chance of producing a different result.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transport(_) | ProviderError::RateLimited)
    }
}

/// Row-level input problem. Short-circuits one record, never the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl InputError {
    pub fn kind(&self) -> &'static str {
        match self {
            InputError::InvalidCoordinate(_) => "invalid_coordinate",
            InputError::InvalidTimestamp(_) => "invalid_timestamp",
        }
    }
}

/// Errors reading or writing the tabular batch.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error on '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("required column '{0}' not found in input header")]
    MissingColumn(String),

    #[error("output has {found} enriched records for {expected} input rows")]
    LengthMismatch { expected: usize, found: usize },
}
