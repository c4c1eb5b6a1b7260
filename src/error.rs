use thiserror::Error;

/// Errors raised while collecting from a single security server.
///
/// Every variant except `Persist` and `Config` is isolated to one task:
/// the failing server is reported and skipped, the rest of the run
/// continues and the server is retried from the same cursor next run.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Descriptor line did not split into the five identity fields.
    #[error("incorrect server string: {line:?}")]
    MalformedIdentity { line: String },

    /// Network failure or non-success HTTP status.
    #[error("cannot get response: {0}")]
    Transport(String),

    /// No response within the configured per-fetch timeout.
    #[error("no response within {0:.1}s")]
    Timeout(f64),

    /// Response received but the payload could not be decoded.
    #[error("cannot parse response attachment: {0}")]
    Decode(String),

    /// Records could not be appended to the output sink.
    #[error("cannot append records: {0}")]
    Sink(#[from] std::io::Error),

    /// Cursor state could not be written.
    #[error("cannot persist cursors to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration is semantically invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for CollectorError {
    fn from(e: reqwest::Error) -> Self {
        CollectorError::Transport(e.to_string())
    }
}
