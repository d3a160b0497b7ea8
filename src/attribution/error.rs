//! Attribution client errors

/// Failure of a single backend call.
///
/// Both variants degrade to `NotMatched` in the reconciler; they never
/// reach the host application.
#[derive(thiserror::Error, Debug)]
pub enum AttributionError {
    /// The transport could not complete (connect failure, timeout, reset).
    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },

    /// The response could not be parsed or violates the expected schema.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl AttributionError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Classify a `reqwest` failure.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_status() {
            Self::Protocol(err.to_string())
        } else {
            Self::Network {
                message: err.to_string(),
                timed_out: err.is_timeout(),
            }
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Network { timed_out: true, .. })
    }
}
