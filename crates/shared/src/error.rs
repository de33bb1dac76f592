use thiserror::Error;

/// Failure to decode a push-channel response body.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("response body is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}
