use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the backend job queue
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Backend unreachable at {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Backend returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("Invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },
}

impl ApiError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            ApiError::Timeout { url }
        } else if err.is_connect() {
            ApiError::Connect {
                url,
                message: root_cause(&err),
            }
        } else if err.is_decode() {
            ApiError::Decode {
                url,
                message: err.to_string(),
            }
        } else {
            ApiError::Request {
                url,
                message: root_cause(&err),
            }
        }
    }

    /// Short label used in poll failure logs
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Connect { .. } => "connection refused",
            ApiError::Timeout { .. } => "timeout",
            ApiError::Status { .. } => "http error",
            ApiError::Decode { .. } => "bad response",
            ApiError::Request { .. } => "request error",
        }
    }

    /// Client errors won't change on retry, except timeouts and rate limits
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                !status.is_client_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Decode { .. } => false,
            _ => true,
        }
    }
}

fn root_cause(err: &reqwest::Error) -> String {
    let mut source: &dyn std::error::Error = err;
    while let Some(next) = source.source() {
        source = next;
    }
    source.to_string()
}
