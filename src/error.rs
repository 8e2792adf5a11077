use serde::ser::Serializer;
use serde::Serialize;
use thiserror::Error;

/// Closed set of failure kinds surfaced to the presentation layer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    Timeout,
    RateLimited,
    NotFound,
    Upstream,
    NetworkUnreachable,
    MalformedResponse,
    UnsupportedAsset,
    EmptyResult,
    Unknown,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Request timed out. Please try again in a moment.")]
    Timeout,
    #[error("Unable to reach the price service. Please try again in a moment.")]
    NetworkUnreachable(String),
    #[error("Rate limit exceeded. Please wait a few seconds and try again.")]
    RateLimited,
    #[error("Cryptocurrency not found. Please try another one.")]
    NotFound,
    #[error("Price service is experiencing issues. Please try again in a moment.")]
    Upstream { status: Option<u16>, detail: String },
    #[error("Invalid response format from the price service.")]
    MalformedResponse(String),
    #[error("Cryptocurrency {0} is not supported for real-time data")]
    UnsupportedAsset(String),
    #[error("{0}")]
    EmptyResult(String),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("An unexpected error occurred while fetching data.")]
    Unknown(String),
}

impl AppError {
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            404 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::Upstream {
                status: Some(status),
                detail,
            },
            _ => Self::Unknown(format!("unexpected status {status}: {detail}")),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::Validation,
            Self::Timeout => ErrorKind::Timeout,
            Self::NetworkUnreachable(_) | Self::WebSocket(_) => ErrorKind::NetworkUnreachable,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::NotFound => ErrorKind::NotFound,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::UnsupportedAsset(_) => ErrorKind::UnsupportedAsset,
            Self::EmptyResult(_) => ErrorKind::EmptyResult,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the rate-limited client may retry the failed call.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::NetworkUnreachable(_) => true,
            Self::Upstream { status, .. } => {
                status.map(|code| (500..=599).contains(&code)).unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = value.status() {
            return Self::from_status(status.as_u16(), value.to_string());
        }
        if value.is_decode() {
            return Self::MalformedResponse(value.to_string());
        }
        if value.is_connect() || value.is_request() {
            return Self::NetworkUnreachable(value.to_string());
        }
        Self::Unknown(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl From<simd_json::Error> for AppError {
    fn from(value: simd_json::Error) -> Self {
        Self::MalformedResponse(value.to_string())
    }
}

impl From<std::num::ParseFloatError> for AppError {
    fn from(value: std::num::ParseFloatError) -> Self {
        Self::MalformedResponse(format!("float parse error: {value}"))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
