use thiserror::Error;

/// Core error type for the Dify connector.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum DifyError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller handed the upload path something it cannot send.
    /// Raised before any network call.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// HTTP status >= 400 returned by the Dify API.
    #[error("api error {status} {status_text}: {message}")]
    Api {
        status: u16,
        status_text: String,
        code: Option<String>,
        message: String,
        body: String,
        retry_after: Option<u64>,
    },

    /// The request never produced a response (connect/send failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body failed while an event stream was being read.
    #[error("stream transport error: {0}")]
    StreamTransport(String),

    #[error("pending SSE record exceeded {limit} bytes")]
    RecordTooLarge { limit: usize },

    #[error("stream cancelled")]
    Cancelled,

    #[error("response decode error (status {status}): {message}")]
    Decode { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DifyError {
    /// Stable short name of the error kind, used for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::UnsupportedInput(_) => "unsupported_input",
            Self::Api { .. } => "api",
            Self::Transport(_) => "transport",
            Self::StreamTransport(_) => "stream_transport",
            Self::RecordTooLarge { .. } => "record_too_large",
            Self::Cancelled => "cancelled",
            Self::Decode { .. } => "decode",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Remote error code (e.g. `invalid_param`), if the server sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_status(&self, status: u16) -> bool {
        self.status() == Some(status)
    }

    pub fn is_error_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.is_status(429)
    }
}

pub type CoreResult<T> = std::result::Result<T, DifyError>;
