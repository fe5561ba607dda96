use serde::{Deserialize, Serialize};

/// One HTTP request against the Dify API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CallTrace {
    /// HTTP method, e.g. "POST".
    pub method: String,

    /// Full request URL.
    pub url: String,

    /// Response status; `None` when no response arrived.
    pub status: Option<u16>,

    /// Request id returned by the server or a proxy in front of it.
    pub request_id: Option<String>,

    /// Time until response headers, in milliseconds.
    pub latency_ms: Option<u64>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl CallTrace {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
    pub fn request_id_opt(mut self, rid: Option<&str>) -> Self {
        self.request_id = rid.map(|s| s.to_string());
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn error(mut self, err: &crate::error::DifyError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Summary of one finished (resolved or rejected) streaming call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamTrace {
    /// "chat" or "workflow".
    pub protocol: String,
    pub endpoint: String,
    /// "resolved" or "rejected".
    pub outcome: String,
    pub terminal_event: Option<String>,
    pub events_dispatched: u64,
    pub malformed_records: u64,
    pub elapsed_ms: u64,
    pub error_kind: Option<String>,
    /// The rest of the body is being read off in the background.
    #[serde(default)]
    pub draining: bool,
}
