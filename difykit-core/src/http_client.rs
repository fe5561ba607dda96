use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{ACCEPT, CACHE_CONTROL, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, DifyError};
use crate::telemetry::{self, CallTrace};

/// A boxed stream of raw body chunks from an event-stream response.
pub type ByteStream =
    std::pin::Pin<Box<dyn futures_util::stream::Stream<Item = CoreResult<Bytes>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
    stream_timeout: Option<Duration>,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        // No client-wide total timeout: it would cut long-lived event streams.
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| DifyError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("difykit/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
            stream_timeout: cfg.stream_timeout_ms.map(Duration::from_millis),
        })
    }

    fn request(&self, method: Method, url: &str, headers: &[(&str, &str)]) -> RequestBuilder {
        let mut req = self
            .inner
            .request(method, url)
            .header(USER_AGENT, &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req
    }

    /// Send, time, and status-check a request. Any status >= 400 becomes
    /// `DifyError::Api` and the body is consumed for the error.
    async fn execute(&self, method: &Method, url: &str, req: RequestBuilder) -> CoreResult<Response> {
        let start = Instant::now();
        tracing::debug!(%method, url, "sending request");
        let trace = CallTrace::new(method.as_str(), url);

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                let err = DifyError::Transport(e.to_string());
                telemetry::emit_call(trace.error(&err));
                return Err(err);
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        let request_id = extract_request_id(resp.headers());
        tracing::debug!(status = status.as_u16(), latency_ms = latency, "received response");
        let trace = trace
            .status(status.as_u16())
            .request_id_opt(request_id.as_deref())
            .latency_ms(latency);

        if status.is_client_error() || status.is_server_error() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            let err = map_http_error(status, retry_after, &body);
            telemetry::emit_call(trace.error(&err));
            return Err(err);
        }
        telemetry::emit_call(trace);
        Ok(resp)
    }

    async fn decode<R: DeserializeOwned>(resp: Response) -> CoreResult<R> {
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(|e| DifyError::Decode {
            status,
            message: format!("body read error: {e}"),
        })?;
        serde_json::from_slice::<R>(&bytes).map_err(|e| DifyError::Decode {
            status,
            message: format!("json decode error: {e}"),
        })
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        let req = self
            .request(Method::GET, url, headers)
            .query(query)
            .timeout(self.request_timeout);
        let resp = self.execute(&Method::GET, url, req).await?;
        Self::decode(resp).await
    }

    /// Send a JSON body with the given method (POST, PATCH, ...).
    pub async fn send_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&T>,
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        let mut req = self
            .request(method.clone(), url, headers)
            .timeout(self.request_timeout);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = self.execute(&method, url, req).await?;
        Self::decode(resp).await
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        self.send_json(Method::POST, url, Some(body), headers).await
    }

    pub async fn patch_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        self.send_json(Method::PATCH, url, Some(body), headers).await
    }

    /// DELETE and return the JSON body, or `Value::Null` for an empty body (e.g. 204).
    pub async fn delete(&self, url: &str, headers: &[(&str, &str)]) -> CoreResult<serde_json::Value> {
        let req = self
            .request(Method::DELETE, url, headers)
            .timeout(self.request_timeout);
        let resp = self.execute(&Method::DELETE, url, req).await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(|e| DifyError::Decode {
            status,
            message: format!("body read error: {e}"),
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| DifyError::Decode {
            status,
            message: format!("json decode error: {e}"),
        })
    }

    pub async fn post_multipart<R: DeserializeOwned>(
        &self,
        url: &str,
        form: reqwest::multipart::Form,
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        let req = self
            .request(Method::POST, url, headers)
            .multipart(form)
            .timeout(self.request_timeout);
        let resp = self.execute(&Method::POST, url, req).await?;
        Self::decode(resp).await
    }

    /// POST JSON and return the response body as a raw byte stream.
    /// The status is checked before the stream is handed out.
    pub async fn post_event_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<ByteStream> {
        let mut req = self
            .request(Method::POST, url, headers)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .json(body);
        if let Some(t) = self.stream_timeout {
            req = req.timeout(t);
        }
        let resp = self.execute(&Method::POST, url, req).await?;
        let stream = resp
            .bytes_stream()
            .map(|r| r.map_err(|e| DifyError::StreamTransport(e.to_string())));
        Ok(Box::pin(stream))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "x-trace-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

/// Dify error body: `{"status": 400, "code": "invalid_param", "message": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

const MAX_ERROR_MESSAGE: usize = 300;
const MAX_ERROR_BODY: usize = 4096;

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> DifyError {
    let (code, message) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => (parsed.code, parsed.message),
        Err(_) if body.trim().is_empty() => (None, format!("HTTP Error: {}", status.as_u16())),
        Err(_) => (None, truncate(body, MAX_ERROR_MESSAGE)),
    };
    DifyError::Api {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        code,
        message,
        body: truncate(body, MAX_ERROR_BODY),
        retry_after,
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut t = s[..idx].to_string();
            t.push_str("...");
            t
        }
        None => s.to_string(),
    }
}
