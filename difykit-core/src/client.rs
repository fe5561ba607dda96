use reqwest::Method;
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

use crate::config::{ConfigOverride, DifyConfig};
use crate::error::{CoreResult, DifyError};
use crate::http_client::HttpClient;
use crate::model::{Ack, ModeBody, ResponseMode};
use crate::stream::{EventSink, StreamOperation, StreamProtocol, StreamSummary};

/// Handle to one Dify app or knowledge base API.
///
/// Cheap to clone; clones share the HTTP connection pool. Every call builds
/// its own request, and every streaming call owns its own buffer and state.
#[derive(Debug, Clone)]
pub struct DifyClient {
    http: HttpClient,
    config: DifyConfig,
}

impl DifyClient {
    pub fn new(config: DifyConfig) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&config.http)?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> CoreResult<Self> {
        Self::new(DifyConfig::from_env()?)
    }

    /// Same connection pool, different base URL and/or key.
    pub fn with_overrides(&self, ov: &ConfigOverride) -> CoreResult<Self> {
        Ok(Self {
            http: self.http.clone(),
            config: self.config.with_overrides(ov)?,
        })
    }

    pub fn config(&self) -> &DifyConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests(server_base: &str) -> Self {
        let config = DifyConfig::new(server_base, secrecy::SecretString::from("test-key".to_string()))
            .expect("test config");
        Self::new(config).expect("test client")
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.api_key.expose_secret())
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    pub(crate) async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CoreResult<R> {
        let auth = self.bearer();
        self.http
            .get_json(&self.url(path), query, &[("Authorization", auth.as_str())])
            .await
    }

    pub(crate) async fn post<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> CoreResult<R> {
        let auth = self.bearer();
        self.http
            .post_json(&self.url(path), body, &[("Authorization", auth.as_str())])
            .await
    }

    /// POST without a body (enable/disable style endpoints).
    pub(crate) async fn post_empty<R: DeserializeOwned>(&self, path: &str) -> CoreResult<R> {
        let auth = self.bearer();
        self.http
            .send_json::<Value, R>(
                Method::POST,
                &self.url(path),
                None,
                &[("Authorization", auth.as_str())],
            )
            .await
    }

    pub(crate) async fn patch<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> CoreResult<R> {
        let auth = self.bearer();
        self.http
            .patch_json(&self.url(path), body, &[("Authorization", auth.as_str())])
            .await
    }

    pub(crate) async fn post_form<R: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> CoreResult<R> {
        let auth = self.bearer();
        self.http
            .post_multipart(&self.url(path), form, &[("Authorization", auth.as_str())])
            .await
    }

    /// DELETE; the server's `message` wins over `default_message`.
    pub(crate) async fn delete_ack(&self, path: &str, default_message: &str) -> CoreResult<Ack> {
        let auth = self.bearer();
        let body = self
            .http
            .delete(&self.url(path), &[("Authorization", auth.as_str())])
            .await?;
        Ok(Ack {
            success: true,
            message: message_or(&body, default_message),
        })
    }

    /// POST a streaming request to `P::ENDPOINT` and feed the body to `sink`
    /// until the stream settles.
    pub(crate) async fn stream<P, T, S>(
        &self,
        request: &T,
        sink: S,
        cancel: Option<CancellationToken>,
    ) -> CoreResult<StreamSummary>
    where
        P: StreamProtocol,
        T: Serialize,
        S: EventSink<P::Event>,
    {
        let span = tracing::info_span!("dify.stream", protocol = P::NAME, endpoint = P::ENDPOINT);
        async move {
            if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(DifyError::Cancelled);
            }
            let body = ModeBody {
                request,
                response_mode: ResponseMode::Streaming,
            };
            let auth = self.bearer();
            let url = self.url(P::ENDPOINT);
            let headers = [("Authorization", auth.as_str())];
            let initiate = self.http.post_event_stream(&url, &body, &headers);
            let transport = match &cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(protocol = P::NAME, "stream cancelled before response");
                        return Err(DifyError::Cancelled);
                    }
                    res = initiate => res?,
                },
                None => initiate.await?,
            };
            let mut op = StreamOperation::<P, S>::new(sink, &self.config.stream);
            op.run(transport, cancel).await
        }
        .instrument(span)
        .await
    }

    pub(crate) async fn blocking<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        request: &T,
    ) -> CoreResult<R> {
        let body = ModeBody {
            request,
            response_mode: ResponseMode::Blocking,
        };
        self.post(path, &body).await
    }
}

/// One URL path segment, percent-encoded.
pub(crate) fn seg(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

/// `body.message` when it is a non-empty string, else `default`.
pub(crate) fn message_or(body: &Value, default: &str) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(default)
        .to_string()
}
