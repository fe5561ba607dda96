//! Chat messages: blocking answers and streamed answers.

use tokio_util::sync::CancellationToken;

use crate::client::DifyClient;
use crate::error::CoreResult;
use crate::model::{ChatEventKind, ChatRequest, ChatResponse, ChatStreamEvent};
use crate::normalizer::normalize_chat;
use crate::stream::{EventSink, StreamProtocol, StreamSummary};

pub const CHAT_ENDPOINT: &str = "/chat-messages";

/// Chat event stream: resolves on `message_end`. `error` events are
/// delivered to the sink but do not end the stream.
#[derive(Debug, Clone, Copy)]
pub struct ChatStream;

impl StreamProtocol for ChatStream {
    type Event = ChatStreamEvent;

    const NAME: &'static str = "chat";
    const ENDPOINT: &'static str = CHAT_ENDPOINT;

    fn is_terminal(event: &ChatStreamEvent) -> bool {
        event.event == ChatEventKind::MessageEnd
    }

    fn event_name(event: &ChatStreamEvent) -> &str {
        event.event.as_str()
    }
}

impl DifyClient {
    pub async fn send_message(&self, req: ChatRequest) -> CoreResult<ChatResponse> {
        let req = normalize_chat(req)?;
        self.blocking(CHAT_ENDPOINT, &req).await
    }

    /// Stream an answer into `sink`, one event per call, in arrival order.
    pub async fn send_streaming_message<S>(
        &self,
        req: ChatRequest,
        sink: S,
    ) -> CoreResult<StreamSummary>
    where
        S: EventSink<ChatStreamEvent>,
    {
        let req = normalize_chat(req)?;
        self.stream::<ChatStream, _, _>(&req, sink, None).await
    }

    pub async fn send_streaming_message_cancellable<S>(
        &self,
        req: ChatRequest,
        sink: S,
        cancel: CancellationToken,
    ) -> CoreResult<StreamSummary>
    where
        S: EventSink<ChatStreamEvent>,
    {
        let req = normalize_chat(req)?;
        self.stream::<ChatStream, _, _>(&req, sink, Some(cancel)).await
    }
}
