//! Streaming engine shared by chat and workflow calls.
//!
//! Contract:
//! - Records are decoded and handed to the sink one at a time, in the order
//!   the reassembler completed them. Never batched, reordered or retried.
//! - A record whose payload is not valid JSON is logged and skipped.
//! - The first terminal event resolves the operation and the call returns
//!   right away. Nothing is dispatched after that; the rest of the body is
//!   drained by a background task when `drain_after_terminal` is set.
//! - A transport error rejects the operation only while it is still open.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::StreamCfg;
use crate::error::{CoreResult, DifyError};
use crate::sse::{SseReassembler, SseRecord};
use crate::telemetry::{self, StreamTrace};

/// Receives decoded events. Any `FnMut(E)` closure is a sink.
pub trait EventSink<E> {
    fn receive(&mut self, event: E);
}

impl<E, F> EventSink<E> for F
where
    F: FnMut(E),
{
    fn receive(&mut self, event: E) {
        self(event)
    }
}

/// What differs between stream kinds: endpoint, event schema, terminal set.
pub trait StreamProtocol {
    type Event: DeserializeOwned + fmt::Debug;

    /// Short name used in logs and telemetry.
    const NAME: &'static str;
    /// Path below the API base URL.
    const ENDPOINT: &'static str;

    fn decode(payload: &str) -> Result<Self::Event, serde_json::Error> {
        serde_json::from_str(payload)
    }

    fn is_terminal(event: &Self::Event) -> bool;

    fn event_name(event: &Self::Event) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Resolved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: StreamState,
    pub to: StreamState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal stream transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

impl StreamState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// Only `Open -> Resolved` and `Open -> Rejected` are legal.
    pub fn transition(&mut self, to: StreamState) -> Result<(), IllegalTransition> {
        match (*self, to) {
            (Self::Open, Self::Resolved | Self::Rejected) => {
                *self = to;
                Ok(())
            }
            (from, to) => Err(IllegalTransition { from, to }),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }
}

/// Why a resolved stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A terminal event arrived; holds its name (e.g. `workflow_failed`).
    TerminalEvent(String),
    /// The body ended before any terminal event.
    EndOfStream,
}

/// Returned by a resolved streaming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub completion: Completion,
    pub events_dispatched: u64,
    pub malformed_records: u64,
    /// Comment-only, blank, or data-less records.
    pub skipped_records: u64,
    /// Length of an unterminated record discarded at end of stream.
    pub discarded_tail_bytes: u64,
}

impl StreamSummary {
    pub fn terminal_event(&self) -> Option<&str> {
        match &self.completion {
            Completion::TerminalEvent(name) => Some(name),
            Completion::EndOfStream => None,
        }
    }
}

/// One streaming call: owns its buffer, its state and the sink.
pub struct StreamOperation<P: StreamProtocol, S> {
    reassembler: SseReassembler,
    state: StreamState,
    sink: S,
    drain_after_terminal: bool,
    completion: Option<Completion>,
    dispatched: u64,
    malformed: u64,
    data_less: u64,
    discarded_tail: u64,
    body_ended: bool,
    _protocol: std::marker::PhantomData<fn() -> P>,
}

enum Polled {
    Item(Option<CoreResult<Bytes>>),
    Cancelled,
}

impl<P: StreamProtocol, S: EventSink<P::Event>> StreamOperation<P, S> {
    pub fn new(sink: S, cfg: &StreamCfg) -> Self {
        Self {
            reassembler: SseReassembler::new(cfg.max_pending_record_bytes),
            state: StreamState::Open,
            sink,
            drain_after_terminal: cfg.drain_after_terminal,
            completion: None,
            dispatched: 0,
            malformed: 0,
            data_less: 0,
            discarded_tail: 0,
            body_ended: false,
            _protocol: std::marker::PhantomData,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Feed one body fragment. Ignored once the operation has settled.
    pub fn on_data(&mut self, chunk: &[u8]) -> CoreResult<()> {
        if !self.state.is_open() {
            return Ok(());
        }
        let records = match self.reassembler.push(chunk) {
            Ok(records) => records,
            Err(e) => {
                self.reject();
                return Err(e);
            }
        };
        for record in records {
            if !self.state.is_open() {
                break;
            }
            self.handle_record(record);
        }
        Ok(())
    }

    /// Natural end of the body. Resolves an open operation; no-op otherwise.
    pub fn on_end(&mut self) {
        self.body_ended = true;
        let tail = self.reassembler.finish();
        if !self.state.is_open() {
            return;
        }
        if tail > 0 {
            tracing::debug!(protocol = P::NAME, bytes = tail, "discarding unterminated record");
            self.discarded_tail = tail as u64;
        }
        tracing::debug!(protocol = P::NAME, "stream ended naturally");
        self.resolve(Completion::EndOfStream);
    }

    /// Transport failure. Returns the error back if it rejected the
    /// operation, `None` if the operation had already settled.
    pub fn on_error(&mut self, err: DifyError) -> Option<DifyError> {
        self.body_ended = true;
        if !self.state.is_open() {
            tracing::debug!(protocol = P::NAME, error = %err, "transport error after completion ignored");
            return None;
        }
        self.reject();
        Some(err)
    }

    fn handle_record(&mut self, record: SseRecord) {
        let Some(payload) = record.data else {
            self.data_less += 1;
            return;
        };
        let event = match P::decode(&payload) {
            Ok(event) => event,
            Err(e) => {
                self.malformed += 1;
                tracing::warn!(protocol = P::NAME, error = %e, raw = %payload, "dropping malformed SSE record");
                return;
            }
        };
        let terminal = P::is_terminal(&event).then(|| P::event_name(&event).to_string());
        if let Some(name) = terminal {
            self.resolve(Completion::TerminalEvent(name));
        }
        self.dispatched += 1;
        self.sink.receive(event);
    }

    fn resolve(&mut self, completion: Completion) {
        let moved = self.state.transition(StreamState::Resolved);
        debug_assert!(moved.is_ok(), "{moved:?}");
        self.completion = Some(completion);
    }

    fn reject(&mut self) {
        let moved = self.state.transition(StreamState::Rejected);
        debug_assert!(moved.is_ok(), "{moved:?}");
    }

    fn summary(&self) -> StreamSummary {
        StreamSummary {
            completion: self.completion.clone().unwrap_or(Completion::EndOfStream),
            events_dispatched: self.dispatched,
            malformed_records: self.malformed,
            skipped_records: self.reassembler.skipped() + self.data_less,
            discarded_tail_bytes: self.discarded_tail,
        }
    }

    /// Drive the operation over a transport until it settles.
    ///
    /// Returns as soon as a terminal event resolves the operation. With
    /// `drain_after_terminal` the remaining body is then read and discarded
    /// by a spawned task, which stops early if `cancel` fires. Cancelling
    /// while still open rejects with [`DifyError::Cancelled`].
    pub async fn run<T>(
        &mut self,
        mut transport: T,
        cancel: Option<CancellationToken>,
    ) -> CoreResult<StreamSummary>
    where
        T: Stream<Item = CoreResult<Bytes>> + Send + Unpin + 'static,
    {
        let started = Instant::now();
        let result = self.drive(&mut transport, cancel.as_ref()).await;
        let draining = self.state == StreamState::Resolved
            && !self.body_ended
            && self.drain_after_terminal;
        if draining {
            spawn_drain(P::NAME, transport, cancel);
        }
        let (terminal_event, error_kind) = match &result {
            Ok(s) => (s.terminal_event().map(str::to_string), None),
            Err(e) => (None, Some(e.kind().to_string())),
        };
        telemetry::emit_stream(StreamTrace {
            protocol: P::NAME.to_string(),
            endpoint: P::ENDPOINT.to_string(),
            outcome: self.state.as_str().to_string(),
            terminal_event,
            events_dispatched: self.dispatched,
            malformed_records: self.malformed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error_kind,
            draining,
        });
        result
    }

    async fn drive<T>(
        &mut self,
        transport: &mut T,
        cancel: Option<&CancellationToken>,
    ) -> CoreResult<StreamSummary>
    where
        T: Stream<Item = CoreResult<Bytes>> + Unpin,
    {
        while self.state.is_open() {
            let polled = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Polled::Cancelled,
                    item = transport.next() => Polled::Item(item),
                },
                None => Polled::Item(transport.next().await),
            };
            match polled {
                Polled::Cancelled => {
                    tracing::debug!(protocol = P::NAME, "stream cancelled");
                    self.reject();
                    return Err(DifyError::Cancelled);
                }
                Polled::Item(Some(Ok(chunk))) => self.on_data(&chunk)?,
                Polled::Item(Some(Err(err))) => {
                    if let Some(err) = self.on_error(err) {
                        return Err(err);
                    }
                }
                Polled::Item(None) => self.on_end(),
            }
        }
        Ok(self.summary())
    }
}

/// Read and discard what is left of a body after the operation resolved.
/// Transport errors end the drain quietly.
fn spawn_drain<T>(protocol: &'static str, mut transport: T, cancel: Option<CancellationToken>)
where
    T: Stream<Item = CoreResult<Bytes>> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut bytes = 0u64;
        loop {
            let item = match &cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    item = transport.next() => item,
                },
                None => transport.next().await,
            };
            match item {
                Some(Ok(chunk)) => bytes += chunk.len() as u64,
                Some(Err(e)) => {
                    tracing::debug!(protocol, error = %e, "transport error after completion ignored");
                    break;
                }
                None => break,
            }
        }
        tracing::debug!(protocol, bytes, "drained body after completion");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatEventKind, ChatStreamEvent, WorkflowEventKind, WorkflowStreamEvent};
    use crate::chat::ChatStream;
    use crate::test_util::chunks;
    use crate::workflow::WorkflowStream;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn cfg() -> StreamCfg {
        StreamCfg::default()
    }

    async fn run_chat(parts: &[&str]) -> (CoreResult<StreamSummary>, Vec<ChatStreamEvent>) {
        let mut seen = Vec::new();
        let result = {
            let mut op = StreamOperation::<ChatStream, _>::new(|e: ChatStreamEvent| seen.push(e), &cfg());
            op.run(chunks(parts), None).await
        };
        (result, seen)
    }

    #[test]
    fn state_transitions() {
        let mut s = StreamState::Open;
        assert!(s.transition(StreamState::Resolved).is_ok());
        let err = s.transition(StreamState::Rejected).unwrap_err();
        assert_eq!(err.from, StreamState::Resolved);
        assert_eq!(s, StreamState::Resolved);

        let mut s = StreamState::Open;
        assert!(s.transition(StreamState::Open).is_err());
        assert!(s.transition(StreamState::Rejected).is_ok());
        assert!(s.transition(StreamState::Resolved).is_err());
    }

    #[tokio::test]
    async fn chat_two_events_resolve_on_message_end() {
        let (result, seen) = run_chat(&[
            "data: {\"event\":\"message\",\"answer\":\"Hi\"}\n\n",
            "data: {\"event\":\"message_end\"}\n\n",
        ])
        .await;
        let summary = result.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].event, ChatEventKind::Message);
        assert_eq!(seen[0].answer.as_deref(), Some("Hi"));
        assert_eq!(seen[1].event, ChatEventKind::MessageEnd);
        assert_eq!(summary.terminal_event(), Some("message_end"));
        assert_eq!(summary.events_dispatched, 2);
    }

    #[tokio::test]
    async fn record_split_mid_json() {
        let (result, seen) = run_chat(&["data: {\"eve", "nt\":\"message_end\"}\n\n"]).await;
        assert!(result.is_ok());
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event, ChatEventKind::MessageEnd);
    }

    #[tokio::test]
    async fn nothing_dispatched_after_terminal() {
        let (result, seen) = run_chat(&[
            "data: {\"event\":\"message\",\"answer\":\"a\"}\n\n\
             data: {\"event\":\"message_end\"}\n\n\
             data: {\"event\":\"message\",\"answer\":\"late\"}\n\n",
            "data: not json\n\n",
            "data: {\"event\":\"message\",\"answer\":\"later\"}\n\n",
        ])
        .await;
        let summary = result.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].event, ChatEventKind::MessageEnd);
        assert_eq!(summary.malformed_records, 0);
    }

    #[tokio::test]
    async fn malformed_record_is_skipped() {
        let (store, _guard) = crate::telemetry::test_span::install_capture();
        let (result, seen) = run_chat(&[
            "data: {\"event\":\"message\",\"answer\":\"1\"}\n\n",
            "data: {oops\n\n",
            "data: {\"event\":\"message\",\"answer\":\"2\"}\n\n",
        ])
        .await;
        let summary = result.unwrap();
        let answers: Vec<_> = seen.iter().filter_map(|e| e.answer.clone()).collect();
        assert_eq!(answers, vec!["1", "2"]);
        assert_eq!(summary.malformed_records, 1);
        assert_eq!(summary.completion, Completion::EndOfStream);

        let warnings = store.at_level(tracing::Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message(), "dropping malformed SSE record");
        assert_eq!(warnings[0].fields.get("raw").map(String::as_str), Some("{oops"));
    }

    #[tokio::test]
    async fn fragmentation_does_not_change_dispatch() {
        let payload = "data: {\"event\":\"message\",\"answer\":\"Hé\"}\n\n\
                       : comment\n\n\
                       data: {\"event\":\"agent_message\",\"answer\":\"x\"}\n\n\
                       data: {\"event\":\"message_end\",\"task_id\":\"t\"}\n\n";
        let (_, whole) = run_chat(&[payload]).await;
        assert_eq!(whole.len(), 3);

        let bytes = payload.as_bytes();
        for step in [1usize, 2, 3, 5, 7, 13] {
            let mut seen = Vec::new();
            {
                let parts: Vec<CoreResult<Bytes>> = bytes
                    .chunks(step)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                let mut op = StreamOperation::<ChatStream, _>::new(|e: ChatStreamEvent| seen.push(e), &cfg());
                op.run(stream::iter(parts), None).await.unwrap();
            }
            assert_eq!(seen, whole, "chunk size {step}");
        }
    }

    #[tokio::test]
    async fn comment_and_blank_records_never_reach_sink() {
        let (result, seen) = run_chat(&[": hello\n\n", "   \n\n", "event: ping\n\n"]).await;
        let summary = result.unwrap();
        assert!(seen.is_empty());
        assert_eq!(summary.skipped_records, 3);
    }

    #[tokio::test]
    async fn end_without_terminal_resolves_and_drops_tail() {
        let (result, seen) = run_chat(&[
            "data: {\"event\":\"message\",\"answer\":\"a\"}\n\n",
            "data: {\"event\":\"message\"}",
        ])
        .await;
        let summary = result.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(summary.completion, Completion::EndOfStream);
        assert_eq!(summary.discarded_tail_bytes, "data: {\"event\":\"message\"}".len() as u64);
    }

    #[tokio::test]
    async fn chat_error_event_is_not_terminal() {
        let (result, seen) = run_chat(&[
            "data: {\"event\":\"error\",\"status\":500,\"code\":\"internal\",\"message\":\"x\"}\n\n",
            "data: {\"event\":\"message_end\"}\n\n",
        ])
        .await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].code.as_deref(), Some("internal"));
        assert_eq!(result.unwrap().terminal_event(), Some("message_end"));
    }

    async fn run_workflow(last: &str) -> (StreamSummary, Vec<WorkflowStreamEvent>) {
        let mut seen = Vec::new();
        let summary = {
            let parts = [
                "data: {\"event\":\"workflow_started\",\"workflow_run_id\":\"r1\",\"task_id\":\"t1\",\"data\":{\"id\":\"r1\"}}\n\n",
                last,
                "data: {\"event\":\"node_started\"}\n\n",
            ];
            let mut op = StreamOperation::<WorkflowStream, _>::new(|e: WorkflowStreamEvent| seen.push(e), &cfg());
            op.run(chunks(&parts), None).await.unwrap()
        };
        (summary, seen)
    }

    #[tokio::test]
    async fn workflow_terminal_variants_all_resolve() {
        for name in ["workflow_finished", "workflow_failed", "error"] {
            let record = format!("data: {{\"event\":\"{name}\"}}\n\n");
            let (summary, seen) = run_workflow(&record).await;
            assert_eq!(seen.len(), 2, "{name}");
            assert_eq!(summary.terminal_event(), Some(name));
        }
    }

    #[tokio::test]
    async fn workflow_defaults_missing_fields() {
        let mut seen = Vec::new();
        {
            let mut op = StreamOperation::<WorkflowStream, _>::new(|e: WorkflowStreamEvent| seen.push(e), &cfg());
            op.run(chunks(&["data: {\"task_id\":\"t\"}\n\n"]), None)
                .await
                .unwrap();
        }
        assert_eq!(seen[0].event, WorkflowEventKind::Unknown);
        assert!(seen[0].data.is_null());
        assert_eq!(seen[0].task_id.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn workflow_null_event_is_dispatched_as_unknown() {
        let mut seen = Vec::new();
        let summary = {
            let mut op = StreamOperation::<WorkflowStream, _>::new(
                |e: WorkflowStreamEvent| seen.push(e),
                &cfg(),
            );
            op.run(
                chunks(&["data: {\"event\":null,\"task_id\":\"t\",\"data\":null}\n\n"]),
                None,
            )
            .await
            .unwrap()
        };
        assert_eq!(summary.malformed_records, 0);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event, WorkflowEventKind::Unknown);
        assert_eq!(seen[0].task_id.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn unmodeled_chat_events_reach_sink_intact() {
        let (result, seen) = run_chat(&[
            "data: {\"event\":\"workflow_started\",\"workflow_run_id\":\"r1\",\"data\":{\"id\":\"r1\"}}\n\n",
            "data: {\"event\":\"message_end\"}\n\n",
        ])
        .await;
        assert_eq!(result.unwrap().events_dispatched, 2);
        assert_eq!(seen[0].event.as_str(), "workflow_started");
        assert_eq!(seen[0].workflow_run_id.as_deref(), Some("r1"));
        assert_eq!(seen[0].data["id"], "r1");
    }

    #[tokio::test]
    async fn transport_error_while_open_rejects() {
        let mut seen: Vec<ChatStreamEvent> = Vec::new();
        let mut op = StreamOperation::<ChatStream, _>::new(|e: ChatStreamEvent| seen.push(e), &cfg());
        let parts: Vec<CoreResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"event\":\"message\"}\n\n")),
            Err(DifyError::StreamTransport("reset".into())),
        ];
        let err = op.run(stream::iter(parts), None).await.unwrap_err();
        assert!(matches!(err, DifyError::StreamTransport(_)));
        assert_eq!(op.state(), StreamState::Rejected);
        drop(op);
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn transport_error_after_terminal_is_ignored() {
        let mut op = StreamOperation::<ChatStream, _>::new(|_e: ChatStreamEvent| {}, &cfg());
        let parts: Vec<CoreResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"event\":\"message_end\"}\n\n")),
            Err(DifyError::StreamTransport("reset".into())),
        ];
        let summary = op.run(stream::iter(parts), None).await.unwrap();
        assert_eq!(summary.terminal_event(), Some("message_end"));
        assert_eq!(op.state(), StreamState::Resolved);
    }

    /// Transport over `parts` that counts how many items were pulled from it.
    fn counted(
        parts: &[&str],
    ) -> (
        Arc<AtomicUsize>,
        impl Stream<Item = CoreResult<Bytes>> + Send + Unpin + 'static,
    ) {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let transport = chunks(parts).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (pulled, transport)
    }

    async fn let_spawned_tasks_run() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn no_drain_stops_at_terminal() {
        let cfg = StreamCfg {
            drain_after_terminal: false,
            ..StreamCfg::default()
        };
        let (pulled, transport) = counted(&[
            "data: {\"event\":\"message_end\"}\n\n",
            "data: more\n\n",
            "data: more\n\n",
        ]);
        let mut op = StreamOperation::<ChatStream, _>::new(|_e: ChatStreamEvent| {}, &cfg);
        let summary = op.run(transport, None).await.unwrap();
        assert_eq!(summary.terminal_event(), Some("message_end"));
        let_spawned_tasks_run().await;
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rest_of_body_drains_in_background() {
        let (pulled, transport) = counted(&[
            "data: {\"event\":\"message_end\"}\n\n",
            "data: {\"event\":\"message\"}\n\n",
            "data: more\n\n",
        ]);
        let mut seen = Vec::new();
        {
            let mut op =
                StreamOperation::<ChatStream, _>::new(|e: ChatStreamEvent| seen.push(e), &cfg());
            op.run(transport, None).await.unwrap();
        }
        let_spawned_tasks_run().await;
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn returns_on_terminal_while_body_stays_open() {
        let mut op = StreamOperation::<ChatStream, _>::new(|_e: ChatStreamEvent| {}, &cfg());
        let transport = stream::iter(vec![Ok(Bytes::from_static(
            b"data: {\"event\":\"message_end\"}\n\n",
        ))])
        .chain(stream::pending());
        let summary = tokio::time::timeout(Duration::from_secs(2), op.run(transport, None))
            .await
            .expect("run must return once message_end arrives")
            .unwrap();
        assert_eq!(summary.terminal_event(), Some("message_end"));
        assert_eq!(op.state(), StreamState::Resolved);
    }

    #[tokio::test]
    async fn workflow_returns_on_finished_while_body_stays_open() {
        let mut op =
            StreamOperation::<WorkflowStream, _>::new(|_e: WorkflowStreamEvent| {}, &cfg());
        let transport = chunks(&["data: {\"event\":\"workflow_finished\",\"data\":{}}\n\n"])
            .chain(stream::pending());
        let summary = tokio::time::timeout(Duration::from_secs(2), op.run(transport, None))
            .await
            .expect("run must return once workflow_finished arrives")
            .unwrap();
        assert_eq!(summary.terminal_event(), Some("workflow_finished"));
    }

    #[tokio::test]
    async fn cancel_while_open_rejects() {
        let token = CancellationToken::new();
        token.cancel();
        let mut op = StreamOperation::<ChatStream, _>::new(|_e: ChatStreamEvent| {}, &cfg());
        // a transport that never yields
        let err = op
            .run(stream::pending::<CoreResult<Bytes>>(), Some(token))
            .await
            .unwrap_err();
        assert!(matches!(err, DifyError::Cancelled));
        assert_eq!(op.state(), StreamState::Rejected);
    }

    #[tokio::test]
    async fn cancel_after_terminal_stops_background_drain() {
        let token = CancellationToken::new();
        let mut op = StreamOperation::<ChatStream, _>::new(|_e: ChatStreamEvent| {}, &cfg());
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let transport = chunks(&["data: {\"event\":\"message_end\"}\n\n"])
            .chain(stream::pending())
            .inspect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let summary = op.run(transport, Some(token.clone())).await.unwrap();
        assert_eq!(summary.terminal_event(), Some("message_end"));
        let_spawned_tasks_run().await;
        token.cancel();
        let_spawned_tasks_run().await;
        assert!(token.is_cancelled());
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_pending_record_rejects() {
        let cfg = StreamCfg {
            max_pending_record_bytes: 16,
            ..StreamCfg::default()
        };
        let mut op = StreamOperation::<ChatStream, _>::new(|_e: ChatStreamEvent| {}, &cfg);
        let err = op
            .run(chunks(&["data: {\"event\":\"message\",\"answer\":\"no delimiter"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DifyError::RecordTooLarge { limit: 16 }));
        assert_eq!(op.state(), StreamState::Rejected);
    }
}
