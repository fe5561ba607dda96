//! Workflow runs: blocking and streamed.

use tokio_util::sync::CancellationToken;

use crate::client::DifyClient;
use crate::error::CoreResult;
use crate::model::{WorkflowEventKind, WorkflowRequest, WorkflowResponse, WorkflowStreamEvent};
use crate::normalizer::normalize_workflow;
use crate::stream::{EventSink, StreamProtocol, StreamSummary};

pub const WORKFLOW_ENDPOINT: &str = "/workflows/run";

/// Workflow event stream. `workflow_finished`, `workflow_failed` and
/// `error` all resolve the call; [`StreamSummary::terminal_event`] tells
/// them apart.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowStream;

impl StreamProtocol for WorkflowStream {
    type Event = WorkflowStreamEvent;

    const NAME: &'static str = "workflow";
    const ENDPOINT: &'static str = WORKFLOW_ENDPOINT;

    fn is_terminal(event: &WorkflowStreamEvent) -> bool {
        matches!(
            event.event,
            WorkflowEventKind::WorkflowFinished
                | WorkflowEventKind::WorkflowFailed
                | WorkflowEventKind::Error
        )
    }

    fn event_name(event: &WorkflowStreamEvent) -> &str {
        event.event.as_str()
    }
}

impl DifyClient {
    pub async fn run_workflow(&self, req: WorkflowRequest) -> CoreResult<WorkflowResponse> {
        let req = normalize_workflow(req)?;
        self.blocking(WORKFLOW_ENDPOINT, &req).await
    }

    pub async fn run_workflow_streaming<S>(
        &self,
        req: WorkflowRequest,
        sink: S,
    ) -> CoreResult<StreamSummary>
    where
        S: EventSink<WorkflowStreamEvent>,
    {
        let req = normalize_workflow(req)?;
        self.stream::<WorkflowStream, _, _>(&req, sink, None).await
    }

    pub async fn run_workflow_streaming_cancellable<S>(
        &self,
        req: WorkflowRequest,
        sink: S,
        cancel: CancellationToken,
    ) -> CoreResult<StreamSummary>
    where
        S: EventSink<WorkflowStreamEvent>,
    {
        let req = normalize_workflow(req)?;
        self.stream::<WorkflowStream, _, _>(&req, sink, Some(cancel))
            .await
    }
}
