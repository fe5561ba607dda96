use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Document,
    Image,
    Audio,
    Video,
    Custom,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    RemoteUrl,
    LocalFile,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Streaming,
    Blocking,
}

/// A file passed to a chat message or workflow run.
/// `remote_url` needs `url`; `local_file` needs `upload_file_id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InputFileObject {
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub transfer_method: TransferMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_file_id: Option<String>,
}

impl InputFileObject {
    pub fn remote(file_type: FileType, url: impl Into<String>) -> Self {
        Self {
            file_type,
            transfer_method: TransferMethod::RemoteUrl,
            url: Some(url.into()),
            upload_file_id: None,
        }
    }

    pub fn uploaded(file_type: FileType, upload_file_id: impl Into<String>) -> Self {
        Self {
            file_type,
            transfer_method: TransferMethod::LocalFile,
            url: None,
            upload_file_id: Some(upload_file_id.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub prompt_unit_price: String,
    pub prompt_price_unit: String,
    pub prompt_price: String,
    pub completion_tokens: u64,
    pub completion_unit_price: String,
    pub completion_price_unit: String,
    pub completion_price: String,
    pub total_tokens: u64,
    pub total_price: String,
    pub currency: String,
    pub latency: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrieverResource {
    pub position: u32,
    pub dataset_id: String,
    pub dataset_name: String,
    pub document_id: String,
    pub document_name: String,
    pub segment_id: String,
    pub score: f64,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub retriever_resources: Vec<RetrieverResource>,
}

// ---- chat ----

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub query: String,
    pub user: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<InputFileObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_generate_name: Option<bool>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user: user.into(),
            inputs: Map::new(),
            conversation_id: None,
            files: Vec::new(),
            auto_generate_name: None,
        }
    }
}

/// Blocking-mode chat answer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatResponse {
    #[serde(default)]
    pub event: Option<String>,
    pub task_id: String,
    #[serde(default)]
    pub id: Option<String>,
    pub message_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub mode: Option<String>,
    pub answer: String,
    #[serde(default)]
    pub metadata: ResponseMetadata,
    pub created_at: i64,
}

/// `event` of a chat stream record. Names this client does not model are
/// kept verbatim in `Other`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum ChatEventKind {
    Message,
    AgentMessage,
    AgentThought,
    MessageFile,
    MessageReplace,
    TtsMessage,
    TtsMessageEnd,
    Error,
    MessageEnd,
    Other(String),
}

impl ChatEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::AgentMessage => "agent_message",
            Self::AgentThought => "agent_thought",
            Self::MessageFile => "message_file",
            Self::MessageReplace => "message_replace",
            Self::TtsMessage => "tts_message",
            Self::TtsMessageEnd => "tts_message_end",
            Self::Error => "error",
            Self::MessageEnd => "message_end",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ChatEventKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "message" => Self::Message,
            "agent_message" => Self::AgentMessage,
            "agent_thought" => Self::AgentThought,
            "message_file" => Self::MessageFile,
            "message_replace" => Self::MessageReplace,
            "tts_message" => Self::TtsMessage,
            "tts_message_end" => Self::TtsMessageEnd,
            "error" => Self::Error,
            "message_end" => Self::MessageEnd,
            _ => Self::Other(name),
        }
    }
}

impl From<ChatEventKind> for String {
    fn from(kind: ChatEventKind) -> Self {
        match kind {
            ChatEventKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// One decoded record of a chat stream. Fields without a typed slot are
/// kept in `extra`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatStreamEvent {
    pub event: ChatEventKind,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Set on the workflow events an advanced-chat app interleaves.
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    /// Present on `message_end`.
    #[serde(default)]
    pub metadata: Option<ResponseMetadata>,
    #[serde(default)]
    pub data: Value,
    // error events
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---- workflow ----

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkflowRequest {
    pub inputs: Map<String, Value>,
    pub user: String,
}

impl WorkflowRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            inputs: Map::new(),
            user: user.into(),
        }
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Succeeded,
    Failed,
    Stopped,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkflowFinishedData {
    pub id: String,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub outputs: Option<Map<String, Value>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub total_steps: u64,
    pub created_at: i64,
    #[serde(default)]
    pub finished_at: Option<i64>,
}

/// Blocking-mode workflow result.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkflowResponse {
    pub workflow_run_id: String,
    pub task_id: String,
    pub data: WorkflowFinishedData,
}

/// `event` of a workflow stream record. A missing, `null` or empty name is
/// `Unknown`; names this client does not model are kept in `Other`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Default)]
#[serde(from = "String", into = "String")]
pub enum WorkflowEventKind {
    WorkflowStarted,
    NodeStarted,
    NodeFinished,
    TextChunk,
    IterationStarted,
    IterationNext,
    IterationCompleted,
    WorkflowFinished,
    WorkflowFailed,
    Error,
    AgentLog,
    #[default]
    Unknown,
    Other(String),
}

impl WorkflowEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::NodeStarted => "node_started",
            Self::NodeFinished => "node_finished",
            Self::TextChunk => "text_chunk",
            Self::IterationStarted => "iteration_started",
            Self::IterationNext => "iteration_next",
            Self::IterationCompleted => "iteration_completed",
            Self::WorkflowFinished => "workflow_finished",
            Self::WorkflowFailed => "workflow_failed",
            Self::Error => "error",
            Self::AgentLog => "agent_log",
            Self::Unknown => "unknown",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for WorkflowEventKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "workflow_started" => Self::WorkflowStarted,
            "node_started" => Self::NodeStarted,
            "node_finished" => Self::NodeFinished,
            "text_chunk" => Self::TextChunk,
            "iteration_started" => Self::IterationStarted,
            "iteration_next" => Self::IterationNext,
            "iteration_completed" => Self::IterationCompleted,
            "workflow_finished" => Self::WorkflowFinished,
            "workflow_failed" => Self::WorkflowFailed,
            "error" => Self::Error,
            "agent_log" => Self::AgentLog,
            "" | "unknown" => Self::Unknown,
            _ => Self::Other(name),
        }
    }
}

impl From<WorkflowEventKind> for String {
    fn from(kind: WorkflowEventKind) -> Self {
        match kind {
            WorkflowEventKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// One decoded record of a workflow stream. Absent or `null` `event`
/// decodes as `Unknown`, absent `data` as `Null`. Fields without a typed
/// slot are kept in `extra`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct WorkflowStreamEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub event: WorkflowEventKind,
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowStreamEvent {
    /// Typed view of `data` for `workflow_finished` / `workflow_failed`.
    pub fn finished_data(&self) -> Option<WorkflowFinishedData> {
        match self.event {
            WorkflowEventKind::WorkflowFinished | WorkflowEventKind::WorkflowFailed => {
                serde_json::from_value(self.data.clone()).ok()
            }
            _ => None,
        }
    }
}

/// Wire body of a chat or workflow call: the request plus its response mode.
#[derive(Debug, Serialize)]
pub(crate) struct ModeBody<'a, T: Serialize> {
    #[serde(flatten)]
    pub request: &'a T,
    pub response_mode: ResponseMode,
}

// ---- files & acknowledgements ----

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: i64,
}

/// Result of a delete, attach or detach call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BatchDeleted {
    pub success: bool,
    pub message: String,
    pub deleted_count: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BatchAdded {
    pub success: bool,
    pub message: String,
    pub added_count: u64,
}
