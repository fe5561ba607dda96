use crate::error::{CoreResult, DifyError};
use crate::model::{ChatRequest, InputFileObject, TransferMethod, WorkflowRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_TOP_K: u32 = 4;
pub const MAX_TOP_K: u32 = 100;

static UUID_RE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
});

pub(crate) fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

pub(crate) fn clamp_round_f32(x: f32, lo: f32, hi: f32, dp: u32) -> f32 {
    let clamped = x.clamp(lo, hi);
    let p = 10f32.powi(dp as i32);
    (clamped * p).round() / p
}

/// Cleaned text, or a validation error naming `field` if nothing is left.
pub(crate) fn require_text(field: &str, s: &str) -> CoreResult<String> {
    let t = clean_text(s);
    if t.is_empty() {
        return Err(DifyError::Validation(format!("{field} must not be empty")));
    }
    Ok(t)
}

pub(crate) fn require_uuid(field: &str, s: &str) -> CoreResult<()> {
    let re = UUID_RE
        .as_ref()
        .map_err(|e| DifyError::Other(anyhow::anyhow!("uuid pattern: {e}")))?;
    if !re.is_match(s) {
        return Err(DifyError::Validation(format!(
            "{field} must be a UUID, got '{s}'"
        )));
    }
    Ok(())
}

pub(crate) fn require_uuids(field: &str, ids: &[String]) -> CoreResult<()> {
    if ids.is_empty() {
        return Err(DifyError::Validation(format!("{field} must not be empty")));
    }
    ids.iter().try_for_each(|id| require_uuid(field, id))
}

pub(crate) fn validate_file(f: &InputFileObject) -> CoreResult<()> {
    match f.transfer_method {
        TransferMethod::RemoteUrl => {
            let url = f.url.as_deref().unwrap_or_default();
            if reqwest::Url::parse(url).is_err() {
                return Err(DifyError::Validation(
                    "remote_url file needs a valid url".into(),
                ));
            }
        }
        TransferMethod::LocalFile => match f.upload_file_id.as_deref() {
            Some(id) => require_uuid("upload_file_id", id)?,
            None => {
                return Err(DifyError::Validation(
                    "local_file file needs upload_file_id".into(),
                ));
            }
        },
    }
    Ok(())
}

pub fn normalize_chat(mut req: ChatRequest) -> CoreResult<ChatRequest> {
    req.query = require_text("query", &req.query)?;
    req.user = require_text("user", &req.user)?;
    if let Some(id) = &req.conversation_id {
        require_uuid("conversation_id", id)?;
    }
    req.files.iter().try_for_each(validate_file)?;
    Ok(req)
}

pub fn normalize_workflow(mut req: WorkflowRequest) -> CoreResult<WorkflowRequest> {
    req.user = require_text("user", &req.user)?;
    validate_file_inputs(&req.inputs)?;
    Ok(req)
}

/// Arrays of file objects inside workflow `inputs` follow the same
/// remote_url / local_file rules as chat files.
fn validate_file_inputs(inputs: &Map<String, Value>) -> CoreResult<()> {
    for (key, value) in inputs {
        let Value::Array(items) = value else {
            continue;
        };
        if !items.iter().any(|item| item.get("transfer_method").is_some()) {
            continue;
        }
        let files: Vec<InputFileObject> = serde_json::from_value(value.clone())
            .map_err(|e| DifyError::Validation(format!("inputs.{key}: {e}")))?;
        files.iter().try_for_each(validate_file)?;
    }
    Ok(())
}

/// Default 4, clamped to 1..=100.
pub fn clamp_top_k(top_k: Option<u32>) -> u32 {
    top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K)
}

/// Clamped to 0..=1, rounded to 4 decimals.
pub fn clamp_score(score: Option<f32>) -> Option<f32> {
    score.map(|s| clamp_round_f32(s, 0.0, 1.0, 4))
}
