//! Knowledge-base management endpoints. Each submodule adds methods to
//! [`DifyClient`](crate::client::DifyClient) and defines its wire types.

pub mod child_chunks;
pub mod datasets;
pub mod documents;
pub mod metadata;
pub mod retrieval;
pub mod segments;
pub mod tags;

use serde::{Deserialize, Serialize};

use crate::client::seg;

/// A document or segment that metadata and tags hang off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOwner {
    Document(String),
    Segment(String),
}

impl ResourceOwner {
    pub fn id(&self) -> &str {
        match self {
            Self::Document(id) | Self::Segment(id) => id,
        }
    }

    /// Name of the id field the server expects in request bodies.
    pub(crate) fn id_field(&self) -> &'static str {
        match self {
            Self::Document(_) => "document_id",
            Self::Segment(_) => "segment_id",
        }
    }

    /// `/documents/{id}` or `/segments/{id}`.
    pub(crate) fn path(&self) -> String {
        match self {
            Self::Document(id) => format!("/documents/{}", seg(id)),
            Self::Segment(id) => format!("/segments/{}", seg(id)),
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Document(_) => "document",
            Self::Segment(_) => "segment",
        }
    }
}

/// Which items of a dataset a search returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Documents,
    Segments,
}

impl SearchScope {
    pub(crate) fn path(self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Segments => "segments",
        }
    }
}

/// Indexing state shared by segments and child chunks.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexingStatus {
    Waiting,
    Indexing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Merge `extra` fields into the JSON object form of `body`.
pub(crate) fn with_fields<T: Serialize>(
    body: &T,
    extra: &[(&str, serde_json::Value)],
) -> crate::error::CoreResult<serde_json::Value> {
    let mut v = serde_json::to_value(body)
        .map_err(|e| crate::error::DifyError::Validation(format!("unserializable body: {e}")))?;
    if let Some(map) = v.as_object_mut() {
        for (k, val) in extra {
            map.insert((*k).to_string(), val.clone());
        }
    }
    Ok(v)
}
