use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};

use crate::client::{seg, DifyClient};
use crate::error::{CoreResult, DifyError};
use crate::files::{self, FileSource};
use crate::model::Ack;
use crate::normalizer::{require_text, require_uuid};

/// Filename used for in-memory uploads that carry no name.
const FALLBACK_FILENAME: &str = "uploaded_file";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DatasetDocument {
    pub id: String,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub document_name: Option<String>,
    #[serde(default)]
    pub segment_id: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub word_count: Option<u64>,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub keyword_list: Vec<String>,
    #[serde(default)]
    pub hit_count: Option<u64>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    Automatic,
    Custom,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ChunkRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_overlap: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub separators: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProcessRule {
    pub mode: ProcessMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<ChunkRules>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreateDocumentRequest {
    pub dataset_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_document_id: Option<String>,
    pub indexing_technique: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_rule: Option<ProcessRule>,
}

impl CreateDocumentRequest {
    /// Indexing technique defaults to `high_quality`.
    pub fn new(dataset_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            name: name.into(),
            description: None,
            original_document_id: None,
            indexing_technique: "high_quality".into(),
            process_rule: None,
        }
    }
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexing_technique: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_rule: Option<ProcessRule>,
}

/// A file to add to a dataset as a new document.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub dataset_id: String,
    pub source: FileSource,
    /// Sent as the document name and used as the multipart filename.
    pub name: Option<String>,
    pub description: Option<String>,
    pub indexing_technique: Option<String>,
    pub process_rule: Option<ProcessRule>,
}

impl DocumentUpload {
    pub fn new(dataset_id: impl Into<String>, source: FileSource) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            source,
            name: None,
            description: None,
            indexing_technique: None,
            process_rule: None,
        }
    }
}

impl DifyClient {
    pub async fn create_document(&self, mut req: CreateDocumentRequest) -> CoreResult<DatasetDocument> {
        require_uuid("dataset_id", &req.dataset_id)?;
        req.name = require_text("name", &req.name)?;
        if let Some(orig) = &req.original_document_id {
            require_uuid("original_document_id", orig)?;
        }
        self.post("/documents", &req).await
    }

    pub async fn upload_document(&self, upload: DocumentUpload) -> CoreResult<DatasetDocument> {
        require_uuid("dataset_id", &upload.dataset_id)?;
        let filename = match (&upload.name, &upload.source) {
            (Some(name), _) => Some(name.as_str()),
            (None, FileSource::Bytes(_)) => Some(FALLBACK_FILENAME),
            (None, FileSource::Path(_)) => None,
        };
        let file = files::load(&upload.source, filename, None).await?;

        let mut form = Form::new()
            .part("file", file.into_part()?)
            .text("dataset_id", upload.dataset_id);
        if let Some(name) = upload.name {
            form = form.text("name", name);
        }
        if let Some(description) = upload.description {
            form = form.text("description", description);
        }
        if let Some(technique) = upload.indexing_technique {
            form = form.text("indexing_technique", technique);
        }
        if let Some(rule) = &upload.process_rule {
            let json = serde_json::to_string(rule)
                .map_err(|e| DifyError::Validation(format!("process_rule: {e}")))?;
            form = form.text("process_rule", json);
        }
        self.post_form("/documents/upload", form).await
    }

    pub async fn list_documents(&self, dataset_id: &str) -> CoreResult<Vec<DatasetDocument>> {
        self.get(&format!("/datasets/{}/documents", seg(dataset_id)), &[])
            .await
    }

    pub async fn get_document(&self, document_id: &str) -> CoreResult<DatasetDocument> {
        self.get(&format!("/documents/{}", seg(document_id)), &[]).await
    }

    pub async fn update_document(
        &self,
        document_id: &str,
        update: DocumentUpdate,
    ) -> CoreResult<DatasetDocument> {
        self.patch(&format!("/documents/{}", seg(document_id)), &update)
            .await
    }

    pub async fn delete_document(&self, document_id: &str) -> CoreResult<Ack> {
        self.delete_ack(&format!("/documents/{}", seg(document_id)), "document deleted")
            .await
    }
}
