use serde::{Deserialize, Serialize};

use crate::client::{seg, DifyClient};
use crate::error::CoreResult;
use crate::model::Ack;
use crate::normalizer::{clean_text, require_text};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub data_source_type: Option<String>,
    #[serde(default)]
    pub indexing_technique: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreateDatasetRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub provider: String,
    pub permission: String,
    pub data_source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing_technique: Option<String>,
}

impl CreateDatasetRequest {
    /// `vendor` provider, `only_me` permission, `upload_file` source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            provider: "vendor".into(),
            permission: "only_me".into(),
            data_source_type: "upload_file".into(),
            indexing_technique: None,
        }
    }
}

/// PATCH body; unset fields are left alone.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct DatasetUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexing_technique: Option<String>,
}

impl DifyClient {
    pub async fn create_dataset(&self, mut req: CreateDatasetRequest) -> CoreResult<Dataset> {
        req.name = require_text("name", &req.name)?;
        req.description = req.description.map(|d| clean_text(&d));
        self.post("/datasets", &req).await
    }

    pub async fn list_datasets(&self) -> CoreResult<Vec<Dataset>> {
        self.get("/datasets", &[]).await
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> CoreResult<Dataset> {
        self.get(&format!("/datasets/{}", seg(dataset_id)), &[]).await
    }

    pub async fn update_dataset(&self, dataset_id: &str, mut update: DatasetUpdate) -> CoreResult<Dataset> {
        if let Some(name) = &update.name {
            update.name = Some(require_text("name", name)?);
        }
        self.patch(&format!("/datasets/{}", seg(dataset_id)), &update)
            .await
    }

    pub async fn delete_dataset(&self, dataset_id: &str) -> CoreResult<Ack> {
        self.delete_ack(&format!("/datasets/{}", seg(dataset_id)), "dataset deleted")
            .await
    }
}
