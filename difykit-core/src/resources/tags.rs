use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ResourceOwner, SearchScope};
use crate::client::{message_or, seg, DifyClient};
use crate::error::CoreResult;
use crate::model::{Ack, BatchAdded};
use crate::normalizer::{require_text, require_uuids};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KnowledgeTag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct CreateTagRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct TagUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// How multiple tag ids combine in a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagOperator {
    And,
    #[default]
    Or,
}

impl TagOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl DifyClient {
    pub async fn create_tag(&self, mut req: CreateTagRequest) -> CoreResult<KnowledgeTag> {
        req.name = require_text("name", &req.name)?;
        self.post("/knowledge-tags", &req).await
    }

    pub async fn list_tags(&self) -> CoreResult<Vec<KnowledgeTag>> {
        self.get("/knowledge-tags", &[]).await
    }

    pub async fn get_tag(&self, tag_id: &str) -> CoreResult<KnowledgeTag> {
        self.get(&format!("/knowledge-tags/{}", seg(tag_id)), &[]).await
    }

    pub async fn update_tag(&self, tag_id: &str, mut update: TagUpdate) -> CoreResult<KnowledgeTag> {
        if let Some(name) = &update.name {
            update.name = Some(require_text("name", name)?);
        }
        self.patch(&format!("/knowledge-tags/{}", seg(tag_id)), &update)
            .await
    }

    pub async fn delete_tag(&self, tag_id: &str) -> CoreResult<Ack> {
        self.delete_ack(&format!("/knowledge-tags/{}", seg(tag_id)), "tag deleted")
            .await
    }

    pub async fn attach_tag(&self, owner: &ResourceOwner, tag_id: &str) -> CoreResult<Ack> {
        let body = json!({ owner.id_field(): owner.id(), "tag_id": tag_id });
        let resp: Value = self.post(&format!("{}/tags", owner.path()), &body).await?;
        Ok(Ack {
            success: true,
            message: message_or(&resp, "tag added"),
        })
    }

    pub async fn detach_tag(&self, owner: &ResourceOwner, tag_id: &str) -> CoreResult<Ack> {
        let path = format!("{}/tags/{}", owner.path(), seg(tag_id));
        self.delete_ack(&path, "tag removed").await
    }

    pub async fn list_owner_tags(&self, owner: &ResourceOwner) -> CoreResult<Vec<KnowledgeTag>> {
        self.get(&format!("{}/tags", owner.path()), &[]).await
    }

    pub async fn attach_tags_batch(
        &self,
        owner: &ResourceOwner,
        tag_ids: &[String],
    ) -> CoreResult<BatchAdded> {
        require_uuids("tag_ids", tag_ids)?;
        let body = json!({ owner.id_field(): owner.id(), "tag_ids": tag_ids });
        let resp: Value = self
            .post(&format!("{}/tags/batch", owner.path()), &body)
            .await?;
        Ok(BatchAdded {
            success: true,
            message: message_or(&resp, "tags added"),
            added_count: resp.get("added_count").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    /// Documents or segments of a dataset carrying the given tags.
    pub async fn search_by_tags(
        &self,
        dataset_id: &str,
        scope: SearchScope,
        tag_ids: &[String],
        operator: TagOperator,
    ) -> CoreResult<Vec<Value>> {
        require_uuids("tag_ids", tag_ids)?;
        let mut query: Vec<(&str, String)> =
            tag_ids.iter().map(|id| ("tag_ids[]", id.clone())).collect();
        query.push(("operator", operator.as_str().to_string()));
        let path = format!("/datasets/{}/{}/search-by-tags", seg(dataset_id), scope.path());
        self.get(&path, &query).await
    }
}
