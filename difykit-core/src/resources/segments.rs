use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::IndexingStatus;
use crate::client::{message_or, seg, DifyClient};
use crate::error::{CoreResult, DifyError};
use crate::model::{Ack, BatchDeleted};
use crate::normalizer::{require_text, require_uuid, require_uuids};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Segment {
    pub id: String,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    pub document_id: String,
    #[serde(default)]
    pub document_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub keyword_list: Vec<String>,
    #[serde(default)]
    pub hit_count: Option<u64>,
    #[serde(default)]
    pub enabled: Option<bool>,
    pub status: IndexingStatus,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Content of a new segment or child chunk.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ChunkContent {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyword_list: Vec<String>,
}

impl ChunkContent {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            keyword_list: Vec::new(),
        }
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keyword_list = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn normalized(mut self) -> CoreResult<Self> {
        self.content = require_text("content", &self.content)?;
        Ok(self)
    }
}

/// PATCH body for a segment or child chunk.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct ChunkUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_list: Option<Vec<String>>,
}

impl ChunkUpdate {
    pub(crate) fn normalized(mut self) -> CoreResult<Self> {
        if let Some(c) = &self.content {
            self.content = Some(require_text("content", c)?);
        }
        Ok(self)
    }
}

pub(crate) fn batch_deleted(body: Value, default_message: &str) -> BatchDeleted {
    BatchDeleted {
        success: true,
        message: message_or(&body, default_message),
        deleted_count: body.get("deleted_count").and_then(Value::as_u64).unwrap_or(0),
    }
}

pub(crate) fn non_empty_batch<T>(items: &[T], field: &str) -> CoreResult<()> {
    if items.is_empty() {
        return Err(DifyError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

impl DifyClient {
    pub async fn create_segment(&self, document_id: &str, segment: ChunkContent) -> CoreResult<Segment> {
        require_uuid("document_id", document_id)?;
        let segment = segment.normalized()?;
        let body = super::with_fields(&segment, &[("document_id", json!(document_id))])?;
        self.post("/segments", &body).await
    }

    pub async fn list_segments(&self, document_id: &str) -> CoreResult<Vec<Segment>> {
        self.get(&format!("/documents/{}/segments", seg(document_id)), &[])
            .await
    }

    pub async fn get_segment(&self, segment_id: &str) -> CoreResult<Segment> {
        self.get(&format!("/segments/{}", seg(segment_id)), &[]).await
    }

    pub async fn update_segment(&self, segment_id: &str, update: ChunkUpdate) -> CoreResult<Segment> {
        let update = update.normalized()?;
        self.patch(&format!("/segments/{}", seg(segment_id)), &update)
            .await
    }

    pub async fn delete_segment(&self, segment_id: &str) -> CoreResult<Ack> {
        self.delete_ack(&format!("/segments/{}", seg(segment_id)), "segment deleted")
            .await
    }

    pub async fn create_segments_batch(
        &self,
        document_id: &str,
        segments: Vec<ChunkContent>,
    ) -> CoreResult<Vec<Segment>> {
        require_uuid("document_id", document_id)?;
        non_empty_batch(&segments, "segments")?;
        let segments = segments
            .into_iter()
            .map(ChunkContent::normalized)
            .collect::<CoreResult<Vec<_>>>()?;
        let body = json!({"document_id": document_id, "segments": segments});
        self.post("/segments/batch", &body).await
    }

    pub async fn delete_segments_batch(&self, segment_ids: &[String]) -> CoreResult<BatchDeleted> {
        require_uuids("segment_ids", segment_ids)?;
        let body: Value = self
            .post("/segments/batch/delete", &json!({"segment_ids": segment_ids}))
            .await?;
        Ok(batch_deleted(body, "segments deleted"))
    }

    pub async fn enable_segment(&self, segment_id: &str) -> CoreResult<Segment> {
        self.post_empty(&format!("/segments/{}/enable", seg(segment_id)))
            .await
    }

    pub async fn disable_segment(&self, segment_id: &str) -> CoreResult<Segment> {
        self.post_empty(&format!("/segments/{}/disable", seg(segment_id)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{DOCUMENT_ID, SEGMENT_ID};
    use httpmock::Method::{GET, PATCH, POST};
    use httpmock::MockServer;

    fn segment_json(status: &str) -> Value {
        json!({
            "id": SEGMENT_ID,
            "position": 1,
            "document_id": DOCUMENT_ID,
            "content": "Refunds take 5 days.",
            "word_count": 4,
            "tokens": 6,
            "keyword_list": ["refund"],
            "status": status,
            "created_at": 1705395332
        })
    }

    #[tokio::test]
    async fn create_sends_document_id_and_keywords() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/segments").json_body(json!({
                "document_id": DOCUMENT_ID,
                "content": "Refunds take 5 days.",
                "keyword_list": ["refund"]
            }));
            then.status(200).json_body(segment_json("completed"));
        });
        let client = DifyClient::new_for_tests(&server.base_url());
        let s = client
            .create_segment(
                DOCUMENT_ID,
                ChunkContent::new("Refunds take 5 days.  ").keywords(["refund"]),
            )
            .await
            .unwrap();
        assert_eq!(s.status, IndexingStatus::Completed);
        m.assert();
    }

    #[tokio::test]
    async fn batch_create_and_delete() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/segments/batch")
                .json_body_partial(format!(r#"{{"document_id":"{DOCUMENT_ID}"}}"#));
            then.status(200)
                .json_body(json!([segment_json("waiting"), segment_json("indexing")]));
        });
        let delete = server.mock(|when, then| {
            when.method(POST)
                .path("/segments/batch/delete")
                .json_body(json!({"segment_ids": [SEGMENT_ID]}));
            then.status(200).json_body(json!({"deleted_count": 1}));
        });
        let client = DifyClient::new_for_tests(&server.base_url());
        let created = client
            .create_segments_batch(DOCUMENT_ID, vec![ChunkContent::new("a"), ChunkContent::new("b")])
            .await
            .unwrap();
        assert_eq!(created[1].status, IndexingStatus::Indexing);

        let deleted = client
            .delete_segments_batch(&[SEGMENT_ID.to_string()])
            .await
            .unwrap();
        assert_eq!(deleted.deleted_count, 1);
        assert_eq!(deleted.message, "segments deleted");
        create.assert();
        delete.assert();
    }

    #[tokio::test]
    async fn batch_validation() {
        let client = DifyClient::new_for_tests("http://127.0.0.1:9");
        assert!(client.create_segments_batch(DOCUMENT_ID, vec![]).await.is_err());
        assert!(client
            .create_segments_batch(DOCUMENT_ID, vec![ChunkContent::new(" ")])
            .await
            .is_err());
        assert!(client.delete_segments_batch(&["x".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn list_update_toggle() {
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET).path(format!("/documents/{DOCUMENT_ID}/segments"));
            then.status(200).json_body(json!([segment_json("completed")]));
        });
        let patch = server.mock(|when, then| {
            when.method(PATCH)
                .path(format!("/segments/{SEGMENT_ID}"))
                .json_body(json!({"keyword_list": ["a", "b"]}));
            then.status(200).json_body(segment_json("completed"));
        });
        let enable = server.mock(|when, then| {
            when.method(POST).path(format!("/segments/{SEGMENT_ID}/enable"));
            then.status(200).json_body(segment_json("completed"));
        });
        let disable = server.mock(|when, then| {
            when.method(POST).path(format!("/segments/{SEGMENT_ID}/disable"));
            then.status(200).json_body(segment_json("failed"));
        });
        let client = DifyClient::new_for_tests(&server.base_url());

        assert_eq!(client.list_segments(DOCUMENT_ID).await.unwrap().len(), 1);
        client
            .update_segment(
                SEGMENT_ID,
                ChunkUpdate {
                    keyword_list: Some(vec!["a".into(), "b".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        client.enable_segment(SEGMENT_ID).await.unwrap();
        let s = client.disable_segment(SEGMENT_ID).await.unwrap();
        assert_eq!(s.status, IndexingStatus::Failed);

        list.assert();
        patch.assert();
        enable.assert();
        disable.assert();
    }
}
