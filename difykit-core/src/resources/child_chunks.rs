use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::segments::{batch_deleted, non_empty_batch, ChunkContent, ChunkUpdate};
use super::IndexingStatus;
use crate::client::{seg, DifyClient};
use crate::error::CoreResult;
use crate::model::{Ack, BatchDeleted};
use crate::normalizer::{require_uuid, require_uuids};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChildChunk {
    pub id: String,
    pub segment_id: String,
    pub content: String,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub keyword_list: Vec<String>,
    pub status: IndexingStatus,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl DifyClient {
    pub async fn create_child_chunk(&self, segment_id: &str, chunk: ChunkContent) -> CoreResult<ChildChunk> {
        require_uuid("segment_id", segment_id)?;
        let chunk = chunk.normalized()?;
        let body = super::with_fields(&chunk, &[("segment_id", json!(segment_id))])?;
        self.post("/child-chunks", &body).await
    }

    pub async fn list_child_chunks(&self, segment_id: &str) -> CoreResult<Vec<ChildChunk>> {
        self.get(&format!("/segments/{}/child-chunks", seg(segment_id)), &[])
            .await
    }

    pub async fn get_child_chunk(&self, chunk_id: &str) -> CoreResult<ChildChunk> {
        self.get(&format!("/child-chunks/{}", seg(chunk_id)), &[]).await
    }

    pub async fn update_child_chunk(&self, chunk_id: &str, update: ChunkUpdate) -> CoreResult<ChildChunk> {
        let update = update.normalized()?;
        self.patch(&format!("/child-chunks/{}", seg(chunk_id)), &update)
            .await
    }

    pub async fn delete_child_chunk(&self, chunk_id: &str) -> CoreResult<Ack> {
        self.delete_ack(&format!("/child-chunks/{}", seg(chunk_id)), "child chunk deleted")
            .await
    }

    pub async fn create_child_chunks_batch(
        &self,
        segment_id: &str,
        chunks: Vec<ChunkContent>,
    ) -> CoreResult<Vec<ChildChunk>> {
        require_uuid("segment_id", segment_id)?;
        non_empty_batch(&chunks, "child_chunks")?;
        let chunks = chunks
            .into_iter()
            .map(ChunkContent::normalized)
            .collect::<CoreResult<Vec<_>>>()?;
        let body = json!({"segment_id": segment_id, "child_chunks": chunks});
        self.post("/child-chunks/batch", &body).await
    }

    pub async fn delete_child_chunks_batch(&self, chunk_ids: &[String]) -> CoreResult<BatchDeleted> {
        require_uuids("child_chunk_ids", chunk_ids)?;
        let body: Value = self
            .post("/child-chunks/batch/delete", &json!({"child_chunk_ids": chunk_ids}))
            .await?;
        Ok(batch_deleted(body, "child chunks deleted"))
    }

    pub async fn enable_child_chunk(&self, chunk_id: &str) -> CoreResult<ChildChunk> {
        self.post_empty(&format!("/child-chunks/{}/enable", seg(chunk_id)))
            .await
    }

    pub async fn disable_child_chunk(&self, chunk_id: &str) -> CoreResult<ChildChunk> {
        self.post_empty(&format!("/child-chunks/{}/disable", seg(chunk_id)))
            .await
    }
}
