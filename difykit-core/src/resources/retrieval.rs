//! Knowledge retrieval. Every query is normalized first: text cleaned,
//! dataset ids checked, `top_k` clamped to 1..=100 (default 4) and
//! `score_threshold` to 0..=1.

use serde::{Deserialize, Serialize};

use super::metadata::MatchOperator;
use crate::client::{seg, DifyClient};
use crate::error::CoreResult;
use crate::normalizer::{
    clamp_round_f32, clamp_score, clamp_top_k, require_text, require_uuid, require_uuids,
};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    #[default]
    SemanticSearch,
    FullTextSearch,
    HybridSearch,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrievedChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
    pub dataset_id: String,
    #[serde(default)]
    pub dataset_name: Option<String>,
    pub document_id: String,
    #[serde(default)]
    pub document_name: Option<String>,
    pub segment_id: String,
    pub score: f64,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrievalResponse {
    pub query: String,
    #[serde(default)]
    pub documents: Vec<RetrievedChunk>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub query: String,
    pub dataset_id: String,
    pub top_k: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
    pub retrieve_strategy: SearchMethod,
}

impl RetrievalQuery {
    pub fn new(query: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            dataset_id: dataset_id.into(),
            top_k: crate::normalizer::DEFAULT_TOP_K,
            score_threshold: None,
            retrieve_strategy: SearchMethod::default(),
        }
    }

    fn normalized(mut self) -> CoreResult<Self> {
        self.query = require_text("query", &self.query)?;
        require_uuid("dataset_id", &self.dataset_id)?;
        self.top_k = clamp_top_k(Some(self.top_k));
        self.score_threshold = clamp_score(self.score_threshold);
        Ok(self)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MultiRetrievalQuery {
    pub query: String,
    pub dataset_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieve_strategy: Option<SearchMethod>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MetadataFilter {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<MatchOperator>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RetrievalFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segment_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_filters: Vec<MetadataFilter>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RerankingModel {
    pub reranking_provider_name: String,
    pub reranking_model_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BoostField {
    pub field_name: String,
    pub boost_factor: f32,
}

/// Hybrid search; both weights default to 0.5 and are clamped to 0..=1.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HybridSearchQuery {
    pub query: String,
    pub dataset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_weight: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulltext_weight: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranking_model: Option<RerankingModel>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AdvancedRetrievalQuery {
    #[serde(flatten)]
    pub base: RetrievalQuery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranking_enable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranking_model: Option<RerankingModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<RetrievalFilters>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boost_fields: Vec<BoostField>,
}

#[derive(Debug, Serialize)]
struct FilteredBody {
    #[serde(flatten)]
    base: RetrievalQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<RetrievalFilters>,
}

#[derive(Debug, Serialize)]
struct SimilarityBody {
    query: String,
    dataset_id: String,
    top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    score_threshold: Option<f32>,
    search_method: SearchMethod,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QueryStat {
    pub query: String,
    pub count: u64,
    pub average_score: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DocumentHits {
    pub document_id: String,
    #[serde(default)]
    pub document_name: Option<String>,
    pub hit_count: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrievalStats {
    pub total_queries: u64,
    pub average_score: f64,
    #[serde(default)]
    pub top_queries: Vec<QueryStat>,
    #[serde(default)]
    pub document_hit_counts: Vec<DocumentHits>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Suggestion {
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrievalSuggestions {
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

pub const DEFAULT_SUGGESTION_LIMIT: u32 = 5;

impl DifyClient {
    pub async fn retrieve(&self, query: RetrievalQuery) -> CoreResult<RetrievalResponse> {
        let query = query.normalized()?;
        self.post("/datasets/retrieval", &query).await
    }

    pub async fn retrieve_multi(&self, mut query: MultiRetrievalQuery) -> CoreResult<RetrievalResponse> {
        query.query = require_text("query", &query.query)?;
        require_uuids("dataset_ids", &query.dataset_ids)?;
        query.top_k = Some(clamp_top_k(query.top_k));
        query.score_threshold = clamp_score(query.score_threshold);
        self.post("/datasets/multi-retrieval", &query).await
    }

    pub async fn retrieve_with_filters(
        &self,
        query: RetrievalQuery,
        filters: Option<RetrievalFilters>,
    ) -> CoreResult<RetrievalResponse> {
        let body = FilteredBody {
            base: query.normalized()?,
            filters,
        };
        self.post("/datasets/retrieval-with-filters", &body).await
    }

    pub async fn hybrid_search(&self, mut query: HybridSearchQuery) -> CoreResult<RetrievalResponse> {
        query.query = require_text("query", &query.query)?;
        require_uuid("dataset_id", &query.dataset_id)?;
        query.top_k = Some(clamp_top_k(query.top_k));
        query.score_threshold = clamp_score(query.score_threshold);
        let weight = |w: Option<f32>| Some(clamp_round_f32(w.unwrap_or(0.5), 0.0, 1.0, 4));
        query.semantic_weight = weight(query.semantic_weight);
        query.fulltext_weight = weight(query.fulltext_weight);
        self.post("/datasets/hybrid-search", &query).await
    }

    /// Same parameters as [`retrieve`](Self::retrieve), sent as `search_method`.
    pub async fn similarity_search(&self, query: RetrievalQuery) -> CoreResult<RetrievalResponse> {
        let q = query.normalized()?;
        let body = SimilarityBody {
            query: q.query,
            dataset_id: q.dataset_id,
            top_k: q.top_k,
            score_threshold: q.score_threshold,
            search_method: q.retrieve_strategy,
        };
        self.post("/datasets/similarity-search", &body).await
    }

    pub async fn advanced_retrieval(&self, mut query: AdvancedRetrievalQuery) -> CoreResult<RetrievalResponse> {
        query.base = query.base.normalized()?;
        self.post("/datasets/advanced-retrieval", &query).await
    }

    /// Query statistics for a dataset, optionally bounded by epoch seconds.
    pub async fn retrieval_stats(
        &self,
        dataset_id: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> CoreResult<RetrievalStats> {
        let mut query = Vec::new();
        if let Some(t) = start_time {
            query.push(("start_time", t.to_string()));
        }
        if let Some(t) = end_time {
            query.push(("end_time", t.to_string()));
        }
        self.get(&format!("/datasets/{}/retrieval-stats", seg(dataset_id)), &query)
            .await
    }

    pub async fn retrieval_suggestions(
        &self,
        dataset_id: &str,
        query: &str,
        limit: Option<u32>,
    ) -> CoreResult<RetrievalSuggestions> {
        let query = require_text("query", query)?;
        let limit = limit.unwrap_or(DEFAULT_SUGGESTION_LIMIT);
        self.get(
            &format!("/datasets/{}/retrieval-suggestions", seg(dataset_id)),
            &[("query", query), ("limit", limit.to_string())],
        )
        .await
    }
}
