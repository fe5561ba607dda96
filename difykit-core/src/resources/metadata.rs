use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ResourceOwner, SearchScope};
use crate::client::{seg, DifyClient};
use crate::error::CoreResult;
use crate::model::Ack;
use crate::normalizer::require_text;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub key: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub value_type: MetadataType,
}

impl Metadata {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: None,
            key: key.into(),
            value: value.into(),
            value_type: MetadataType::String,
        }
    }

    pub fn typed(mut self, value_type: MetadataType) -> Self {
        self.value_type = value_type;
        self
    }

    fn normalized(mut self) -> CoreResult<Self> {
        self.key = require_text("key", &self.key)?;
        Ok(self)
    }
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<MetadataType>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

impl MatchOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
        }
    }
}

impl DifyClient {
    pub async fn add_metadata(&self, owner: &ResourceOwner, metadata: Metadata) -> CoreResult<Metadata> {
        let metadata = metadata.normalized()?;
        let body = super::with_fields(&metadata, &[(owner.id_field(), json!(owner.id()))])?;
        self.post(&format!("{}/metadata", owner.path()), &body).await
    }

    pub async fn list_metadata(&self, owner: &ResourceOwner) -> CoreResult<Vec<Metadata>> {
        self.get(&format!("{}/metadata", owner.path()), &[]).await
    }

    pub async fn update_metadata(
        &self,
        owner: &ResourceOwner,
        metadata_id: &str,
        mut update: MetadataUpdate,
    ) -> CoreResult<Metadata> {
        if let Some(k) = &update.key {
            update.key = Some(require_text("key", k)?);
        }
        let path = format!("{}/metadata/{}", owner.path(), seg(metadata_id));
        self.patch(&path, &update).await
    }

    pub async fn delete_metadata(&self, owner: &ResourceOwner, metadata_id: &str) -> CoreResult<Ack> {
        let path = format!("{}/metadata/{}", owner.path(), seg(metadata_id));
        let default = format!("{} metadata deleted", owner.label());
        self.delete_ack(&path, &default).await
    }

    pub async fn add_metadata_batch(
        &self,
        owner: &ResourceOwner,
        items: Vec<Metadata>,
    ) -> CoreResult<Vec<Metadata>> {
        super::segments::non_empty_batch(&items, "metadata")?;
        let items = items
            .into_iter()
            .map(Metadata::normalized)
            .collect::<CoreResult<Vec<_>>>()?;
        let body = json!({ owner.id_field(): owner.id(), "metadata": items });
        self.post(&format!("{}/metadata/batch", owner.path()), &body)
            .await
    }

    /// Documents or segments of a dataset whose metadata `key` matches `value`.
    pub async fn search_by_metadata(
        &self,
        dataset_id: &str,
        scope: SearchScope,
        key: &str,
        value: &str,
        operator: Option<MatchOperator>,
    ) -> CoreResult<Vec<Value>> {
        let key = require_text("metadata_key", key)?;
        let mut query = vec![("metadata_key", key), ("metadata_value", value.to_string())];
        if let Some(op) = operator {
            query.push(("operator", op.as_str().to_string()));
        }
        let path = format!(
            "/datasets/{}/{}/search-by-metadata",
            seg(dataset_id),
            scope.path()
        );
        self.get(&path, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{DATASET_ID, DOCUMENT_ID, SEGMENT_ID};
    use httpmock::Method::{DELETE, GET, PATCH, POST};
    use httpmock::MockServer;

    #[tokio::test]
    async fn add_to_document_includes_owner_id() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path(format!("/documents/{DOCUMENT_ID}/metadata"))
                .json_body(json!({
                    "document_id": DOCUMENT_ID,
                    "key": "author",
                    "value": "Ann",
                    "type": "string"
                }));
            then.status(200)
                .json_body(json!({"id": "m1", "key": "author", "value": "Ann", "type": "string"}));
        });
        let client = DifyClient::new_for_tests(&server.base_url());
        let md = client
            .add_metadata(
                &ResourceOwner::Document(DOCUMENT_ID.into()),
                Metadata::new(" author ", "Ann"),
            )
            .await
            .unwrap();
        assert_eq!(md.id.as_deref(), Some("m1"));
        m.assert();
    }

    #[tokio::test]
    async fn segment_metadata_list_update_delete_batch() {
        let server = MockServer::start();
        let base = format!("/segments/{SEGMENT_ID}/metadata");
        let list = server.mock(|when, then| {
            when.method(GET).path(base.as_str());
            then.status(200)
                .json_body(json!([{"key": "lang", "value": "en"}, {"key": "n", "value": "3", "type": "number"}]));
        });
        let patch = server.mock(|when, then| {
            when.method(PATCH)
                .path(format!("{base}/m1"))
                .json_body(json!({"value": "fr"}));
            then.status(200).json_body(json!({"key": "lang", "value": "fr"}));
        });
        let del = server.mock(|when, then| {
            when.method(DELETE).path(format!("{base}/m1"));
            then.status(200).json_body(json!({}));
        });
        let batch = server.mock(|when, then| {
            when.method(POST).path(format!("{base}/batch")).json_body(json!({
                "segment_id": SEGMENT_ID,
                "metadata": [{"key": "a", "value": "1", "type": "number"}]
            }));
            then.status(200)
                .json_body(json!([{"key": "a", "value": "1", "type": "number"}]));
        });
        let client = DifyClient::new_for_tests(&server.base_url());
        let owner = ResourceOwner::Segment(SEGMENT_ID.into());

        let all = client.list_metadata(&owner).await.unwrap();
        assert_eq!(all[0].value_type, MetadataType::String);
        assert_eq!(all[1].value_type, MetadataType::Number);
        let updated = client
            .update_metadata(
                &owner,
                "m1",
                MetadataUpdate {
                    value: Some("fr".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.value, "fr");
        let ack = client.delete_metadata(&owner, "m1").await.unwrap();
        assert_eq!(ack.message, "segment metadata deleted");
        let added = client
            .add_metadata_batch(&owner, vec![Metadata::new("a", "1").typed(MetadataType::Number)])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);

        for m in [list, patch, del, batch] {
            m.assert();
        }
    }

    #[tokio::test]
    async fn search_sends_query_params() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET)
                .path(format!("/datasets/{DATASET_ID}/documents/search-by-metadata"))
                .query_param("metadata_key", "author")
                .query_param("metadata_value", "Ann")
                .query_param("operator", "starts_with");
            then.status(200).json_body(json!([{"id": DOCUMENT_ID}]));
        });
        let client = DifyClient::new_for_tests(&server.base_url());
        let hits = client
            .search_by_metadata(
                DATASET_ID,
                SearchScope::Documents,
                "author",
                "Ann",
                Some(MatchOperator::StartsWith),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        m.assert();
    }

    #[tokio::test]
    async fn blank_key_is_rejected() {
        let client = DifyClient::new_for_tests("http://127.0.0.1:9");
        let owner = ResourceOwner::Document(DOCUMENT_ID.into());
        assert!(client.add_metadata(&owner, Metadata::new("", "v")).await.is_err());
        assert!(client.add_metadata_batch(&owner, vec![]).await.is_err());
    }
}
