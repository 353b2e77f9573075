//! Search half of the Persistence Gateway: the deduplicated-projection index
//! and the percolator that drives the Automation Dispatcher.
//!
//! Grounded in the client-construction and index-management style of
//! `OpenSearchVectorStore`, adapted from a k-NN vector index to a plain
//! text/term index plus a `percolator`-typed query store.

use destiny_common::{DestinyError, PercolationDocument, Result};
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::{DeleteParts, GetParts, IndexParts, OpenSearch, SearchParts};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

const PROJECTION_INDEX: &str = "destiny-projections";
const PERCOLATOR_INDEX: &str = "destiny-automations";

#[derive(Clone)]
pub struct SearchIndex {
    client: OpenSearch,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub reference_id: Uuid,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct PercolateHit {
    pub automation_id: Uuid,
}

/// Candidate-recall query (spec §4.E phase 2): phrase match on title,
/// should-match on authors, year band ±1, restricted to canonical documents.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub title: String,
    pub authors: Vec<String>,
    pub publication_year: Option<i32>,
    pub top_k: usize,
}

impl SearchIndex {
    pub async fn new(url: &str) -> Result<Self> {
        let parsed = url
            .parse()
            .map_err(|e| DestinyError::Config(format!("invalid search_url '{url}': {e}")))?;
        let conn_pool = SingleNodeConnectionPool::new(parsed);
        let transport = TransportBuilder::new(conn_pool)
            .build()
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch transport: {e}")))?;
        let client = OpenSearch::new(transport);

        let store = Self { client };
        store.ensure_indices().await?;
        Ok(store)
    }

    async fn ensure_indices(&self) -> Result<()> {
        self.ensure_index(
            PROJECTION_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "canonical_id": { "type": "keyword" },
                        "title": { "type": "text" },
                        "authors": { "type": "text" },
                        "publication_year": { "type": "integer" },
                        "abstract": { "type": "text" },
                        "changeset": { "type": "object", "enabled": false }
                    }
                }
            }),
        )
        .await?;

        self.ensure_index(
            PERCOLATOR_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "query": { "type": "percolator" },
                        "robot_id": { "type": "keyword" }
                    }
                }
            }),
        )
        .await?;

        Ok(())
    }

    async fn ensure_index(&self, index: &str, body: Value) -> Result<()> {
        let exists = self
            .client
            .indices()
            .exists(opensearch::indices::IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch exists({index}): {e}")))?;

        if exists.status_code().is_success() {
            return Ok(());
        }

        let response = self
            .client
            .indices()
            .create(opensearch::indices::IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch create({index}): {e}")))?;

        if !response.status_code().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DestinyError::StoreUnavailable(format!(
                "failed to create index {index}: {text}"
            )));
        }
        Ok(())
    }

    /// Write a percolation document under `c.id` (spec §4.F step 3). The two
    /// fields — `reference` (full projection) and `changeset` (the delta) —
    /// are both searchable and percolatable from the same document.
    pub async fn index(&self, canonical_id: Uuid, doc: &PercolationDocument) -> Result<()> {
        let title = doc
            .reference
            .enhancements
            .iter()
            .find_map(|e| match &e.content {
                destiny_common::EnhancementContent::Bibliographic { title, .. } => Some(title.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let authors = doc
            .reference
            .enhancements
            .iter()
            .find_map(|e| match &e.content {
                destiny_common::EnhancementContent::Bibliographic { authors, .. } => {
                    Some(authors.clone())
                }
                _ => None,
            })
            .unwrap_or_default();
        let publication_year = doc
            .reference
            .enhancements
            .iter()
            .find_map(|e| match &e.content {
                destiny_common::EnhancementContent::Bibliographic { publication_year, .. } => {
                    *publication_year
                }
                _ => None,
            });

        let body = json!({
            "canonical_id": canonical_id.to_string(),
            "title": title,
            "authors": authors,
            "publication_year": publication_year,
            "reference": doc.reference,
            "changeset": doc.changeset,
        });

        let response = self
            .client
            .index(IndexParts::IndexId(PROJECTION_INDEX, &canonical_id.to_string()))
            .body(body)
            .send()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch index: {e}")))?;

        if !response.status_code().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DestinyError::StoreUnavailable(format!("index write failed: {text}")));
        }
        Ok(())
    }

    pub async fn get(&self, canonical_id: Uuid) -> Result<Option<Value>> {
        let response = self
            .client
            .get(GetParts::IndexId(PROJECTION_INDEX, &canonical_id.to_string()))
            .send()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch get: {e}")))?;

        if response.status_code() == opensearch::http::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch get body: {e}")))?;
        Ok(body.get("_source").cloned())
    }

    /// High-recall candidate search (spec §4.E phase 2). Only documents whose
    /// active decision is `CANONICAL` are indexed under their own id, so
    /// querying this index is already restricted to canonicals.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let mut should = vec![json!({ "match_phrase": { "title": query.title } })];
        for author in &query.authors {
            should.push(json!({ "match": { "authors": author } }));
        }

        let mut filter = Vec::new();
        if let Some(year) = query.publication_year {
            filter.push(json!({
                "range": { "publication_year": { "gte": year - 1, "lte": year + 1 } }
            }));
        }

        let body = json!({
            "size": query.top_k,
            "query": {
                "bool": {
                    "must": [{ "match_phrase": { "title": query.title } }],
                    "should": should,
                    "filter": filter,
                }
            }
        });

        let response = self
            .client
            .search(SearchParts::Index(&[PROJECTION_INDEX]))
            .body(body)
            .send()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch search: {e}")))?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch search body: {e}")))?;

        let hits = parsed["hits"]["hits"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let id_s = hit["_id"].as_str().unwrap_or_default();
            let Ok(reference_id) = Uuid::parse_str(id_s) else {
                warn!(id = id_s, "search hit with non-UUID _id, skipping");
                continue;
            };
            let score = hit["_score"].as_f64().unwrap_or(0.0) as f32;
            out.push(SearchHit { reference_id, score });
        }
        Ok(out)
    }

    pub async fn register_percolator_query(&self, automation_id: Uuid, robot_id: Uuid, query: &Value) -> Result<()> {
        let body = json!({ "query": query, "robot_id": robot_id.to_string() });
        let response = self
            .client
            .index(IndexParts::IndexId(PERCOLATOR_INDEX, &automation_id.to_string()))
            .body(body)
            .send()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch percolator register: {e}")))?;

        if !response.status_code().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DestinyError::StoreUnavailable(format!(
                "percolator register failed: {text}"
            )));
        }
        Ok(())
    }

    pub async fn remove_percolator_query(&self, automation_id: Uuid) -> Result<()> {
        let _ = self
            .client
            .delete(DeleteParts::IndexId(PERCOLATOR_INDEX, &automation_id.to_string()))
            .send()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch percolator delete: {e}")))?;
        Ok(())
    }

    /// Percolate a document against every stored automation query. Each match
    /// yields the `(robot_id, reference_id)` pair the dispatcher aggregates.
    pub async fn percolate(&self, doc: &PercolationDocument) -> Result<Vec<PercolateHit>> {
        let body = json!({
            "query": {
                "percolate": {
                    "field": "query",
                    "document": { "reference": doc.reference, "changeset": doc.changeset }
                }
            }
        });

        let response = self
            .client
            .search(SearchParts::Index(&[PERCOLATOR_INDEX]))
            .body(body)
            .send()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch percolate: {e}")))?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(format!("opensearch percolate body: {e}")))?;

        let hits = parsed["hits"]["hits"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let id_s = hit["_id"].as_str().unwrap_or_default();
            if let Ok(automation_id) = Uuid::parse_str(id_s) {
                out.push(PercolateHit { automation_id });
            }
        }
        Ok(out)
    }
}

/// Reject automation queries that don't constrain on `changeset` (spec §4.H:
/// "queries that omit this constraint are rejected at registration").
pub fn validate_automation_query(query: &Value) -> Result<()> {
    if query_mentions_changeset(query) {
        Ok(())
    } else {
        Err(DestinyError::Validation(
            "automation query must filter on the changeset subdocument".to_string(),
        ))
    }
}

fn query_mentions_changeset(query: &Value) -> bool {
    match query {
        Value::Object(map) => {
            for (k, v) in map {
                if k.contains("changeset") {
                    return true;
                }
                if let Value::String(s) = v {
                    if s.starts_with("changeset.") || s == "changeset" {
                        return true;
                    }
                }
                if query_mentions_changeset(v) {
                    return true;
                }
            }
            false
        }
        Value::Array(items) => items.iter().any(query_mentions_changeset),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_query_without_changeset_constraint() {
        let q = json!({ "bool": { "must": [{ "term": { "reference.identifiers.identifier": "W1" } }] } });
        assert!(validate_automation_query(&q).is_err());
    }

    #[test]
    fn accepts_query_with_nested_changeset_field() {
        let q = json!({
            "bool": {
                "must": [{ "term": { "changeset.added_enhancements.enhancement_type": "abstract" } }]
            }
        });
        assert!(validate_automation_query(&q).is_ok());
    }

    #[test]
    fn accepts_query_with_nested_clause() {
        let q = json!({
            "bool": {
                "must": [{ "nested": { "path": "changeset.added_identifiers", "query": { "match_all": {} } } }]
            }
        });
        assert!(validate_automation_query(&q).is_ok());
    }
}
