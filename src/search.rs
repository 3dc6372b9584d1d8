//! Full-text search over an external index.
//!
//! Records opt in by implementing [`Searchable`]. Writes reach the index
//! through [`SearchHook`], registered as a post-commit hook, so only
//! committed rows are ever indexed. Queries go to the index first and the
//! matching rows are then loaded from storage in the order the index ranked
//! them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, warn};
use reqwest::{Client, StatusCode};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::AppConfig;
use crate::entity::post;
use crate::error::AppError;
use crate::session::{ChangeSet, CommitHook, HookError};

pub trait Searchable: Sized + Send + Sync {
    type Entity: EntityTrait<Model = Self>;

    /// Index name; the backing table name.
    const INDEX: &'static str;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn search_id(&self) -> i32;
    fn search_document(&self) -> Map<String, Value>;
}

impl Searchable for post::Model {
    type Entity = post::Entity;

    const INDEX: &'static str = "t_post";

    fn id_column() -> post::Column {
        post::Column::Id
    }

    fn search_id(&self) -> i32 {
        self.id
    }

    fn search_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("body".to_string(), Value::String(self.body.clone()));
        doc
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected search backend response: {0}")]
    Response(String),
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn add_to_index(&self, index: &str, id: i32, document: &Map<String, Value>) -> Result<(), SearchError>;

    async fn remove_from_index(&self, index: &str, id: i32) -> Result<(), SearchError>;

    /// Returns matching ids in relevance order plus the total hit count.
    async fn query_index(
        &self,
        index: &str,
        expression: &str,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<i32>, u64), SearchError>;
}

/// Used when no search backend is configured.
pub struct DisabledIndex;

#[async_trait]
impl SearchIndex for DisabledIndex {
    async fn add_to_index(&self, _index: &str, _id: i32, _document: &Map<String, Value>) -> Result<(), SearchError> {
        Ok(())
    }

    async fn remove_from_index(&self, _index: &str, _id: i32) -> Result<(), SearchError> {
        Ok(())
    }

    async fn query_index(
        &self,
        _index: &str,
        _expression: &str,
        _page: u64,
        _per_page: u64,
    ) -> Result<(Vec<i32>, u64), SearchError> {
        Ok((Vec::new(), 0))
    }
}

pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
}

impl ElasticsearchIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn doc_url(&self, index: &str, id: i32) -> String {
        format!("{}/{}/_doc/{}", self.base_url, index, id)
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn add_to_index(&self, index: &str, id: i32, document: &Map<String, Value>) -> Result<(), SearchError> {
        self.client
            .put(self.doc_url(index, id))
            .json(document)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn remove_from_index(&self, index: &str, id: i32) -> Result<(), SearchError> {
        let resp = self.client.delete(self.doc_url(index, id)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            warn!("search document {}/{} was not indexed", index, id);
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn query_index(
        &self,
        index: &str,
        expression: &str,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<i32>, u64), SearchError> {
        let body = json!({
            "query": { "multi_match": { "query": expression, "fields": ["*"] } },
            "from": page.saturating_sub(1).saturating_mul(per_page),
            "size": per_page,
        });
        let resp: Value = self
            .client
            .post(format!("{}/{}/_search", self.base_url, index))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_search_response(&resp)
    }
}

fn parse_search_response(resp: &Value) -> Result<(Vec<i32>, u64), SearchError> {
    let hits = resp
        .get("hits")
        .ok_or_else(|| SearchError::Response("missing hits".to_string()))?;
    // total is an object on 7.x+, a bare number before that
    let total = match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(obj) => obj.get("value").and_then(Value::as_u64),
        None => None,
    }
    .ok_or_else(|| SearchError::Response("missing hits.total".to_string()))?;

    let mut ids = Vec::new();
    for hit in hits.get("hits").and_then(Value::as_array).into_iter().flatten() {
        let id = hit
            .get("_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i32>().ok())
            .ok_or_else(|| SearchError::Response(format!("bad hit id: {}", hit)))?;
        ids.push(id);
    }
    Ok((ids, total))
}

pub fn index_from_config(config: &AppConfig) -> Arc<dyn SearchIndex> {
    match &config.elasticsearch_url {
        Some(url) => Arc::new(ElasticsearchIndex::new(url.clone())),
        None => Arc::new(DisabledIndex),
    }
}

/// Forwards committed searchable changes to the index.
pub struct SearchHook {
    index: Arc<dyn SearchIndex>,
}

impl SearchHook {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl CommitHook for SearchHook {
    async fn after_commit(&self, changes: &ChangeSet) -> Result<(), HookError> {
        if changes.is_empty() {
            return Ok(());
        }
        for record in changes.added.iter().chain(changes.updated.iter()) {
            self.index.add_to_index(record.index, record.id, &record.document).await?;
        }
        for record in &changes.deleted {
            self.index.remove_from_index(record.index, record.id).await?;
        }
        Ok(())
    }
}

/// Re-adds every stored row of `M` to the index. Returns how many rows were sent.
pub async fn reindex<M, C>(db: &C, index: &dyn SearchIndex) -> Result<usize, AppError>
where
    M: Searchable,
    C: ConnectionTrait,
{
    let rows = M::Entity::find()
        .all(db)
        .await
        .map_err(|e| AppError::internal("reindex load", e))?;
    for row in &rows {
        index
            .add_to_index(M::INDEX, row.search_id(), &row.search_document())
            .await
            .map_err(|e| AppError::internal("reindex", e))?;
    }
    Ok(rows.len())
}

pub async fn search<M, C>(
    db: &C,
    index: &dyn SearchIndex,
    expression: &str,
    page: u64,
    per_page: u64,
) -> Result<(Vec<M>, u64), AppError>
where
    M: Searchable,
    C: ConnectionTrait,
{
    let (ids, total) = index
        .query_index(M::INDEX, expression, page, per_page)
        .await
        .map_err(|e| {
            error!("query_index {} failed: {}", M::INDEX, e);
            AppError::system_exception()
        })?;
    if total == 0 || ids.is_empty() {
        return Ok((Vec::new(), total));
    }

    let rank: HashMap<i32, usize> = ids.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
    let mut rows = M::Entity::find()
        .filter(M::id_column().is_in(ids))
        .all(db)
        .await
        .map_err(|e| AppError::internal("search load", e))?;
    rows.sort_by_key(|row| rank.get(&row.search_id()).copied().unwrap_or(usize::MAX));
    Ok((rows, total))
}

/// Substring index kept in memory; ranks newer ids first.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryIndex {
    docs: tokio::sync::RwLock<std::collections::BTreeMap<(String, i32), Map<String, Value>>>,
    pub queries: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemoryIndex {
    pub async fn contains(&self, index: &str, id: i32) -> bool {
        self.docs.read().await.contains_key(&(index.to_string(), id))
    }
}

#[cfg(test)]
#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn add_to_index(&self, index: &str, id: i32, document: &Map<String, Value>) -> Result<(), SearchError> {
        self.docs
            .write()
            .await
            .insert((index.to_string(), id), document.clone());
        Ok(())
    }

    async fn remove_from_index(&self, index: &str, id: i32) -> Result<(), SearchError> {
        self.docs.write().await.remove(&(index.to_string(), id));
        Ok(())
    }

    async fn query_index(
        &self,
        index: &str,
        expression: &str,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<i32>, u64), SearchError> {
        self.queries.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let needle = expression.to_lowercase();
        let docs = self.docs.read().await;
        let mut hits: Vec<i32> = docs
            .iter()
            .filter(|((idx, _), _)| idx == index)
            .filter(|(_, doc)| {
                doc.values()
                    .filter_map(Value::as_str)
                    .any(|v| v.to_lowercase().contains(&needle))
            })
            .map(|((_, id), _)| *id)
            .collect();
        hits.reverse();
        let total = hits.len() as u64;
        let start = usize::try_from(page.saturating_sub(1).saturating_mul(per_page)).unwrap_or(usize::MAX);
        let ids = hits.into_iter().skip(start).take(per_page as usize).collect();
        Ok((ids, total))
    }
}
