use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{IdeaDocument, SearchBackend, SearchError, SearchQuery};
use crate::i18n::{localized_field_name, Languages};
use crate::models::IdeaId;

/// Document-search backend talking to Elasticsearch over its REST API.
#[derive(Clone)]
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

#[derive(Deserialize)]
struct CountResponse {
    count: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
}

fn backend_err(e: reqwest::Error) -> SearchError {
    SearchError::Backend(e.to_string())
}

/// Disjunction of phrase matches on the language's title, content and the
/// nested category titles; no text matches everything.
pub fn build_query(query: &SearchQuery) -> Value {
    let Some(text) = query.text.as_deref() else {
        return json!({ "match_all": {} });
    };
    let title = localized_field_name("title", &query.lang);
    let content = localized_field_name("content", &query.lang);
    let category_title = format!("categories.{title}");
    json!({
        "bool": {
            "should": [
                { "match_phrase": { title: text } },
                { "match_phrase": { content: text } },
                {
                    "nested": {
                        "path": "categories",
                        "query": { "match_phrase": { category_title: text } }
                    }
                }
            ],
            "minimum_should_match": 1
        }
    })
}

/// Index mapping: per-language text fields plus nested categories.
pub fn index_mapping(languages: &Languages) -> Value {
    let mut properties = serde_json::Map::new();
    let mut category_properties = serde_json::Map::new();
    for lang in languages.codes() {
        properties.insert(localized_field_name("title", lang), json!({ "type": "text" }));
        properties.insert(localized_field_name("content", lang), json!({ "type": "text" }));
        category_properties.insert(localized_field_name("title", lang), json!({ "type": "text" }));
    }
    properties.insert("categories".into(), json!({ "type": "nested", "properties": category_properties }));
    json!({ "mappings": { "properties": properties } })
}

impl ElasticsearchBackend {
    pub fn new(base_url: &str, index: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SearchError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(SearchError::Backend(format!("elasticsearch returned {status}: {body}")))
    }

    /// Create the index with its mapping unless it already exists.
    pub async fn ensure_index(&self, languages: &Languages) -> Result<(), SearchError> {
        let head = self
            .client
            .head(format!("{}/{}", self.base_url, self.index))
            .send()
            .await
            .map_err(backend_err)?;
        if head.status().is_success() {
            return Ok(());
        }
        let resp = self
            .client
            .put(format!("{}/{}", self.base_url, self.index))
            .json(&index_mapping(languages))
            .send()
            .await
            .map_err(backend_err)?;
        Self::check(resp).await?;
        info!(index = %self.index, "created elasticsearch index");
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn index_idea(&self, doc: &IdeaDocument) -> Result<(), SearchError> {
        let resp = self
            .client
            .put(self.url(&format!("_doc/{}?refresh=true", doc.id)))
            .json(&doc.to_json())
            .send()
            .await
            .map_err(backend_err)?;
        Self::check(resp).await.map(|_| ())
    }

    async fn remove_idea(&self, id: IdeaId) -> Result<(), SearchError> {
        let resp = self
            .client
            .delete(self.url(&format!("_doc/{id}?refresh=true")))
            .send()
            .await
            .map_err(backend_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(resp).await.map(|_| ())
    }

    async fn clear(&self) -> Result<(), SearchError> {
        let resp = self
            .client
            .post(self.url("_delete_by_query?refresh=true"))
            .json(&json!({ "query": { "match_all": {} } }))
            .send()
            .await
            .map_err(backend_err)?;
        Self::check(resp).await.map(|_| ())
    }

    async fn count(&self, query: &SearchQuery) -> Result<usize, SearchError> {
        let resp = self
            .client
            .post(self.url("_count"))
            .json(&json!({ "query": build_query(query) }))
            .send()
            .await
            .map_err(backend_err)?;
        let body: CountResponse = Self::check(resp).await?.json().await.map_err(backend_err)?;
        Ok(body.count)
    }

    async fn search(&self, query: &SearchQuery, offset: usize, limit: usize) -> Result<Vec<IdeaId>, SearchError> {
        let body = json!({
            "query": build_query(query),
            "from": offset,
            "size": limit,
            "_source": false,
        });
        let resp = self.client.post(self.url("_search")).json(&body).send().await.map_err(backend_err)?;
        let parsed: SearchResponse = Self::check(resp).await?.json().await.map_err(backend_err)?;
        let ids = parsed
            .hits
            .hits
            .into_iter()
            .filter_map(|h| match h.id.parse::<IdeaId>() {
                Ok(id) => Some(id),
                Err(_) => {
                    debug!(id = %h.id, "skipping hit with malformed id");
                    None
                }
            })
            .collect();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_targets_language_fields() {
        let q = build_query(&SearchQuery::new(Some("green roofs"), "pt-br"));
        let should = &q["bool"]["should"];
        assert_eq!(should[0]["match_phrase"]["title_pt_br"], "green roofs");
        assert_eq!(should[1]["match_phrase"]["content_pt_br"], "green roofs");
        assert_eq!(should[2]["nested"]["path"], "categories");
        assert_eq!(should[2]["nested"]["query"]["match_phrase"]["categories.title_pt_br"], "green roofs");
    }

    #[test]
    fn empty_query_matches_all() {
        assert_eq!(build_query(&SearchQuery::new(None, "en")), json!({ "match_all": {} }));
    }
}
