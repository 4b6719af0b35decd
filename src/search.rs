//! Free-text search over ideas.
//!
//! Two interchangeable backends implement [`SearchBackend`]:
//! - [`text_index::TextIndex`]: one tantivy index per language holding a single
//!   text document per idea (title, content and category titles, one per line).
//! - [`elasticsearch::ElasticsearchBackend`]: one engine document per idea with
//!   `title_<lang>` / `content_<lang>` fields and nested categories, queried
//!   with a disjunction of phrase matches.
//!
//! Both return idea ids; [`SearchResults`] turns them back into ideas lazily,
//! page by page.

pub mod elasticsearch;
pub mod text_index;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::i18n::{localized_field_name, Languages};
use crate::models::{Category, Idea, IdeaId, IdeaTranslation};
use crate::pagination::PageSource;
use crate::repo::{Repo, RepoError};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("index error: {0}")]
    Index(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("backend unavailable: {0}")]
    Backend(String),
    #[error("repository: {0}")]
    Repo(#[from] RepoError),
}

/// A validated search request. `text == None` matches every document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub lang: String,
}

impl SearchQuery {
    pub fn new(raw: Option<&str>, lang: &str) -> Self {
        let text = raw.map(str::trim).filter(|q| !q.is_empty()).map(str::to_string);
        Self { text, lang: lang.to_string() }
    }
}

/// Everything the backends index for one idea, already resolved per language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeaDocument {
    pub id: IdeaId,
    pub titles: BTreeMap<String, String>,
    pub contents: BTreeMap<String, String>,
    /// One map (language → title) per category.
    pub categories: Vec<BTreeMap<String, String>>,
}

impl IdeaDocument {
    pub fn build(idea: &Idea, translations: &[IdeaTranslation], categories: &[Category], languages: &Languages) -> Self {
        let mut titles = BTreeMap::new();
        let mut contents = BTreeMap::new();
        for lang in languages.codes() {
            titles.insert(lang.to_string(), idea.translated_title(lang, translations, languages));
            contents.insert(lang.to_string(), idea.translated_content(lang, translations, languages));
        }
        let categories = categories
            .iter()
            .filter(|c| idea.categories.contains(&c.id))
            .map(|c| {
                languages
                    .codes()
                    .map(|lang| (lang.to_string(), c.title.localized(lang, languages).to_string()))
                    .collect()
            })
            .collect();
        Self { id: idea.id, titles, contents, categories }
    }

    /// Text document for the classic index: translated title, translated
    /// content and every category title, newline separated.
    pub fn text(&self, lang: &str) -> String {
        let mut fields: Vec<&str> = vec![
            self.titles.get(lang).map(String::as_str).unwrap_or_default(),
            self.contents.get(lang).map(String::as_str).unwrap_or_default(),
        ];
        fields.extend(self.categories.iter().map(|c| c.get(lang).map(String::as_str).unwrap_or_default()));
        fields.join("\n")
    }

    /// Engine document with one field per language.
    pub fn to_json(&self) -> serde_json::Value {
        let mut doc = serde_json::Map::new();
        for (lang, title) in &self.titles {
            doc.insert(localized_field_name("title", lang), title.clone().into());
        }
        for (lang, content) in &self.contents {
            doc.insert(localized_field_name("content", lang), content.clone().into());
        }
        let categories: Vec<serde_json::Value> = self
            .categories
            .iter()
            .map(|c| {
                let fields: serde_json::Map<String, serde_json::Value> =
                    c.iter().map(|(lang, title)| (localized_field_name("title", lang), title.clone().into())).collect();
                serde_json::Value::Object(fields)
            })
            .collect();
        doc.insert("categories".into(), categories.into());
        serde_json::Value::Object(doc)
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Add or replace the document of one idea.
    async fn index_idea(&self, doc: &IdeaDocument) -> Result<(), SearchError>;
    async fn remove_idea(&self, id: IdeaId) -> Result<(), SearchError>;
    async fn clear(&self) -> Result<(), SearchError>;
    async fn count(&self, query: &SearchQuery) -> Result<usize, SearchError>;
    /// Matching idea ids in relevance order.
    async fn search(&self, query: &SearchQuery, offset: usize, limit: usize) -> Result<Vec<IdeaId>, SearchError>;
}

/// Lazily evaluated search result set: nothing is fetched until the
/// paginator asks for the count and one slice.
pub struct SearchResults {
    backend: Arc<dyn SearchBackend>,
    repo: Arc<dyn Repo>,
    query: SearchQuery,
}

impl SearchResults {
    pub fn new(backend: Arc<dyn SearchBackend>, repo: Arc<dyn Repo>, query: SearchQuery) -> Self {
        Self { backend, repo, query }
    }
}

#[async_trait]
impl PageSource for SearchResults {
    type Item = Idea;
    type Error = SearchError;

    async fn count(&self) -> Result<usize, SearchError> {
        self.backend.count(&self.query).await
    }

    async fn slice(&self, offset: usize, limit: usize) -> Result<Vec<Idea>, SearchError> {
        let ids = self.backend.search(&self.query, offset, limit).await?;
        Ok(self.repo.get_ideas(&ids).await?)
    }
}

/// Build the search document of one stored idea.
pub async fn document_for(repo: &dyn Repo, idea: &Idea, languages: &Languages) -> Result<IdeaDocument, SearchError> {
    let translations = repo.list_translations(idea.id).await?;
    let categories = repo.list_categories().await?;
    Ok(IdeaDocument::build(idea, &translations, &categories, languages))
}

/// Re-index one idea after a save; failures are logged, not returned.
pub async fn sync_idea(backend: &dyn SearchBackend, repo: &dyn Repo, idea: &Idea, languages: &Languages) {
    let result = match document_for(repo, idea, languages).await {
        Ok(doc) => backend.index_idea(&doc).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(idea = %idea.id, error = %e, "search index update failed");
    }
}

/// Remove one idea from the index after a delete; failures are logged.
pub async fn unindex_idea(backend: &dyn SearchBackend, id: IdeaId) {
    if let Err(e) = backend.remove_idea(id).await {
        warn!(idea = %id, error = %e, "search index removal failed");
    }
}

/// Drop everything and index every stored idea again.
pub async fn rebuild_index(backend: &dyn SearchBackend, repo: &dyn Repo, languages: &Languages) -> Result<usize, SearchError> {
    backend.clear().await?;
    let ideas = repo.all_ideas().await?;
    let categories = repo.list_categories().await?;
    for idea in &ideas {
        let translations = repo.list_translations(idea.id).await?;
        backend.index_idea(&IdeaDocument::build(idea, &translations, &categories, languages)).await?;
    }
    info!(count = ideas.len(), "search index rebuilt");
    Ok(ideas.len())
}
