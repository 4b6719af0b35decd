use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, Query, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use super::{IdeaDocument, SearchBackend, SearchError, SearchQuery};
use crate::i18n::{localized_field_name, Languages};
use crate::models::IdeaId;

const WRITER_HEAP_BYTES: usize = 20_000_000;

/// Per-language index state.
struct LanguageIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    text_field: Field,
}

fn index_err(e: impl std::fmt::Display) -> SearchError {
    SearchError::Index(e.to_string())
}

impl LanguageIndex {
    fn schema() -> (Schema, Field, Field) {
        let mut builder = Schema::builder();
        let id_field = builder.add_text_field("id", STRING | STORED);
        let text_field = builder.add_text_field("text", TEXT);
        (builder.build(), id_field, text_field)
    }

    fn from_index(index: Index, id_field: Field, text_field: Field) -> Result<Self, SearchError> {
        let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES).map_err(index_err)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(index_err)?;
        Ok(Self { index, reader, writer: Mutex::new(writer), id_field, text_field })
    }

    fn open(dir: &Path) -> Result<Self, SearchError> {
        std::fs::create_dir_all(dir).map_err(index_err)?;
        let (schema, id_field, text_field) = Self::schema();
        let mmap = tantivy::directory::MmapDirectory::open(dir).map_err(index_err)?;
        let index = Index::open_or_create(mmap, schema).map_err(index_err)?;
        Self::from_index(index, id_field, text_field)
    }

    fn in_ram() -> Result<Self, SearchError> {
        let (schema, id_field, text_field) = Self::schema();
        Self::from_index(Index::create_in_ram(schema), id_field, text_field)
    }

    fn with_writer(&self, f: impl FnOnce(&mut IndexWriter, &Self) -> Result<(), SearchError>) -> Result<(), SearchError> {
        let mut writer = self.writer.lock().map_err(|_| SearchError::Index("writer lock poisoned".into()))?;
        f(&mut writer, self)?;
        writer.commit().map_err(index_err)?;
        self.reader.reload().map_err(index_err)
    }

    fn upsert(&self, id: &str, text: String) -> Result<(), SearchError> {
        self.with_writer(|w, ix| {
            w.delete_term(Term::from_field_text(ix.id_field, id));
            w.add_document(doc!(ix.id_field => id, ix.text_field => text)).map_err(index_err)?;
            Ok(())
        })
    }

    fn remove(&self, id: &str) -> Result<(), SearchError> {
        self.with_writer(|w, ix| {
            w.delete_term(Term::from_field_text(ix.id_field, id));
            Ok(())
        })
    }

    fn clear(&self) -> Result<(), SearchError> {
        self.with_writer(|w, _| w.delete_all_documents().map(|_| ()).map_err(index_err))
    }

    fn query(&self, text: Option<&str>) -> Box<dyn Query> {
        match text {
            None => Box::new(AllQuery),
            Some(text) => {
                let mut parser = QueryParser::for_index(&self.index, vec![self.text_field]);
                // every term must match; quoted parts are phrases
                parser.set_conjunction_by_default();
                let (query, errors) = parser.parse_query_lenient(text);
                if !errors.is_empty() {
                    debug!(?errors, "lenient query parse dropped parts of the query");
                }
                query
            }
        }
    }

    fn count(&self, text: Option<&str>) -> Result<usize, SearchError> {
        let searcher = self.reader.searcher();
        searcher.search(&*self.query(text), &Count).map_err(|e| SearchError::Query(e.to_string()))
    }

    fn search(&self, text: Option<&str>, offset: usize, limit: usize) -> Result<Vec<IdeaId>, SearchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let top = searcher
            .search(&*self.query(text), &TopDocs::with_limit(limit).and_offset(offset))
            .map_err(|e| SearchError::Query(e.to_string()))?;
        let mut ids = Vec::with_capacity(top.len());
        for (_score, addr) in top {
            let doc: TantivyDocument = searcher.doc(addr).map_err(|e| SearchError::Query(e.to_string()))?;
            let raw = doc.get_first(self.id_field).and_then(|v| v.as_str()).unwrap_or_default();
            match raw.parse::<IdeaId>() {
                Ok(id) => ids.push(id),
                Err(_) => debug!(raw, "skipping index entry with malformed id"),
            }
        }
        Ok(ids)
    }
}

/// Classic full-text backend: one tantivy index per supported language.
#[derive(Clone)]
pub struct TextIndex {
    indexes: Arc<HashMap<String, LanguageIndex>>,
}

impl TextIndex {
    /// Open (or create) `<base_dir>/text_index_<lang>` for every language.
    pub fn open(base_dir: &Path, languages: &Languages) -> Result<Self, SearchError> {
        let mut indexes = HashMap::new();
        for lang in languages.codes() {
            let dir = base_dir.join(localized_field_name("text_index", lang));
            indexes.insert(lang.to_string(), LanguageIndex::open(&dir)?);
        }
        Ok(Self { indexes: Arc::new(indexes) })
    }

    pub fn in_memory(languages: &Languages) -> Result<Self, SearchError> {
        let mut indexes = HashMap::new();
        for lang in languages.codes() {
            indexes.insert(lang.to_string(), LanguageIndex::in_ram()?);
        }
        Ok(Self { indexes: Arc::new(indexes) })
    }

    /// Run `f` on the blocking pool with shared access to all indexes.
    async fn blocking<T, F>(&self, f: F) -> Result<T, SearchError>
    where
        T: Send + 'static,
        F: FnOnce(&HashMap<String, LanguageIndex>) -> Result<T, SearchError> + Send + 'static,
    {
        let indexes = self.indexes.clone();
        actix_web::web::block(move || f(&indexes))
            .await
            .map_err(|e| SearchError::Index(e.to_string()))?
    }
}

fn language_index<'a>(indexes: &'a HashMap<String, LanguageIndex>, lang: &str) -> Result<&'a LanguageIndex, SearchError> {
    indexes.get(lang).ok_or_else(|| SearchError::Query(format!("no index for language '{lang}'")))
}

#[async_trait]
impl SearchBackend for TextIndex {
    async fn index_idea(&self, doc: &IdeaDocument) -> Result<(), SearchError> {
        let doc = doc.clone();
        self.blocking(move |indexes| {
            let id = doc.id.to_string();
            for (lang, ix) in indexes {
                ix.upsert(&id, doc.text(lang))?;
            }
            Ok(())
        })
        .await
    }

    async fn remove_idea(&self, id: IdeaId) -> Result<(), SearchError> {
        self.blocking(move |indexes| {
            let id = id.to_string();
            indexes.values().try_for_each(|ix| ix.remove(&id))
        })
        .await
    }

    async fn clear(&self) -> Result<(), SearchError> {
        self.blocking(|indexes| indexes.values().try_for_each(LanguageIndex::clear)).await
    }

    async fn count(&self, query: &SearchQuery) -> Result<usize, SearchError> {
        let query = query.clone();
        self.blocking(move |indexes| language_index(indexes, &query.lang)?.count(query.text.as_deref())).await
    }

    async fn search(&self, query: &SearchQuery, offset: usize, limit: usize) -> Result<Vec<IdeaId>, SearchError> {
        let query = query.clone();
        self.blocking(move |indexes| language_index(indexes, &query.lang)?.search(query.text.as_deref(), offset, limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(id: IdeaId, en: &str, fr: &str) -> IdeaDocument {
        IdeaDocument {
            id,
            titles: BTreeMap::from([("en".to_string(), en.to_string()), ("fr".to_string(), fr.to_string())]),
            contents: BTreeMap::new(),
            categories: vec![BTreeMap::from([("en".to_string(), "Energy".to_string())])],
        }
    }

    #[actix_web::test]
    async fn indexes_per_language_and_replaces_documents() {
        let langs = Languages::new(["en", "fr"], "en").unwrap();
        let ix = TextIndex::in_memory(&langs).unwrap();
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        ix.index_idea(&doc(a, "Solar roofs", "Toits solaires")).await.unwrap();
        ix.index_idea(&doc(b, "Rain barrels", "Barils de pluie")).await.unwrap();

        let en = SearchQuery::new(Some("solar"), "en");
        assert_eq!(ix.search(&en, 0, 10).await.unwrap(), vec![a]);
        let fr = SearchQuery::new(Some("pluie"), "fr");
        assert_eq!(ix.search(&fr, 0, 10).await.unwrap(), vec![b]);
        // category titles are part of the text
        assert_eq!(ix.count(&SearchQuery::new(Some("energy"), "en")).await.unwrap(), 2);

        ix.index_idea(&doc(a, "Wind turbines", "Éoliennes")).await.unwrap();
        assert_eq!(ix.count(&en).await.unwrap(), 0);
        assert_eq!(ix.count(&SearchQuery::new(None, "en")).await.unwrap(), 2);

        ix.remove_idea(b).await.unwrap();
        assert_eq!(ix.count(&SearchQuery::new(None, "fr")).await.unwrap(), 1);
    }
}
