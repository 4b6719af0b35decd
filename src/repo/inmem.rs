//! Process-local repository with an optional JSON snapshot on disk.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::*;

/// Last id handed out per table. Author ids come from the token issuer and
/// never touch these.
#[derive(Default, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
struct Sequences {
    category: Id,
    translation: Id,
    like: Id,
}

impl Sequences {
    /// Never hand out an id already present in a loaded snapshot.
    fn catch_up(&mut self, categories: &BTreeMap<Id, Category>, translations: &BTreeMap<Id, IdeaTranslation>, likes: &BTreeMap<Id, Like>) {
        self.category = self.category.max(categories.keys().next_back().copied().unwrap_or_default());
        self.translation = self.translation.max(translations.keys().next_back().copied().unwrap_or_default());
        self.like = self.like.max(likes.keys().next_back().copied().unwrap_or_default());
    }
}

fn bump(seq: &mut Id) -> RepoResult<Id> {
    *seq = seq.checked_add(1).ok_or_else(|| RepoError::Internal("id sequence exhausted".into()))?;
    Ok(*seq)
}

#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
struct State {
    ideas: HashMap<IdeaId, Idea>,
    translations: BTreeMap<Id, IdeaTranslation>,
    categories: BTreeMap<Id, Category>,
    authors: BTreeMap<Id, Author>,
    likes: BTreeMap<Id, Like>,
    seq: Sequences,
}

impl State {
    fn title_taken(&self, author_id: Id, lang: &str, title: &str, exclude: Option<IdeaId>) -> bool {
        self.ideas.values().any(|i| {
            Some(i.id) != exclude && i.author_id == Some(author_id) && i.title.get(lang) == Some(title)
        })
    }

    fn filtered(&self, filter: &IdeaFilter) -> Vec<&Idea> {
        let mut v: Vec<&Idea> = self.ideas.values().filter(|i| filter.matches(i)).collect();
        let key = |i: &Idea| {
            i.title
                .get(&filter.order_lang)
                .or_else(|| i.title.get(&filter.default_lang))
                .unwrap_or_default()
                .to_string()
        };
        v.sort_by(|a, b| key(a).cmp(&key(b)).then(a.id.cmp(&b.id)));
        v
    }
}

#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
    default_lang: Arc<str>,
}

impl InMemRepo {
    /// Ephemeral repository; nothing is written to disk.
    pub fn new(default_lang: &str) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            snapshot_path: None,
            default_lang: default_lang.into(),
        }
    }

    /// Repository backed by a JSON snapshot at `path`, loaded now and
    /// rewritten after every mutation.
    pub fn open(path: impl Into<PathBuf>, default_lang: &str) -> Self {
        let path = path.into();
        let state = Self::load_state_from(&path);
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Some(Arc::new(path)),
            default_lang: default_lang.into(),
        }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(mut s) => {
                    info!(path = %path.display(), "loaded snapshot");
                    s.seq.catch_up(&s.categories, &s.translations, &s.likes);
                    s
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse snapshot, starting empty");
                    State::default()
                }
            },
            Err(e) => {
                info!(path = %path.display(), error = %e, "no snapshot, starting empty");
                State::default()
            }
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn persist(&self) {
        let Some(path) = self.snapshot_path.as_ref() else { return };
        let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
            Ok(Ok(b)) => b,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to serialise snapshot");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read state for snapshot");
                return;
            }
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(e) = std::fs::write(path.as_ref(), bytes) {
            warn!(path = %path.display(), error = %e, "failed to write snapshot");
        }
    }
}

#[async_trait]
impl IdeaRepo for InMemRepo {
    async fn get_idea(&self, id: IdeaId) -> RepoResult<Idea> {
        self.read()?.ideas.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn get_ideas(&self, ids: &[IdeaId]) -> RepoResult<Vec<Idea>> {
        let s = self.read()?;
        Ok(ids.iter().filter_map(|id| s.ideas.get(id).cloned()).collect())
    }

    async fn all_ideas(&self) -> RepoResult<Vec<Idea>> {
        let s = self.read()?;
        let filter = IdeaFilter::ordered_by(&self.default_lang, &self.default_lang);
        Ok(s.filtered(&filter).into_iter().cloned().collect())
    }

    async fn count_ideas(&self, filter: &IdeaFilter) -> RepoResult<usize> {
        Ok(self.read()?.ideas.values().filter(|i| filter.matches(i)).count())
    }

    async fn list_ideas(&self, filter: &IdeaFilter, offset: usize, limit: usize) -> RepoResult<Vec<Idea>> {
        let s = self.read()?;
        Ok(s.filtered(filter).into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn title_taken(&self, author_id: Id, lang: &str, title: &str, exclude: Option<IdeaId>) -> RepoResult<bool> {
        Ok(self.read()?.title_taken(author_id, lang, title, exclude))
    }

    async fn save_idea(&self, change: IdeaChangeSet) -> RepoResult<Idea> {
        let IdeaChangeSet { mut idea, is_new, upsert_translations, delete_translations } = change;
        let mut s = self.write()?;

        // ── 1. every check before the first mutation ─────────────
        match (is_new, s.ideas.get(&idea.id)) {
            (true, Some(_)) => return Err(RepoError::Conflict),
            (false, None) => return Err(RepoError::NotFound),
            (false, Some(existing)) => idea.created = existing.created,
            (true, None) => {}
        }
        if let Some(author) = idea.author_id {
            if !s.authors.contains_key(&author) {
                return Err(RepoError::NotFound);
            }
            let title = idea.title.get(&self.default_lang).unwrap_or_default();
            if s.title_taken(author, &self.default_lang, title, Some(idea.id)) {
                return Err(RepoError::Conflict);
            }
        }
        if idea.categories.iter().any(|c| !s.categories.contains_key(c)) {
            return Err(RepoError::NotFound);
        }
        let owned = |tid: &Id| s.translations.get(tid).map_or(false, |t| t.idea_id == idea.id);
        if !delete_translations.iter().all(owned)
            || !upsert_translations.iter().filter_map(|d| d.id.as_ref()).all(owned)
        {
            return Err(RepoError::NotFound);
        }
        // languages after the change must stay unique
        let mut languages: BTreeMap<&str, Id> = BTreeMap::new();
        for t in s.translations.values().filter(|t| t.idea_id == idea.id) {
            let removed = delete_translations.contains(&t.id);
            let rewritten = upsert_translations.iter().any(|d| d.id == Some(t.id));
            if !removed && !rewritten {
                languages.insert(&t.language, t.id);
            }
        }
        for d in &upsert_translations {
            if languages.insert(&d.language, d.id.unwrap_or_default()).is_some() {
                return Err(RepoError::Conflict);
            }
        }
        let mut translation_seq = s.seq.translation;
        let mut rows = Vec::with_capacity(upsert_translations.len());
        for d in upsert_translations {
            let id = match d.id {
                Some(id) => id,
                None => bump(&mut translation_seq)?,
            };
            rows.push(IdeaTranslation { id, idea_id: idea.id, language: d.language, title: d.title, content: d.content });
        }

        // ── 2. apply ─────────────────────────────────────────────
        idea.modified = Utc::now();
        s.ideas.insert(idea.id, idea.clone());
        for tid in &delete_translations {
            s.translations.remove(tid);
        }
        s.seq.translation = translation_seq;
        for row in rows {
            s.translations.insert(row.id, row);
        }
        drop(s); // release lock before persisting
        self.persist();
        Ok(idea)
    }

    async fn delete_idea(&self, id: IdeaId) -> RepoResult<()> {
        let mut s = self.write()?;
        s.ideas.remove(&id).ok_or(RepoError::NotFound)?;
        s.translations.retain(|_, t| t.idea_id != id);
        let target = ObjectRef::idea(id);
        s.likes.retain(|_, l| l.object != target);
        drop(s);
        self.persist();
        Ok(())
    }

    async fn list_translations(&self, idea_id: IdeaId) -> RepoResult<Vec<IdeaTranslation>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.translations.values().filter(|t| t.idea_id == idea_id).cloned().collect();
        v.sort_by(|a, b| a.language.cmp(&b.language));
        Ok(v)
    }
}

#[async_trait]
impl CategoryRepo for InMemRepo {
    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        Ok(self.read()?.categories.values().cloned().collect())
    }

    async fn get_category(&self, id: Id) -> RepoResult<Category> {
        self.read()?.categories.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
        let mut s = self.write()?;
        let id = bump(&mut s.seq.category)?;
        let category = Category { id, title: new.title };
        s.categories.insert(id, category.clone());
        drop(s);
        self.persist();
        Ok(category)
    }
}

#[async_trait]
impl AuthorRepo for InMemRepo {
    async fn get_author(&self, id: Id) -> RepoResult<Author> {
        self.read()?.authors.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_authors_with_ideas(&self) -> RepoResult<Vec<Author>> {
        let s = self.read()?;
        let mut v: Vec<Author> = s
            .authors
            .values()
            .filter(|a| s.ideas.values().any(|i| i.author_id == Some(a.id)))
            .cloned()
            .collect();
        v.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
        Ok(v)
    }

    async fn upsert_author(&self, author: Author) -> RepoResult<Author> {
        let mut s = self.write()?;
        if s.authors.get(&author.id) == Some(&author) {
            return Ok(author);
        }
        s.authors.insert(author.id, author.clone());
        drop(s);
        self.persist();
        Ok(author)
    }

    async fn remove_author(&self, id: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        s.authors.remove(&id).ok_or(RepoError::NotFound)?;
        for idea in s.ideas.values_mut().filter(|i| i.author_id == Some(id)) {
            idea.author_id = None;
        }
        drop(s);
        self.persist();
        Ok(())
    }
}

#[async_trait]
impl LikeRepo for InMemRepo {
    async fn find_like(&self, owner: &OwnerRef, object: &ObjectRef) -> RepoResult<Option<Like>> {
        let s = self.read()?;
        Ok(s.likes.values().find(|l| &l.owner == owner && &l.object == object).cloned())
    }

    async fn create_like(&self, owner: OwnerRef, object: ObjectRef) -> RepoResult<Like> {
        let mut s = self.write()?;
        if s.likes.values().any(|l| l.owner == owner && l.object == object) {
            return Err(RepoError::Conflict);
        }
        let id = bump(&mut s.seq.like)?;
        let like = Like { id, owner, object, created: Utc::now() };
        s.likes.insert(id, like.clone());
        drop(s);
        self.persist();
        Ok(like)
    }

    async fn delete_like(&self, id: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        s.likes.remove(&id).ok_or(RepoError::NotFound)?;
        drop(s);
        self.persist();
        Ok(())
    }

    async fn count_likes(&self, object: &ObjectRef) -> RepoResult<usize> {
        Ok(self.read()?.likes.values().filter(|l| &l.object == object).count())
    }
}
