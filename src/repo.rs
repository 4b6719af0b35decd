use async_trait::async_trait;

use crate::models::*;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Narrowing applied to the idea listing. `None` criteria are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdeaFilter {
    pub author: Option<Id>,
    pub category: Option<Id>,
    pub rating: Option<Rating>,
    /// Listing is ordered by the title in this language (falling back to
    /// `default_lang`), then by id.
    pub order_lang: String,
    pub default_lang: String,
}

impl IdeaFilter {
    pub fn ordered_by(order_lang: &str, default_lang: &str) -> Self {
        Self { order_lang: order_lang.into(), default_lang: default_lang.into(), ..Self::default() }
    }

    pub fn matches(&self, idea: &Idea) -> bool {
        self.author.map_or(true, |a| idea.author_id == Some(a))
            && self.category.map_or(true, |c| idea.categories.contains(&c))
            && self.rating.map_or(true, |r| idea.rating == Some(r))
    }
}

#[async_trait]
pub trait IdeaRepo: Send + Sync {
    async fn get_idea(&self, id: IdeaId) -> RepoResult<Idea>;
    /// Fetch several ideas keeping the order of `ids`; unknown ids are skipped.
    async fn get_ideas(&self, ids: &[IdeaId]) -> RepoResult<Vec<Idea>>;
    async fn all_ideas(&self) -> RepoResult<Vec<Idea>>;
    async fn count_ideas(&self, filter: &IdeaFilter) -> RepoResult<usize>;
    async fn list_ideas(&self, filter: &IdeaFilter, offset: usize, limit: usize) -> RepoResult<Vec<Idea>>;
    /// Whether another idea of `author_id` already uses `title` in `lang`.
    async fn title_taken(&self, author_id: Id, lang: &str, title: &str, exclude: Option<IdeaId>) -> RepoResult<bool>;
    /// Persist the idea, its category set and translation changes as one unit.
    async fn save_idea(&self, change: IdeaChangeSet) -> RepoResult<Idea>;
    /// Remove the idea together with its translations and likes.
    async fn delete_idea(&self, id: IdeaId) -> RepoResult<()>;
    /// Translation rows of an idea ordered by language code.
    async fn list_translations(&self, idea_id: IdeaId) -> RepoResult<Vec<IdeaTranslation>>;
}

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn list_categories(&self) -> RepoResult<Vec<Category>>;
    async fn get_category(&self, id: Id) -> RepoResult<Category>;
    async fn create_category(&self, new: NewCategory) -> RepoResult<Category>;
}

#[async_trait]
pub trait AuthorRepo: Send + Sync {
    async fn get_author(&self, id: Id) -> RepoResult<Author>;
    /// Authors owning at least one idea, ordered by username.
    async fn list_authors_with_ideas(&self) -> RepoResult<Vec<Author>>;
    async fn upsert_author(&self, author: Author) -> RepoResult<Author>;
    /// Remove an author; their ideas stay with `author_id` cleared.
    async fn remove_author(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait LikeRepo: Send + Sync {
    async fn find_like(&self, owner: &OwnerRef, object: &ObjectRef) -> RepoResult<Option<Like>>;
    async fn create_like(&self, owner: OwnerRef, object: ObjectRef) -> RepoResult<Like>;
    async fn delete_like(&self, id: Id) -> RepoResult<()>;
    async fn count_likes(&self, object: &ObjectRef) -> RepoResult<usize>;
}

pub trait Repo: IdeaRepo + CategoryRepo + AuthorRepo + LikeRepo {}

impl<T> Repo for T where T: IdeaRepo + CategoryRepo + AuthorRepo + LikeRepo {}
