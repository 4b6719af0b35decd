//! Faceted filtering of the idea listing.
//!
//! Raw `author`, `category` and `rating` parameters are validated one by one;
//! a parameter that is missing, malformed or unknown is simply ignored, never
//! reported. Every accepted parameter narrows the result set and is echoed
//! back in [`Selected`] so the client can highlight the active facet.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::i18n::Languages;
use crate::models::*;
use crate::pagination::PageSource;
use crate::repo::{IdeaFilter, Repo, RepoError, RepoResult};

/// Raw listing query string.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct FilterParams {
    /// Author id.
    pub author: Option<String>,
    /// Category id.
    pub category: Option<String>,
    /// Rating 1..5.
    pub rating: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RatingChoice {
    pub value: u8,
    pub label: String,
}

impl From<Rating> for RatingChoice {
    fn from(r: Rating) -> Self {
        Self { value: r.value(), label: r.label().to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CategoryChoice {
    pub id: Id,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct Selected {
    pub author: Option<Author>,
    pub category: Option<CategoryChoice>,
    pub rating: Option<RatingChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Choices {
    pub authors: Vec<Author>,
    pub categories: Vec<CategoryChoice>,
    pub ratings: Vec<RatingChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Facets {
    pub selected: Selected,
    pub categories: Choices,
}

fn parse_id(raw: Option<&str>) -> Option<Id> {
    raw.map(str::trim).filter(|v| !v.is_empty())?.parse().ok()
}

/// Treat a missing referenced row as "no selection".
fn optional<T>(r: RepoResult<T>) -> RepoResult<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(RepoError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Validate the facet parameters against the repository.
///
/// Returns the filter to apply and the facet block for the response.
pub async fn resolve_facets(
    repo: &dyn Repo,
    params: &FilterParams,
    lang: &str,
    languages: &Languages,
) -> RepoResult<(IdeaFilter, Facets)> {
    let mut filter = IdeaFilter::ordered_by(lang, languages.default_code());
    let mut selected = Selected::default();

    let authors = repo.list_authors_with_ideas().await?;
    if let Some(id) = parse_id(params.author.as_deref()) {
        // only authors offered as a choice are valid
        if let Some(author) = authors.iter().find(|a| a.id == id) {
            filter.author = Some(author.id);
            selected.author = Some(author.clone());
        }
    }

    let categories: Vec<CategoryChoice> = repo
        .list_categories()
        .await?
        .into_iter()
        .map(|c| CategoryChoice { id: c.id, title: c.title.localized(lang, languages).to_string() })
        .collect();
    if let Some(id) = parse_id(params.category.as_deref()) {
        if let Some(category) = optional(repo.get_category(id).await)? {
            filter.category = Some(category.id);
            selected.category =
                Some(CategoryChoice { id: category.id, title: category.title.localized(lang, languages).to_string() });
        }
    }

    if let Some(rating) = parse_id(params.rating.as_deref())
        .and_then(|v| u8::try_from(v).ok())
        .and_then(Rating::new)
    {
        filter.rating = Some(rating);
        selected.rating = Some(rating.into());
    }

    let ratings = RATING_CHOICES
        .iter()
        .filter_map(|(v, _)| Rating::new(*v))
        .map(RatingChoice::from)
        .collect();

    Ok((filter, Facets { selected, categories: Choices { authors, categories, ratings } }))
}

/// Lazily evaluated filtered listing.
pub struct IdeaQuerySet {
    repo: Arc<dyn Repo>,
    filter: IdeaFilter,
}

impl IdeaQuerySet {
    pub fn new(repo: Arc<dyn Repo>, filter: IdeaFilter) -> Self {
        Self { repo, filter }
    }
}

#[async_trait]
impl PageSource for IdeaQuerySet {
    type Item = Idea;
    type Error = RepoError;

    async fn count(&self) -> Result<usize, RepoError> {
        self.repo.count_ideas(&self.filter).await
    }

    async fn slice(&self, offset: usize, limit: usize) -> Result<Vec<Idea>, RepoError> {
        self.repo.list_ideas(&self.filter, offset, limit).await
    }
}
