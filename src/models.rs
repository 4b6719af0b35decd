use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::i18n::{Languages, Multilingual};

pub type Id = i64;
pub type IdeaId = Uuid;

pub const RATING_CHOICES: [(u8, &str); 5] = [
    (1, "★☆☆☆☆"),
    (2, "★★☆☆☆"),
    (3, "★★★☆☆"),
    (4, "★★★★☆"),
    (5, "★★★★★"),
];

/// Star rating in 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        RATING_CHOICES[usize::from(self.0 - 1)].1
    }
}

impl TryFrom<u8> for Rating {
    type Error = String;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rating::new(value).ok_or_else(|| format!("rating must be between 1 and 5, got {value}"))
    }
}

impl From<Rating> for u8 {
    fn from(r: Rating) -> u8 {
        r.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Author {
    pub id: Id,
    pub username: String,
    pub full_name: Option<String>,
}

impl Author {
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Id,
    pub title: Multilingual,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCategory {
    pub title: Multilingual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Idea {
    pub id: IdeaId,
    pub author_id: Option<Id>,
    pub title: Multilingual,
    pub content: Multilingual,
    /// Media-storage path of the uploaded original.
    pub picture: Option<String>,
    #[schema(value_type = Vec<i64>)]
    pub categories: BTreeSet<Id>,
    #[schema(value_type = Option<u8>)]
    pub rating: Option<Rating>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Idea {
    pub fn url_path(&self) -> String {
        format!("/api/v1/ideas/{}", self.id)
    }

    /// Title in `lang`: the multilingual column, then a translation row, then
    /// the default language.
    pub fn translated_title(&self, lang: &str, translations: &[IdeaTranslation], languages: &Languages) -> String {
        self.title
            .get(lang)
            .or_else(|| translation_for(translations, lang).map(|t| t.title.as_str()))
            .unwrap_or_else(|| self.title.localized(lang, languages))
            .to_string()
    }

    pub fn translated_content(&self, lang: &str, translations: &[IdeaTranslation], languages: &Languages) -> String {
        self.content
            .get(lang)
            .or_else(|| translation_for(translations, lang).map(|t| t.content.as_str()))
            .unwrap_or_else(|| self.content.localized(lang, languages))
            .to_string()
    }
}

fn translation_for<'a>(translations: &'a [IdeaTranslation], lang: &str) -> Option<&'a IdeaTranslation> {
    translations.iter().find(|t| t.language == lang && !t.title.is_empty())
}

/// Alternate-language title/content row; unique per (idea, language).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IdeaTranslation {
    pub id: Id,
    pub idea_id: IdeaId,
    pub language: String,
    pub title: String,
    pub content: String,
}

/// A translation row as submitted through the form set, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationDraft {
    pub id: Option<Id>,
    pub language: String,
    pub title: String,
    pub content: String,
}

/// Everything one successful create/edit POST writes, applied atomically.
#[derive(Debug, Clone)]
pub struct IdeaChangeSet {
    pub idea: Idea,
    pub is_new: bool,
    pub upsert_translations: Vec<TranslationDraft>,
    pub delete_translations: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    User,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct OwnerRef {
    pub kind: OwnerKind,
    pub id: Id,
}

/// Generic pointer to any favoritable object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ObjectRef {
    pub content_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub const IDEA: &'static str = "ideas.idea";

    pub fn idea(id: IdeaId) -> Self {
        Self { content_type: Self::IDEA.into(), object_id: id.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Like {
    pub id: Id,
    pub owner: OwnerRef,
    pub object: ObjectRef,
    pub created: DateTime<Utc>,
}
