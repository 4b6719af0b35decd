//! Idea form and translation form-set validation.
//!
//! Validation runs completely before anything is written: the caller gets
//! either a [`ValidatedIdea`] ready to be turned into an
//! [`IdeaChangeSet`](crate::models::IdeaChangeSet) or a [`FormErrors`] map.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::i18n::{localized_field_name, Languages, Multilingual};
use crate::models::*;
use crate::repo::{Repo, RepoError};

pub const NON_FIELD_ERRORS: &str = "__all__";
pub const TITLE_MAX_LENGTH: usize = 200;
pub const LANGUAGE_MAX_LENGTH: usize = 7;

pub const MSG_REQUIRED: &str = "This field is required.";
pub const MSG_UNIQUE_TITLE: &str = "Each idea of the same user should have a unique title.";
pub const MSG_TITLE_WHITESPACE: &str = "The title cannot start or end with a whitespace.";
pub const MSG_BAD_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// Field name → messages. Translation rows use `translations-<n>-<field>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(transparent)]
pub struct FormErrors(pub BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn single(field: &str, message: &str) -> Self {
        let mut e = Self::default();
        e.add(field, message);
        e
    }
}

fn invalid_choice(value: impl std::fmt::Display) -> String {
    format!("Select a valid choice. {value} is not one of the available choices.")
}

fn too_long(max: usize, len: usize) -> String {
    format!("Ensure this value has at most {max} characters (it has {len}).")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TranslationFormInput {
    /// Existing row id; absent for new rows.
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Remove this existing row.
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct IdeaFormInput {
    #[serde(default)]
    pub title: Multilingual,
    #[serde(default)]
    pub content: Multilingual,
    #[serde(default)]
    pub categories: Vec<Id>,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub translations: Vec<TranslationFormInput>,
}

impl IdeaFormInput {
    /// Pre-populated form for editing `idea`.
    pub fn from_idea(idea: &Idea, translations: &[IdeaTranslation]) -> Self {
        Self {
            title: idea.title.clone(),
            content: idea.content.clone(),
            categories: idea.categories.iter().copied().collect(),
            rating: idea.rating.map(|r| i64::from(r.value())),
            translations: translations
                .iter()
                .map(|t| TranslationFormInput {
                    id: Some(t.id),
                    language: t.language.clone(),
                    title: t.title.clone(),
                    content: t.content.clone(),
                    delete: false,
                })
                .collect(),
        }
    }
}

/// Cleaned form data.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedIdea {
    pub title: Multilingual,
    pub content: Multilingual,
    pub categories: BTreeSet<Id>,
    pub rating: Option<Rating>,
    pub upsert_translations: Vec<TranslationDraft>,
    pub delete_translations: Vec<Id>,
}

/// What the form is validated against.
pub struct FormContext<'a> {
    pub repo: &'a dyn Repo,
    pub languages: &'a Languages,
    /// Author the idea will belong to after saving.
    pub author_id: Option<Id>,
    /// The idea being edited, if any.
    pub existing: Option<&'a Idea>,
    /// Translation rows the form set is scoped to.
    pub existing_translations: &'a [IdeaTranslation],
}

fn clean_multilingual(
    value: &Multilingual,
    base: &str,
    required: bool,
    max_len: Option<usize>,
    languages: &Languages,
    errors: &mut FormErrors,
) -> Multilingual {
    let mut out = Multilingual::new();
    for (lang, v) in &value.0 {
        let field = localized_field_name(base, lang);
        if !languages.contains(lang) {
            errors.add(field, format!("Unsupported language '{lang}'."));
            continue;
        }
        if let Some(max) = max_len {
            let len = v.chars().count();
            if len > max {
                errors.add(field, too_long(max, len));
                continue;
            }
        }
        if !v.is_empty() {
            out.set(lang, v.clone());
        }
    }
    let default = languages.default_code();
    if required && out.get(default).is_none() && errors.get(&localized_field_name(base, default)).is_none() {
        errors.add(localized_field_name(base, default), MSG_REQUIRED);
    }
    out
}

/// At least two characters, non-whitespace at both ends, no line breaks.
pub fn title_is_trimmed(title: &str) -> bool {
    let mut chars = title.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) => !first.is_whitespace() && !last.is_whitespace() && !title.contains('\n'),
        _ => false,
    }
}

/// Validate the main form and the translation form set together.
pub async fn validate_idea_form(input: &IdeaFormInput, ctx: &FormContext<'_>) -> Result<ValidatedIdea, FormErrors> {
    let mut errors = FormErrors::default();
    let languages = ctx.languages;
    let default = languages.default_code();

    let title = clean_multilingual(&input.title, "title", true, Some(TITLE_MAX_LENGTH), languages, &mut errors);
    let content = clean_multilingual(&input.content, "content", true, None, languages, &mut errors);

    let mut categories = BTreeSet::new();
    if !input.categories.is_empty() {
        let known: BTreeSet<Id> = ctx
            .repo
            .list_categories()
            .await
            .map_err(|e| FormErrors::single(NON_FIELD_ERRORS, &e.to_string()))?
            .into_iter()
            .map(|c| c.id)
            .collect();
        for id in &input.categories {
            if known.contains(id) {
                categories.insert(*id);
            } else {
                errors.add("categories", invalid_choice(id));
            }
        }
    }

    let rating = match input.rating {
        None => None,
        Some(v) => {
            let r = u8::try_from(v).ok().and_then(Rating::new);
            if r.is_none() {
                errors.add("rating", invalid_choice(v));
            }
            r
        }
    };

    // model-level checks on the default-language title
    if let Some(t) = title.get(default) {
        if !title_is_trimmed(t) {
            errors.add(NON_FIELD_ERRORS, MSG_TITLE_WHITESPACE);
        } else if let Some(author) = ctx.author_id {
            let exclude = ctx.existing.map(|i| i.id);
            match ctx.repo.title_taken(author, default, t, exclude).await {
                Ok(true) => errors.add(NON_FIELD_ERRORS, MSG_UNIQUE_TITLE),
                Ok(false) => {}
                Err(RepoError::NotFound) => {}
                Err(e) => errors.add(NON_FIELD_ERRORS, e.to_string()),
            }
        }
    }

    let (upsert_translations, delete_translations) = clean_translations(&input.translations, ctx, &mut errors);

    if errors.is_empty() {
        Ok(ValidatedIdea { title, content, categories, rating, upsert_translations, delete_translations })
    } else {
        Err(errors)
    }
}

fn clean_translations(
    rows: &[TranslationFormInput],
    ctx: &FormContext<'_>,
    errors: &mut FormErrors,
) -> (Vec<TranslationDraft>, Vec<Id>) {
    let mut upserts = Vec::new();
    let mut deletes = Vec::new();
    let owned: BTreeSet<Id> = ctx.existing_translations.iter().map(|t| t.id).collect();

    for (n, row) in rows.iter().enumerate() {
        let field = |name: &str| format!("translations-{n}-{name}");
        if let Some(id) = row.id {
            if !owned.contains(&id) {
                errors.add(field("id"), invalid_choice(id));
                continue;
            }
        }
        if row.delete {
            // deleting an unsaved row is a no-op; deleted rows are not validated
            if let Some(id) = row.id {
                deletes.push(id);
            }
            continue;
        }
        let mut ok = true;
        let language = row.language.trim().to_lowercase();
        if language.is_empty() {
            errors.add(field("language"), MSG_REQUIRED);
            ok = false;
        } else if language.chars().count() > LANGUAGE_MAX_LENGTH || !ctx.languages.contains(&language) {
            errors.add(field("language"), invalid_choice(&row.language));
            ok = false;
        }
        let title_len = row.title.chars().count();
        if row.title.trim().is_empty() {
            errors.add(field("title"), MSG_REQUIRED);
            ok = false;
        } else if title_len > TITLE_MAX_LENGTH {
            errors.add(field("title"), too_long(TITLE_MAX_LENGTH, title_len));
            ok = false;
        }
        if row.content.trim().is_empty() {
            errors.add(field("content"), MSG_REQUIRED);
            ok = false;
        }
        if ok {
            upserts.push(TranslationDraft { id: row.id, language, title: row.title.clone(), content: row.content.clone() });
        }
    }

    // (idea, language) stays unique across untouched rows and submitted ones
    let mut seen: BTreeSet<&str> = ctx
        .existing_translations
        .iter()
        .filter(|t| !deletes.contains(&t.id) && !upserts.iter().any(|d| d.id == Some(t.id)))
        .map(|t| t.language.as_str())
        .collect();
    let mut duplicate = false;
    for d in &upserts {
        if !seen.insert(d.language.as_str()) {
            duplicate = true;
        }
    }
    if duplicate {
        errors.add("translations", "Please correct the duplicate data for language, which must be unique.");
    }
    (upserts, deletes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_rules() {
        assert!(title_is_trimmed("Solar roofs"));
        assert!(title_is_trimmed("Ok"));
        assert!(!title_is_trimmed("A"));
        assert!(!title_is_trimmed("Solar\nroofs"));
        assert!(title_is_trimmed("Solar\troofs"));
        assert!(!title_is_trimmed(" Solar"));
        assert!(!title_is_trimmed("Solar\t"));
        assert!(!title_is_trimmed(""));
    }

    #[test]
    fn multilingual_cleaning_reports_per_language_fields() {
        let langs = Languages::new(["en", "fr"], "en").unwrap();
        let mut errors = FormErrors::default();
        let input = Multilingual::new().with("fr", "x".repeat(201)).with("xx", "y");
        let out = clean_multilingual(&input, "title", true, Some(TITLE_MAX_LENGTH), &langs, &mut errors);
        assert!(out.0.is_empty());
        assert_eq!(errors.get("title_en"), Some(&[MSG_REQUIRED.to_string()][..]));
        assert!(errors.get("title_fr").is_some());
        assert!(errors.get("title_xx").is_some());
    }
}
