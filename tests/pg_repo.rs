#![cfg(feature = "postgres-store")]
//! Runs against `DATABASE_URL`; skipped when it is unset.

use std::collections::BTreeSet;

use chrono::Utc;
use ideabox::i18n::Multilingual;
use ideabox::models::*;
use ideabox::repo::pg::PgRepo;
use ideabox::repo::IdeaRepo;
use sqlx::postgres::PgPoolOptions;

async fn repo() -> Option<PgRepo> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
    let repo = PgRepo::new(pool, "en");
    repo.migrate().await.unwrap();
    Some(repo)
}

fn draft(id: Option<Id>, language: &str, title: &str) -> TranslationDraft {
    TranslationDraft { id, language: language.into(), title: title.into(), content: format!("{title} body") }
}

#[tokio::test]
async fn translation_languages_can_be_swapped_in_one_save() {
    let Some(r) = repo().await else { return };
    let now = Utc::now();
    let idea = Idea {
        id: uuid::Uuid::new_v4(),
        author_id: None,
        title: Multilingual::new().with("en", "Bikes"),
        content: Multilingual::new().with("en", "Body"),
        picture: None,
        categories: BTreeSet::new(),
        rating: None,
        created: now,
        modified: now,
    };
    let saved = r
        .save_idea(IdeaChangeSet {
            idea,
            is_new: true,
            upsert_translations: vec![draft(None, "fr", "Vélo"), draft(None, "de", "Fahrrad")],
            delete_translations: vec![],
        })
        .await
        .unwrap();
    let rows = r.list_translations(saved.id).await.unwrap();
    let (de, fr) = (rows[0].id, rows[1].id);

    r.save_idea(IdeaChangeSet {
        idea: saved.clone(),
        is_new: false,
        upsert_translations: vec![draft(Some(fr), "de", "Fahrrad"), draft(Some(de), "fr", "Vélo")],
        delete_translations: vec![],
    })
    .await
    .unwrap();

    let rows = r.list_translations(saved.id).await.unwrap();
    let got: Vec<_> = rows.iter().map(|t| (t.id, t.language.as_str())).collect();
    assert_eq!(got, vec![(fr, "de"), (de, "fr")]);

    // a real duplicate still fails at commit and writes nothing
    let err = r
        .save_idea(IdeaChangeSet {
            idea: saved.clone(),
            is_new: false,
            upsert_translations: vec![draft(None, "fr", "Autre")],
            delete_translations: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ideabox::repo::RepoError::Conflict));
    assert_eq!(r.list_translations(saved.id).await.unwrap().len(), 2);
    r.delete_idea(saved.id).await.unwrap();
}
