//! Postgres repository. Multilingual fields are JSONB objects keyed by
//! language code; the per-author title uniqueness constraint is an
//! expression index on the default-language key.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::*;
use crate::i18n::Multilingual;

fn db_err(e: sqlx::Error) -> RepoError {
    if let sqlx::Error::RowNotFound = e {
        return RepoError::NotFound;
    }
    match e.as_database_error().and_then(|d| d.code()).as_deref() {
        Some("23505") => RepoError::Conflict,   // unique_violation
        Some("23503") => RepoError::NotFound,   // foreign_key_violation
        _ => RepoError::Internal(e.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct IdeaRow {
    id: Uuid,
    author_id: Option<Id>,
    title: Json<Multilingual>,
    content: Json<Multilingual>,
    picture: Option<String>,
    rating: Option<i16>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    categories: Vec<Id>,
}

impl From<IdeaRow> for Idea {
    fn from(r: IdeaRow) -> Self {
        Idea {
            id: r.id,
            author_id: r.author_id,
            title: r.title.0,
            content: r.content.0,
            picture: r.picture,
            categories: r.categories.into_iter().collect::<BTreeSet<_>>(),
            rating: r.rating.and_then(|v| u8::try_from(v).ok()).and_then(Rating::new),
            created: r.created,
            modified: r.modified,
        }
    }
}

const IDEA_COLUMNS: &str = r#"
    i.id, i.author_id, i.title, i.content, i.picture, i.rating, i.created, i.modified,
    ARRAY(SELECT ic.category_id FROM idea_categories ic WHERE ic.idea_id = i.id ORDER BY ic.category_id) AS categories
"#;

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: Id,
    title: Json<Multilingual>,
}

impl From<CategoryRow> for Category {
    fn from(r: CategoryRow) -> Self {
        Category { id: r.id, title: r.title.0 }
    }
}

#[derive(sqlx::FromRow)]
struct LikeRow {
    id: Id,
    owner_kind: String,
    owner_id: Id,
    content_type: String,
    object_id: String,
    created: DateTime<Utc>,
}

fn owner_kind_str(kind: OwnerKind) -> &'static str {
    match kind {
        OwnerKind::User => "user",
        OwnerKind::Group => "group",
    }
}

impl TryFrom<LikeRow> for Like {
    type Error = RepoError;
    fn try_from(r: LikeRow) -> Result<Self, Self::Error> {
        let kind = match r.owner_kind.as_str() {
            "user" => OwnerKind::User,
            "group" => OwnerKind::Group,
            other => return Err(RepoError::Internal(format!("unknown owner kind '{other}'"))),
        };
        Ok(Like {
            id: r.id,
            owner: OwnerRef { kind, id: r.owner_id },
            object: ObjectRef { content_type: r.content_type, object_id: r.object_id },
            created: r.created,
        })
    }
}

#[derive(Clone)]
pub struct PgRepo {
    pool: Pool<Postgres>,
    default_lang: String,
}

impl PgRepo {
    pub fn new(pool: Pool<Postgres>, default_lang: &str) -> Self {
        Self { pool, default_lang: default_lang.to_string() }
    }

    /// Apply embedded migrations and the language-dependent constraints.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        // language codes are validated to [a-z0-9-] when settings load
        let lang = self.default_lang.replace('\'', "");
        let index = crate::i18n::localized_field_name("unique_titles_for_each_author", &lang);
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON ideas (author_id, (title->>'{lang}')) WHERE author_id IS NOT NULL"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &IdeaFilter) {
        qb.push(" WHERE TRUE");
        if let Some(author) = filter.author {
            qb.push(" AND i.author_id = ").push_bind(author);
        }
        if let Some(category) = filter.category {
            // EXISTS keeps one row per idea
            qb.push(" AND EXISTS (SELECT 1 FROM idea_categories ic WHERE ic.idea_id = i.id AND ic.category_id = ")
                .push_bind(category)
                .push(")");
        }
        if let Some(rating) = filter.rating {
            qb.push(" AND i.rating = ").push_bind(i16::from(rating.value()));
        }
    }
}

#[async_trait]
impl IdeaRepo for PgRepo {
    async fn get_idea(&self, id: IdeaId) -> RepoResult<Idea> {
        let row = sqlx::query_as::<_, IdeaRow>(&format!("SELECT {IDEA_COLUMNS} FROM ideas i WHERE i.id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.into())
    }

    async fn get_ideas(&self, ids: &[IdeaId]) -> RepoResult<Vec<Idea>> {
        let rows = sqlx::query_as::<_, IdeaRow>(&format!("SELECT {IDEA_COLUMNS} FROM ideas i WHERE i.id = ANY($1)"))
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut by_id: HashMap<IdeaId, Idea> = rows.into_iter().map(|r| (r.id, Idea::from(r))).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn all_ideas(&self) -> RepoResult<Vec<Idea>> {
        let filter = IdeaFilter::ordered_by(&self.default_lang, &self.default_lang);
        self.list_ideas(&filter, 0, i64::MAX as usize).await
    }

    async fn count_ideas(&self, filter: &IdeaFilter) -> RepoResult<usize> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ideas i");
        Self::push_filter(&mut qb, filter);
        let n: i64 = qb.build_query_scalar().fetch_one(&self.pool).await.map_err(db_err)?;
        Ok(n.max(0) as usize)
    }

    async fn list_ideas(&self, filter: &IdeaFilter, offset: usize, limit: usize) -> RepoResult<Vec<Idea>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {IDEA_COLUMNS} FROM ideas i"));
        Self::push_filter(&mut qb, filter);
        qb.push(" ORDER BY COALESCE(NULLIF(i.title->>")
            .push_bind(filter.order_lang.clone())
            .push(", ''), i.title->>")
            .push_bind(filter.default_lang.clone())
            .push(", ''), i.id OFFSET ")
            .push_bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        let rows = qb.build_query_as::<IdeaRow>().fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(rows.into_iter().map(Idea::from).collect())
    }

    async fn title_taken(&self, author_id: Id, lang: &str, title: &str, exclude: Option<IdeaId>) -> RepoResult<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM ideas WHERE author_id = $1 AND title->>$2 = $3 AND ($4::uuid IS NULL OR id <> $4))",
        )
        .bind(author_id)
        .bind(lang)
        .bind(title)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(taken)
    }

    async fn save_idea(&self, change: IdeaChangeSet) -> RepoResult<Idea> {
        let IdeaChangeSet { idea, is_new, upsert_translations, delete_translations } = change;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let rating = idea.rating.map(|r| i16::from(r.value()));

        if is_new {
            sqlx::query(
                "INSERT INTO ideas (id, author_id, title, content, picture, rating, created, modified) VALUES ($1,$2,$3,$4,$5,$6,$7,now())",
            )
            .bind(idea.id)
            .bind(idea.author_id)
            .bind(Json(&idea.title))
            .bind(Json(&idea.content))
            .bind(&idea.picture)
            .bind(rating)
            .bind(idea.created)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        } else {
            let res = sqlx::query(
                "UPDATE ideas SET author_id=$2, title=$3, content=$4, picture=$5, rating=$6, modified=now() WHERE id=$1",
            )
            .bind(idea.id)
            .bind(idea.author_id)
            .bind(Json(&idea.title))
            .bind(Json(&idea.content))
            .bind(&idea.picture)
            .bind(rating)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
        }

        let categories: Vec<Id> = idea.categories.iter().copied().collect();
        sqlx::query("DELETE FROM idea_categories WHERE idea_id = $1")
            .bind(idea.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("INSERT INTO idea_categories (idea_id, category_id) SELECT $1, UNNEST($2::bigint[])")
            .bind(idea.id)
            .bind(&categories)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if !delete_translations.is_empty() {
            let res = sqlx::query("DELETE FROM idea_translations WHERE idea_id = $1 AND id = ANY($2)")
                .bind(idea.id)
                .bind(&delete_translations)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            if res.rows_affected() as usize != delete_translations.len() {
                return Err(RepoError::NotFound);
            }
        }
        for d in &upsert_translations {
            match d.id {
                Some(tid) => {
                    let res = sqlx::query(
                        "UPDATE idea_translations SET language=$3, title=$4, content=$5 WHERE id=$1 AND idea_id=$2",
                    )
                    .bind(tid)
                    .bind(idea.id)
                    .bind(&d.language)
                    .bind(&d.title)
                    .bind(&d.content)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                    if res.rows_affected() == 0 {
                        return Err(RepoError::NotFound);
                    }
                }
                None => {
                    sqlx::query("INSERT INTO idea_translations (idea_id, language, title, content) VALUES ($1,$2,$3,$4)")
                        .bind(idea.id)
                        .bind(&d.language)
                        .bind(&d.title)
                        .bind(&d.content)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        self.get_idea(idea.id).await
    }

    async fn delete_idea(&self, id: IdeaId) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM likes WHERE content_type = $1 AND object_id = $2")
            .bind(ObjectRef::IDEA)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        // translations and category links cascade
        let res = sqlx::query("DELETE FROM ideas WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_translations(&self, idea_id: IdeaId) -> RepoResult<Vec<IdeaTranslation>> {
        sqlx::query_as::<_, (Id, Uuid, String, String, String)>(
            "SELECT id, idea_id, language, title, content FROM idea_translations WHERE idea_id = $1 ORDER BY language",
        )
        .bind(idea_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
        .map(|rows| {
            rows.into_iter()
                .map(|(id, idea_id, language, title, content)| IdeaTranslation { id, idea_id, language, title, content })
                .collect()
        })
    }
}

#[async_trait]
impl CategoryRepo for PgRepo {
    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>("SELECT id, title FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn get_category(&self, id: Id) -> RepoResult<Category> {
        let row = sqlx::query_as::<_, CategoryRow>("SELECT id, title FROM categories WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.into())
    }

    async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
        let row = sqlx::query_as::<_, CategoryRow>("INSERT INTO categories (title) VALUES ($1) RETURNING id, title")
            .bind(Json(&new.title))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.into())
    }
}

#[async_trait]
impl AuthorRepo for PgRepo {
    async fn get_author(&self, id: Id) -> RepoResult<Author> {
        let (id, username, full_name) = sqlx::query_as::<_, (Id, String, Option<String>)>(
            "SELECT id, username, full_name FROM authors WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(Author { id, username, full_name })
    }

    async fn list_authors_with_ideas(&self) -> RepoResult<Vec<Author>> {
        let rows = sqlx::query_as::<_, (Id, String, Option<String>)>(
            "SELECT a.id, a.username, a.full_name FROM authors a WHERE EXISTS (SELECT 1 FROM ideas i WHERE i.author_id = a.id) ORDER BY a.username, a.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|(id, username, full_name)| Author { id, username, full_name }).collect())
    }

    async fn upsert_author(&self, author: Author) -> RepoResult<Author> {
        sqlx::query(
            "INSERT INTO authors (id, username, full_name) VALUES ($1,$2,$3) ON CONFLICT (id) DO UPDATE SET username = EXCLUDED.username, full_name = EXCLUDED.full_name",
        )
        .bind(author.id)
        .bind(&author.username)
        .bind(&author.full_name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(author)
    }

    async fn remove_author(&self, id: Id) -> RepoResult<()> {
        // ideas.author_id is ON DELETE SET NULL
        let res = sqlx::query("DELETE FROM authors WHERE id = $1").bind(id).execute(&self.pool).await.map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl LikeRepo for PgRepo {
    async fn find_like(&self, owner: &OwnerRef, object: &ObjectRef) -> RepoResult<Option<Like>> {
        let row = sqlx::query_as::<_, LikeRow>(
            "SELECT id, owner_kind, owner_id, content_type, object_id, created FROM likes WHERE owner_kind=$1 AND owner_id=$2 AND content_type=$3 AND object_id=$4",
        )
        .bind(owner_kind_str(owner.kind))
        .bind(owner.id)
        .bind(&object.content_type)
        .bind(&object.object_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Like::try_from).transpose()
    }

    async fn create_like(&self, owner: OwnerRef, object: ObjectRef) -> RepoResult<Like> {
        let row = sqlx::query_as::<_, LikeRow>(
            "INSERT INTO likes (owner_kind, owner_id, content_type, object_id) VALUES ($1,$2,$3,$4) RETURNING id, owner_kind, owner_id, content_type, object_id, created",
        )
        .bind(owner_kind_str(owner.kind))
        .bind(owner.id)
        .bind(&object.content_type)
        .bind(&object.object_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Like::try_from(row)
    }

    async fn delete_like(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM likes WHERE id = $1").bind(id).execute(&self.pool).await.map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn count_likes(&self, object: &ObjectRef) -> RepoResult<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE content_type = $1 AND object_id = $2")
            .bind(&object.content_type)
            .bind(&object.object_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n.max(0) as usize)
    }
}
