use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Auth;
use crate::config::Settings;
use crate::error::ApiError;
use crate::facets::{resolve_facets, CategoryChoice, Facets, FilterParams, IdeaQuerySet, RatingChoice};
use crate::forms::*;
use crate::handout::{self, Handout};
use crate::i18n::ActiveLanguage;
use crate::models::*;
use crate::pagination::{Page, Paginator};
use crate::pictures::{self, SOCIAL};
use crate::repo::{Repo, RepoError};
use crate::search::{self, SearchBackend, SearchQuery, SearchResults};
use crate::storage::MediaStore;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/ideas").route(web::get().to(list_ideas)))
            .service(web::resource("/ideas/search").route(web::get().to(search_ideas)))
            .service(
                web::resource("/ideas/new")
                    .route(web::get().to(new_idea_form))
                    .route(web::post().to(create_idea)),
            )
            .service(web::resource("/ideas/{id}").route(web::get().to(idea_detail)))
            .service(
                web::resource("/ideas/{id}/edit")
                    .route(web::get().to(edit_idea_form))
                    .route(web::post().to(update_idea)),
            )
            .service(
                web::resource("/ideas/{id}/delete")
                    .route(web::get().to(delete_idea_confirmation))
                    .route(web::post().to(delete_idea)),
            )
            .service(web::resource("/ideas/{id}/handout.pdf").route(web::get().to(idea_handout_pdf)))
            .service(web::resource("/ideas/{id}/like").route(web::post().to(toggle_like)))
            .service(
                web::resource("/categories")
                    .route(web::get().to(list_categories))
                    .route(web::post().to(create_category)),
            ),
    );
    // outside /api/v1 so picture URLs stay short
    cfg.route("/media/{path:.*}", web::get().to(get_media));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub media: Arc<dyn MediaStore>,
    pub search: Arc<dyn SearchBackend>,
    pub settings: Settings,
}

const PICTURE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB
const FORM_SIZE_LIMIT: usize = 1024 * 1024;
const META_DESCRIPTION_CHARS: usize = 160;

// ---------------- response shapes ----------------

/// An idea rendered in the active language.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IdeaView {
    #[schema(value_type = String)]
    pub id: IdeaId,
    pub url: String,
    pub title: String,
    pub content: String,
    pub author: Option<Author>,
    pub categories: Vec<CategoryChoice>,
    pub rating: Option<RatingChoice>,
    /// `/media/...` URLs of the original and its variants.
    #[schema(value_type = Option<Object>)]
    pub picture: Option<serde_json::Value>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PageInfo {
    pub number: usize,
    pub num_pages: usize,
    pub count: usize,
    pub per_page: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PageInfo {
    fn split<T>(page: Page<T>) -> (Self, Vec<T>) {
        let info = PageInfo {
            number: page.number,
            num_pages: page.num_pages,
            count: page.count,
            per_page: page.per_page,
            has_next: page.has_next,
            has_previous: page.has_previous,
        };
        (info, page.items)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IdeaListResponse {
    pub page: PageInfo,
    pub items: Vec<IdeaView>,
    pub facets: Facets,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    pub q: Option<String>,
    pub page: PageInfo,
    pub items: Vec<IdeaView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MetaTags {
    pub title: String,
    pub description: String,
    pub author: Option<String>,
    pub image: Option<String>,
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IdeaDetailResponse {
    pub idea: IdeaView,
    pub translations: Vec<IdeaTranslation>,
    pub meta: MetaTags,
    #[schema(value_type = Object)]
    pub structured_data: serde_json::Value,
    pub likes: usize,
    /// Present for authenticated requests.
    pub liked: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IdeaFormResponse {
    pub idea: Option<IdeaView>,
    pub form: IdeaFormInput,
    pub languages: Vec<String>,
    pub default_language: String,
    pub categories: Vec<CategoryChoice>,
    pub ratings: Vec<RatingChoice>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteConfirmation {
    pub idea: IdeaView,
    pub confirm_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LikeResponse {
    pub liked: bool,
    pub count: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchParams {
    pub q: Option<String>,
    pub page: Option<String>,
}

// ---------------- helpers ----------------

fn localized_categories(categories: &[Category], lang: &str, state: &AppState) -> Vec<CategoryChoice> {
    categories
        .iter()
        .map(|c| CategoryChoice { id: c.id, title: c.title.localized(lang, &state.settings.languages).to_string() })
        .collect()
}

fn rating_choices() -> Vec<RatingChoice> {
    RATING_CHOICES.iter().filter_map(|(v, _)| Rating::new(*v)).map(RatingChoice::from).collect()
}

async fn author_of(state: &AppState, idea: &Idea) -> Result<Option<Author>, ApiError> {
    let Some(id) = idea.author_id else { return Ok(None) };
    match state.repo.get_author(id).await {
        Ok(a) => Ok(Some(a)),
        Err(RepoError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn idea_view(state: &AppState, idea: &Idea, lang: &str, categories: &[Category]) -> Result<IdeaView, ApiError> {
    let languages = &state.settings.languages;
    let translations = state.repo.list_translations(idea.id).await?;
    let attached: Vec<Category> = categories.iter().filter(|c| idea.categories.contains(&c.id)).cloned().collect();
    Ok(IdeaView {
        id: idea.id,
        url: idea.url_path(),
        title: idea.translated_title(lang, &translations, languages),
        content: idea.translated_content(lang, &translations, languages),
        author: author_of(state, idea).await?,
        categories: localized_categories(&attached, lang, state),
        rating: idea.rating.map(RatingChoice::from),
        picture: idea.picture.as_deref().map(pictures::picture_urls),
        created: idea.created,
        modified: idea.modified,
    })
}

async fn idea_views(state: &AppState, ideas: Vec<Idea>, lang: &str) -> Result<Vec<IdeaView>, ApiError> {
    let categories = state.repo.list_categories().await?;
    let mut out = Vec::with_capacity(ideas.len());
    for idea in &ideas {
        out.push(idea_view(state, idea, lang, &categories).await?);
    }
    Ok(out)
}

fn excerpt(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

fn meta_tags(view: &IdeaView, idea: &Idea) -> MetaTags {
    MetaTags {
        title: view.title.clone(),
        description: excerpt(&view.content, META_DESCRIPTION_CHARS),
        author: view.author.as_ref().map(|a| a.display_name().to_string()),
        image: idea.picture.as_deref().map(|p| format!("/media/{}", pictures::variant_path(p, &SOCIAL))),
        url: view.url.clone(),
    }
}

/// schema.org `CreativeWork` description of the idea.
fn structured_data(view: &IdeaView, idea: &Idea, lang: &str) -> serde_json::Value {
    let mut data = json!({
        "@context": "https://schema.org",
        "@type": "CreativeWork",
        "name": view.title,
        "description": view.content,
        "inLanguage": lang,
    });
    if let Some(author) = &view.author {
        data["author"] = json!({ "@type": "Person", "name": author.display_name() });
    }
    if let Some(p) = idea.picture.as_deref() {
        data["image"] = format!("/media/{}", pictures::variant_path(p, &SOCIAL)).into();
    }
    data
}

/// Parsed multipart create/edit submission.
struct IdeaSubmission {
    form: IdeaFormInput,
    /// Uploaded file name and bytes.
    picture: Option<(String, Vec<u8>)>,
}

async fn read_submission(mut payload: Multipart) -> Result<IdeaSubmission, ApiError> {
    let mut form = None;
    let mut picture = None;
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::BadRequest("malformed multipart body".into())
    })? {
        let name = field.content_disposition().get_name().unwrap_or_default().to_string();
        let filename = field.content_disposition().get_filename().unwrap_or_default().to_string();
        let limit = if name == "picture" { PICTURE_SIZE_LIMIT } else { FORM_SIZE_LIMIT };
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::BadRequest("malformed multipart body".into())
        })? {
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::Validation(FormErrors::single(
                    &name,
                    &format!("Ensure this upload is at most {limit} bytes."),
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "idea" => {
                let parsed = serde_json::from_slice(&bytes)
                    .map_err(|e| ApiError::BadRequest(format!("invalid idea form: {e}")))?;
                form = Some(parsed);
            }
            // an empty file input means "keep the current picture"
            "picture" if !bytes.is_empty() => picture = Some((filename, bytes)),
            _ => {}
        }
    }
    let form = form.ok_or_else(|| ApiError::BadRequest("missing 'idea' part".into()))?;
    Ok(IdeaSubmission { form, picture })
}

/// Validate and persist a create (`existing == None`) or edit submission.
async fn save_submission(
    state: &AppState,
    auth: &Auth,
    existing: Option<Idea>,
    submission: IdeaSubmission,
) -> Result<Idea, ApiError> {
    let languages = &state.settings.languages;
    let editor = state.repo.upsert_author(auth.author()?).await?;
    let translations = match &existing {
        Some(idea) => state.repo.list_translations(idea.id).await?,
        None => Vec::new(),
    };
    let author_id = match &existing {
        Some(idea) => idea.author_id,
        None => Some(editor.id),
    };

    let ctx = FormContext {
        repo: state.repo.as_ref(),
        languages,
        author_id,
        existing: existing.as_ref(),
        existing_translations: &translations,
    };
    let (validated, mut errors) = match validate_idea_form(&submission.form, &ctx).await {
        Ok(v) => (Some(v), FormErrors::default()),
        Err(e) => (None, e),
    };
    if let Some((_, bytes)) = &submission.picture {
        if pictures::sniff_image_mime(bytes).is_err() {
            errors.add("picture", MSG_BAD_IMAGE);
        }
    }
    let validated = match validated {
        Some(v) if errors.is_empty() => v,
        _ => return Err(ApiError::Validation(errors)),
    };

    let now = Utc::now();
    let id = existing.as_ref().map_or_else(Uuid::new_v4, |i| i.id);
    let old_picture = existing.as_ref().and_then(|i| i.picture.clone());
    let mut picture = old_picture.clone();
    if let Some((filename, bytes)) = submission.picture {
        let path = pictures::replacement_upload_path(id, &filename, now, old_picture.as_deref());
        pictures::store_picture(state.media.as_ref(), &path, bytes).await?;
        picture = Some(path);
    }

    let idea = Idea {
        id,
        author_id,
        title: validated.title,
        content: validated.content,
        picture,
        categories: validated.categories,
        rating: validated.rating,
        created: existing.as_ref().map_or(now, |i| i.created),
        modified: now,
    };
    let new_picture = idea.picture.clone();
    let change = IdeaChangeSet {
        idea,
        is_new: existing.is_none(),
        upsert_translations: validated.upsert_translations,
        delete_translations: validated.delete_translations,
    };
    let saved = match state.repo.save_idea(change).await {
        Ok(saved) => saved,
        Err(e) => {
            // drop files nothing points at
            if let Some(p) = new_picture.as_deref().filter(|p| Some(*p) != old_picture.as_deref()) {
                if let Err(err) = pictures::delete_picture(state.media.as_ref(), p).await {
                    warn!(path = p, error = %err, "failed to remove orphaned picture");
                }
            }
            return Err(e.into());
        }
    };

    if let Some(old) = old_picture.as_deref().filter(|p| saved.picture.as_deref() != Some(*p)) {
        if let Err(err) = pictures::delete_picture(state.media.as_ref(), old).await {
            warn!(path = old, error = %err, "failed to remove replaced picture");
        }
    }
    search::sync_idea(state.search.as_ref(), state.repo.as_ref(), &saved, languages).await;
    Ok(saved)
}

async fn form_response(
    state: &AppState,
    lang: &str,
    idea: Option<&Idea>,
) -> Result<IdeaFormResponse, ApiError> {
    let languages = &state.settings.languages;
    let categories = state.repo.list_categories().await?;
    let (view, form) = match idea {
        Some(idea) => {
            let translations = state.repo.list_translations(idea.id).await?;
            (
                Some(idea_view(state, idea, lang, &categories).await?),
                IdeaFormInput::from_idea(idea, &translations),
            )
        }
        None => (None, IdeaFormInput::default()),
    };
    Ok(IdeaFormResponse {
        idea: view,
        form,
        languages: languages.codes().map(str::to_string).collect(),
        default_language: languages.default_code().to_string(),
        categories: localized_categories(&categories, lang, state),
        ratings: rating_choices(),
    })
}

// ---------------- handlers ----------------

#[utoipa::path(
    get,
    path = "/api/v1/ideas",
    tag = "ideas",
    params(FilterParams, ("lang" = Option<String>, Query, description = "Active language")),
    responses(
        (status = 200, description = "Filtered, paginated ideas with facets", body = IdeaListResponse)
    )
)]
pub async fn list_ideas(
    data: web::Data<AppState>,
    lang: ActiveLanguage,
    query: web::Query<FilterParams>,
) -> Result<HttpResponse, ApiError> {
    let params = query.into_inner();
    let (filter, facets) = resolve_facets(data.repo.as_ref(), &params, lang.code(), &data.settings.languages).await?;
    let source = IdeaQuerySet::new(data.repo.clone(), filter);
    let page = Paginator::new(data.settings.page_size).page(&source, params.page.as_deref()).await?;
    let (page, ideas) = PageInfo::split(page);
    let items = idea_views(&data, ideas, lang.code()).await?;
    Ok(HttpResponse::Ok().json(IdeaListResponse { page, items, facets }))
}

#[utoipa::path(
    get,
    path = "/api/v1/ideas/search",
    tag = "ideas",
    params(SearchParams, ("lang" = Option<String>, Query, description = "Active language")),
    responses(
        (status = 200, description = "Paginated search results", body = SearchResponse),
        (status = 500, description = "Search backend failure")
    )
)]
pub async fn search_ideas(
    data: web::Data<AppState>,
    lang: ActiveLanguage,
    query: web::Query<SearchParams>,
) -> Result<HttpResponse, ApiError> {
    let params = query.into_inner();
    let search_query = SearchQuery::new(params.q.as_deref(), lang.code());
    let q = search_query.text.clone();
    let results = SearchResults::new(data.search.clone(), data.repo.clone(), search_query);
    let page = Paginator::new(data.settings.page_size).page(&results, params.page.as_deref()).await?;
    let (page, ideas) = PageInfo::split(page);
    let items = idea_views(&data, ideas, lang.code()).await?;
    Ok(HttpResponse::Ok().json(SearchResponse { q, page, items }))
}

#[utoipa::path(
    get,
    path = "/api/v1/ideas/{id}",
    tag = "ideas",
    params(("id" = String, Path, description = "Idea id")),
    responses(
        (status = 200, description = "Idea detail", body = IdeaDetailResponse),
        (status = 404, description = "Idea not found")
    )
)]
pub async fn idea_detail(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    lang: ActiveLanguage,
    path: web::Path<IdeaId>,
) -> Result<HttpResponse, ApiError> {
    let idea = data.repo.get_idea(path.into_inner()).await?;
    let categories = data.repo.list_categories().await?;
    let view = idea_view(&data, &idea, lang.code(), &categories).await?;
    let translations = data.repo.list_translations(idea.id).await?;
    let object = ObjectRef::idea(idea.id);
    let likes = data.repo.count_likes(&object).await?;
    let liked = match auth.as_ref().map(Auth::owner).transpose()? {
        Some(owner) => Some(data.repo.find_like(&owner, &object).await?.is_some()),
        None => None,
    };
    Ok(HttpResponse::Ok().json(IdeaDetailResponse {
        meta: meta_tags(&view, &idea),
        structured_data: structured_data(&view, &idea, lang.code()),
        idea: view,
        translations,
        likes,
        liked,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/ideas/new",
    tag = "ideas",
    responses(
        (status = 200, description = "Empty idea form", body = IdeaFormResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn new_idea_form(
    _auth: Auth,
    data: web::Data<AppState>,
    lang: ActiveLanguage,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(form_response(&data, lang.code(), None).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/ideas/new",
    tag = "ideas",
    request_body(content = IdeaFormInput, content_type = "multipart/form-data",
        description = "Part `idea`: the JSON form; optional part `picture`: the image file"),
    responses(
        (status = 201, description = "Idea created", body = IdeaView),
        (status = 400, description = "Validation errors"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_idea(
    auth: Auth,
    data: web::Data<AppState>,
    lang: ActiveLanguage,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let submission = read_submission(payload).await?;
    let saved = save_submission(&data, &auth, None, submission).await?;
    info!(idea = %saved.id, "idea created");
    let categories = data.repo.list_categories().await?;
    let view = idea_view(&data, &saved, lang.code(), &categories).await?;
    Ok(HttpResponse::Created().insert_header((header::LOCATION, view.url.clone())).json(view))
}

#[utoipa::path(
    get,
    path = "/api/v1/ideas/{id}/edit",
    tag = "ideas",
    params(("id" = String, Path, description = "Idea id")),
    responses(
        (status = 200, description = "Pre-populated idea form", body = IdeaFormResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Idea not found")
    )
)]
pub async fn edit_idea_form(
    _auth: Auth,
    data: web::Data<AppState>,
    lang: ActiveLanguage,
    path: web::Path<IdeaId>,
) -> Result<HttpResponse, ApiError> {
    let idea = data.repo.get_idea(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(form_response(&data, lang.code(), Some(&idea)).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/ideas/{id}/edit",
    tag = "ideas",
    params(("id" = String, Path, description = "Idea id")),
    request_body(content = IdeaFormInput, content_type = "multipart/form-data",
        description = "Part `idea`: the JSON form; optional part `picture`: the image file"),
    responses(
        (status = 200, description = "Idea updated", body = IdeaView),
        (status = 400, description = "Validation errors"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Idea not found")
    )
)]
pub async fn update_idea(
    auth: Auth,
    data: web::Data<AppState>,
    lang: ActiveLanguage,
    path: web::Path<IdeaId>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let existing = data.repo.get_idea(path.into_inner()).await?;
    let submission = read_submission(payload).await?;
    let saved = save_submission(&data, &auth, Some(existing), submission).await?;
    info!(idea = %saved.id, "idea updated");
    let categories = data.repo.list_categories().await?;
    Ok(HttpResponse::Ok().json(idea_view(&data, &saved, lang.code(), &categories).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/ideas/{id}/delete",
    tag = "ideas",
    params(("id" = String, Path, description = "Idea id")),
    responses(
        (status = 200, description = "Deletion confirmation", body = DeleteConfirmation),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Idea not found")
    )
)]
pub async fn delete_idea_confirmation(
    _auth: Auth,
    data: web::Data<AppState>,
    lang: ActiveLanguage,
    path: web::Path<IdeaId>,
) -> Result<HttpResponse, ApiError> {
    let idea = data.repo.get_idea(path.into_inner()).await?;
    let categories = data.repo.list_categories().await?;
    let view = idea_view(&data, &idea, lang.code(), &categories).await?;
    let confirm_url = format!("{}/delete", view.url);
    Ok(HttpResponse::Ok().json(DeleteConfirmation { idea: view, confirm_url }))
}

#[utoipa::path(
    post,
    path = "/api/v1/ideas/{id}/delete",
    tag = "ideas",
    params(("id" = String, Path, description = "Idea id")),
    responses(
        (status = 204, description = "Idea deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Idea not found")
    )
)]
pub async fn delete_idea(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<IdeaId>,
) -> Result<HttpResponse, ApiError> {
    let idea = data.repo.get_idea(path.into_inner()).await?;
    if let Some(p) = idea.picture.as_deref() {
        pictures::delete_picture(data.media.as_ref(), p).await?;
    }
    data.repo.delete_idea(idea.id).await?;
    search::unindex_idea(data.search.as_ref(), idea.id).await;
    info!(idea = %idea.id, "idea deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/ideas/{id}/handout.pdf",
    tag = "ideas",
    params(("id" = String, Path, description = "Idea id")),
    responses(
        (status = 200, description = "PDF handout (application/pdf, inline)"),
        (status = 404, description = "Idea not found")
    )
)]
pub async fn idea_handout_pdf(
    data: web::Data<AppState>,
    lang: ActiveLanguage,
    path: web::Path<IdeaId>,
) -> Result<HttpResponse, ApiError> {
    let idea = data.repo.get_idea(path.into_inner()).await?;
    let categories = data.repo.list_categories().await?;
    let view = idea_view(&data, &idea, lang.code(), &categories).await?;
    let today = Utc::now().date_naive();
    let disposition = handout::content_disposition(today, &view.title);
    let doc = Handout {
        title: view.title,
        author: view.author.as_ref().map(|a| a.display_name().to_string()),
        rating: idea.rating,
        categories: view.categories.into_iter().map(|c| c.title).collect(),
        content: view.content,
        created: idea.created.date_naive(),
    };
    let bytes = web::block(move || handout::render(&doc))
        .await
        .map_err(|_| ApiError::Internal)?
        .map_err(|e| {
            log::error!("handout error: {e}");
            ApiError::Internal
        })?;
    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((header::CONTENT_DISPOSITION, disposition))
        .body(bytes))
}

#[utoipa::path(
    post,
    path = "/api/v1/ideas/{id}/like",
    tag = "ideas",
    params(("id" = String, Path, description = "Idea id")),
    responses(
        (status = 200, description = "New like state", body = LikeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Idea not found")
    )
)]
pub async fn toggle_like(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<IdeaId>,
) -> Result<HttpResponse, ApiError> {
    let idea = data.repo.get_idea(path.into_inner()).await?;
    data.repo.upsert_author(auth.author()?).await?;
    let owner = auth.owner()?;
    let object = ObjectRef::idea(idea.id);
    let liked = match data.repo.find_like(&owner, &object).await? {
        Some(like) => match data.repo.delete_like(like.id).await {
            Ok(()) | Err(RepoError::NotFound) => false,
            Err(e) => return Err(e.into()),
        },
        None => match data.repo.create_like(owner, object.clone()).await {
            Ok(_) | Err(RepoError::Conflict) => true,
            Err(e) => return Err(e.into()),
        },
    };
    let count = data.repo.count_likes(&object).await?;
    Ok(HttpResponse::Ok().json(LikeResponse { liked, count }))
}

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    tag = "categories",
    responses(
        (status = 200, description = "All categories", body = [Category])
    )
)]
pub async fn list_categories(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_categories().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/categories",
    tag = "categories",
    request_body = NewCategory,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 400, description = "Validation errors"),
        (status = 403, description = "Forbidden – Admins only")
    )
)]
pub async fn create_category(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewCategory>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let mut new = payload.into_inner();
    let languages = &data.settings.languages;
    let default_field = crate::i18n::localized_field_name("title", languages.default_code());
    if new.title.0.keys().any(|code| !languages.contains(code)) {
        return Err(ApiError::Validation(FormErrors::single("title", "Unsupported language.")));
    }
    new.title.retain_supported(languages);
    if new.title.get(languages.default_code()).map_or(true, |t| t.trim().is_empty()) {
        return Err(ApiError::Validation(FormErrors::single(&default_field, MSG_REQUIRED)));
    }
    let category = data.repo.create_category(new).await?;
    Ok(HttpResponse::Created().json(category))
}

// serve stored pictures and their variants
pub async fn get_media(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let (bytes, mime) = data.media.load(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().insert_header((header::CONTENT_TYPE, mime)).body(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a  b\nc", 10), "a b c");
        let long = "word ".repeat(50);
        let e = excerpt(&long, 20);
        assert_eq!(e.chars().count(), 20);
        assert!(e.ends_with('…'));
    }
}
