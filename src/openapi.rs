use crate::facets::{CategoryChoice, Choices, Facets, RatingChoice, Selected};
use crate::forms::{FormErrors, IdeaFormInput, TranslationFormInput};
use crate::i18n::Multilingual;
use crate::models::{Author, Category, IdeaTranslation, NewCategory};
use crate::routes::{
    DeleteConfirmation, IdeaDetailResponse, IdeaFormResponse, IdeaListResponse, IdeaView, LikeResponse, MetaTags,
    PageInfo, SearchResponse,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_ideas,
        crate::routes::search_ideas,
        crate::routes::idea_detail,
        crate::routes::new_idea_form,
        crate::routes::create_idea,
        crate::routes::edit_idea_form,
        crate::routes::update_idea,
        crate::routes::delete_idea_confirmation,
        crate::routes::delete_idea,
        crate::routes::idea_handout_pdf,
        crate::routes::toggle_like,
        crate::routes::list_categories,
        crate::routes::create_category,
    ),
    components(schemas(
        Author, Category, NewCategory, IdeaTranslation, Multilingual,
        IdeaView, PageInfo, IdeaListResponse, SearchResponse, MetaTags, IdeaDetailResponse,
        IdeaFormResponse, DeleteConfirmation, LikeResponse,
        IdeaFormInput, TranslationFormInput, FormErrors,
        Facets, Selected, Choices, CategoryChoice, RatingChoice
    )),
    tags(
        (name = "ideas", description = "Idea listing, search, editing and handouts"),
        (name = "categories", description = "Category operations"),
    )
)]
pub struct ApiDoc;
