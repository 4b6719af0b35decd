use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::forms::FormErrors;
use crate::pictures::PictureError;
use crate::repo::RepoError;
use crate::search::SearchError;
use crate::storage::MediaStoreError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FormErrors>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("bad request: {0}")] BadRequest(String),
    #[error("unauthorized")] Unauthorized,
    #[error("forbidden")] Forbidden,
    #[error("validation failed")] Validation(FormErrors),
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Internal(msg) => {
                log::error!("repository error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Repo(e) => e.into(),
            other => {
                log::error!("search error: {other}");
                ApiError::Internal
            }
        }
    }
}

impl From<MediaStoreError> for ApiError {
    fn from(e: MediaStoreError) -> Self {
        match e {
            MediaStoreError::NotFound | MediaStoreError::InvalidPath(_) => ApiError::NotFound,
            MediaStoreError::Other(msg) => {
                log::error!("media store error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<PictureError> for ApiError {
    fn from(e: PictureError) -> Self {
        match e {
            PictureError::Unsupported(_) | PictureError::Decode(_) => {
                ApiError::Validation(FormErrors::single("picture", crate::forms::MSG_BAD_IMAGE))
            }
            PictureError::Store(e) => e.into(),
            PictureError::Blocking => ApiError::Internal,
        }
    }
}

impl From<FormErrors> for ApiError {
    fn from(e: FormErrors) -> Self {
        ApiError::Validation(e)
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let fields = match self {
            ApiError::Validation(errors) => Some(errors.clone()),
            _ => None,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string(), fields })
    }
}
