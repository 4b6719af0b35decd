pub mod auth;
pub mod config;
pub mod error;
pub mod facets;
pub mod forms;
pub mod handout;
pub mod i18n;
pub mod models;
pub mod openapi;
pub mod pagination;
pub mod pictures;
pub mod repo;
pub mod routes;
pub mod search;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
