use std::path::PathBuf;

use crate::i18n::Languages;

/// Which search backend answers free-text queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchBackendKind {
    /// Per-language tantivy indexes on local disk.
    Text,
    /// Remote Elasticsearch cluster.
    Elasticsearch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaBackendKind {
    Fs,
    S3,
}

/// Process-wide settings, read once from the environment at boot.
#[derive(Clone, Debug)]
pub struct Settings {
    pub languages: Languages,
    pub page_size: usize,
    pub bind_addr: String,
    pub frontend_url: Option<String>,
    pub search_backend: SearchBackendKind,
    pub search_index_dir: PathBuf,
    pub elasticsearch_url: String,
    pub elasticsearch_index: String,
    pub media_backend: MediaBackendKind,
    pub media_root: PathBuf,
    pub data_dir: PathBuf,
}

pub const DEFAULT_PAGE_SIZE: usize = 24;

fn str_env(name: &str, default: &str) -> String {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn usize_env(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let codes = str_env("LANGUAGES", "en,fr,de,lt");
        let default_code = str_env("LANGUAGE_CODE", "en");
        let languages = Languages::new(codes.split(','), &default_code)?;

        let search_backend = match str_env("SEARCH_BACKEND", "text").to_lowercase().as_str() {
            "text" | "tantivy" => SearchBackendKind::Text,
            "elasticsearch" | "es" => SearchBackendKind::Elasticsearch,
            other => anyhow::bail!("unknown SEARCH_BACKEND '{other}' (expected text or elasticsearch)"),
        };
        let media_backend = match str_env("MEDIA_BACKEND", "fs").to_lowercase().as_str() {
            "fs" => MediaBackendKind::Fs,
            "s3" => MediaBackendKind::S3,
            other => anyhow::bail!("unknown MEDIA_BACKEND '{other}' (expected fs or s3)"),
        };

        Ok(Self {
            languages,
            page_size: usize_env("PAGE_SIZE", DEFAULT_PAGE_SIZE),
            bind_addr: str_env("BIND_ADDR", "0.0.0.0:8080"),
            frontend_url: std::env::var("FRONTEND_URL").ok(),
            search_backend,
            search_index_dir: PathBuf::from(str_env("SEARCH_INDEX_DIR", "tmp/text_index")),
            elasticsearch_url: str_env("ELASTICSEARCH_URL", "http://localhost:9200"),
            elasticsearch_index: str_env("ELASTICSEARCH_INDEX", "ideas"),
            media_backend,
            media_root: PathBuf::from(str_env("MEDIA_ROOT", "media")),
            data_dir: PathBuf::from(str_env("IDEABOX_DATA_DIR", "data")),
        })
    }

    /// Settings suitable for tests: default languages, no external services.
    pub fn for_languages(languages: Languages) -> Self {
        Self {
            languages,
            page_size: DEFAULT_PAGE_SIZE,
            bind_addr: "127.0.0.1:0".into(),
            frontend_url: None,
            search_backend: SearchBackendKind::Text,
            search_index_dir: PathBuf::from("tmp/text_index"),
            elasticsearch_url: "http://localhost:9200".into(),
            elasticsearch_index: "ideas".into(),
            media_backend: MediaBackendKind::Fs,
            media_root: PathBuf::from("media"),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Validate that required environment variables are set.
pub fn validate_env_vars() -> anyhow::Result<()> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set (environment or .env)"))?;
    if secret.len() < 32 {
        anyhow::bail!("JWT_SECRET must be at least 32 characters long");
    }
    Ok(())
}
