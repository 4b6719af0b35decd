//! Supported languages, multilingual field values and the per-request
//! active language.

use std::collections::BTreeMap;
use std::future::{ready, Ready};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The declared set of supported language codes plus the default one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Languages {
    codes: Vec<String>,
    default: String,
}

impl Languages {
    pub fn new<I, S>(codes: I, default: &str) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for code in codes {
            let code = code.as_ref().trim().to_lowercase();
            if code.is_empty() || out.contains(&code) {
                continue;
            }
            // codes end up in column names and index paths
            if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                anyhow::bail!("invalid language code '{code}'");
            }
            out.push(code);
        }
        let default = default.trim().to_lowercase();
        if !out.contains(&default) {
            anyhow::bail!("default language '{default}' is not among the supported languages {out:?}");
        }
        Ok(Self { codes: out, default })
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }

    pub fn default_code(&self) -> &str {
        &self.default
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    /// Map a language tag (`fr-CA`, `EN`) onto a supported code, trying the
    /// full tag first and then its primary subtag.
    pub fn match_tag(&self, tag: &str) -> Option<&str> {
        let tag = tag.trim().to_lowercase();
        if let Some(c) = self.codes.iter().find(|c| **c == tag) {
            return Some(c.as_str());
        }
        let primary = tag.split('-').next().unwrap_or_default();
        self.codes.iter().find(|c| *c == primary).map(String::as_str)
    }

    /// Pick the best supported language from an `Accept-Language` header value.
    pub fn from_accept_language(&self, header: &str) -> Option<&str> {
        let mut tags: Vec<(f32, &str)> = header
            .split(',')
            .filter_map(|part| {
                let mut pieces = part.split(';');
                let tag = pieces.next()?.trim();
                if tag.is_empty() || tag == "*" {
                    return None;
                }
                let q = pieces
                    .find_map(|p| p.trim().strip_prefix("q=").and_then(|v| v.parse::<f32>().ok()))
                    .unwrap_or(1.0);
                Some((q, tag))
            })
            .collect();
        // stable: equal weights keep header order
        tags.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        tags.into_iter().filter(|(q, _)| *q > 0.0).find_map(|(_, tag)| self.match_tag(tag))
    }
}

/// Name of the per-language column/field for `base` (`title` + `pt-br` → `title_pt_br`).
pub fn localized_field_name(base: &str, lang: &str) -> String {
    format!("{base}_{}", lang.replace('-', "_"))
}

/// One value per language code. Empty strings are treated as missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Multilingual(pub BTreeMap<String, String>);

impl Multilingual {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, lang: &str, value: impl Into<String>) -> Self {
        self.set(lang, value);
        self
    }

    pub fn set(&mut self, lang: &str, value: impl Into<String>) {
        self.0.insert(lang.to_string(), value.into());
    }

    /// The value stored for exactly `lang`, if non-empty.
    pub fn get(&self, lang: &str) -> Option<&str> {
        self.0.get(lang).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Current-language accessor: the value for `lang`, falling back to the
    /// default language.
    pub fn localized<'a>(&'a self, lang: &str, languages: &Languages) -> &'a str {
        self.get(lang)
            .or_else(|| self.get(languages.default_code()))
            .unwrap_or_default()
    }

    /// Drop values for unsupported languages.
    pub fn retain_supported(&mut self, languages: &Languages) {
        self.0.retain(|code, _| languages.contains(code));
    }

    /// Flatten into `{base}_{lang}` pairs for every supported language.
    pub fn to_fields(&self, base: &str, languages: &Languages) -> BTreeMap<String, String> {
        languages
            .codes()
            .map(|code| (localized_field_name(base, code), self.get(code).unwrap_or_default().to_string()))
            .collect()
    }
}

/// The language the current request is served in.
///
/// Resolution order: `lang` query parameter, `Accept-Language`, default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveLanguage(pub String);

impl ActiveLanguage {
    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn resolve(req: &HttpRequest, languages: &Languages) -> Self {
        let from_query = web::Query::<BTreeMap<String, String>>::from_query(req.query_string())
            .ok()
            .and_then(|q| q.get("lang").and_then(|l| languages.match_tag(l)).map(str::to_string));
        if let Some(code) = from_query {
            return Self(code);
        }
        let from_header = req
            .headers()
            .get(actix_web::http::header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| languages.from_accept_language(v))
            .map(str::to_string);
        Self(from_header.unwrap_or_else(|| languages.default_code().to_string()))
    }
}

impl FromRequest for ActiveLanguage {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        match req.app_data::<web::Data<crate::routes::AppState>>() {
            Some(state) => ready(Ok(Self::resolve(req, &state.settings.languages))),
            None => ready(Err(actix_web::error::ErrorInternalServerError("application state missing"))),
        }
    }
}
