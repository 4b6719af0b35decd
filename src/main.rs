use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use ideabox::config::{validate_env_vars, SearchBackendKind, Settings};
use ideabox::openapi::ApiDoc;
use ideabox::repo::Repo;
use ideabox::search::elasticsearch::ElasticsearchBackend;
use ideabox::search::text_index::TextIndex;
use ideabox::search::{rebuild_index, SearchBackend};
use ideabox::storage::build_media_store;
use ideabox::{config, AppState};

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(settings: &Settings) -> anyhow::Result<Arc<dyn Repo>> {
    let path = settings.data_dir.join("state.json");
    info!("Using in-memory repository backend (snapshot at {})", path.display());
    Ok(Arc::new(ideabox::repo::inmem::InMemRepo::open(path, settings.languages.default_code())))
}

#[cfg(feature = "postgres-store")]
async fn build_repo(settings: &Settings) -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    let db_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set for postgres-store"))?;
    let pool = PgPoolOptions::new().max_connections(5).connect(&db_url).await?;
    let repo = ideabox::repo::pg::PgRepo::new(pool, settings.languages.default_code());
    repo.migrate().await?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

async fn build_search(settings: &Settings) -> anyhow::Result<Arc<dyn SearchBackend>> {
    Ok(match settings.search_backend {
        SearchBackendKind::Text => {
            info!("Using text index at {}", settings.search_index_dir.display());
            Arc::new(TextIndex::open(&settings.search_index_dir, &settings.languages)?)
        }
        SearchBackendKind::Elasticsearch => {
            info!("Using Elasticsearch at {} (index {})", settings.elasticsearch_url, settings.elasticsearch_index);
            let es = ElasticsearchBackend::new(&settings.elasticsearch_url, &settings.elasticsearch_index);
            es.ensure_index(&settings.languages).await?;
            Arc::new(es)
        }
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }
    validate_env_vars()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping ideabox server");
    let settings = Settings::from_env()?;
    info!(
        languages = ?settings.languages.codes().collect::<Vec<_>>(),
        default = settings.languages.default_code(),
        page_size = settings.page_size,
        "configuration loaded"
    );

    let repo = build_repo(&settings).await?;
    let media = build_media_store(&settings).await?;
    let search = build_search(&settings).await?;
    match rebuild_index(search.as_ref(), repo.as_ref(), &settings.languages).await {
        Ok(count) => info!(count, "search index ready"),
        Err(e) => warn!(error = %e, "initial search index rebuild failed"),
    }

    let openapi = ApiDoc::openapi();
    let state = AppState { repo, media, search, settings: settings.clone() };
    let bind_addr = settings.bind_addr.clone();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            // during local dev allow React/Vite default ports
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);
        if let Some(front) = settings.frontend_url.as_deref() {
            cors = cors.allowed_origin(front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind_addr)?;

    info!("Listening on http://{bind_addr}");
    server.run().await?;
    Ok(())
}
