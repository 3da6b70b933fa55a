use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpResponse, HttpServer};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use freeblog::cache::InMemHeaderCache;
use freeblog::config::AppConfig;
use freeblog::counters::InMemCounters;
use freeblog::repo::Repo;
use freeblog::storage::{FsImageStore, ImageStore, ImageStores, S3ImageStore};
use freeblog::{routes, AppState};

async fn metrics_endpoint(handle: web::Data<PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use freeblog::repo::pg::{PgRepo, MIGRATOR};
    use sqlx::postgres::PgPoolOptions;

    let url = cfg
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for postgres-store"))?;
    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
    MIGRATOR.run(&pool).await?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(PgRepo::new(pool)))
}

#[cfg(not(feature = "postgres-store"))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use freeblog::repo::inmem::InMemRepo;

    let repo = match cfg.data_dir.as_ref() {
        Some(dir) => {
            info!("Using in-memory repository with snapshot in '{}'", dir.display());
            InMemRepo::with_snapshot(dir)
        }
        None => {
            info!("Using in-memory repository backend");
            InMemRepo::new()
        }
    };
    Ok(Arc::new(repo))
}

async fn build_image_stores(cfg: &AppConfig) -> ImageStores {
    let file_server: Arc<dyn ImageStore> =
        Arc::new(FsImageStore::new(cfg.file_server.root.clone(), cfg.file_server.public_base.clone()));
    let object_storage = match cfg.s3.as_ref() {
        Some(s3) => match S3ImageStore::new(s3).await {
            Ok(store) => Arc::new(store) as Arc<dyn ImageStore>,
            Err(e) => {
                warn!("S3 unavailable ({e}); object storage uploads go to the file server");
                file_server.clone()
            }
        },
        None => {
            info!("S3_ENDPOINT not set; object storage uploads go to the file server");
            file_server.clone()
        }
    };
    ImageStores { object_storage, file_server }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration error: {e}");
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    info!("Bootstrapping freeblog server");
    info!("Frontend URL: {}", cfg.frontend_url);

    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to install metrics recorder: {e}");
            std::process::exit(1);
        }
    };

    let repo = match build_repo(&cfg).await {
        Ok(repo) => repo,
        Err(e) => {
            error!("failed to initialise repository: {e}");
            std::process::exit(1);
        }
    };
    let images = build_image_stores(&cfg).await;
    let cache = Arc::new(InMemHeaderCache::new(cfg.header_cache_ttl));
    let counters = Arc::new(InMemCounters::new());
    let state = AppState::new(
        repo,
        cache,
        counters.clone(),
        counters,
        images,
        cfg.file_server.public_base.clone(),
        cfg.paging,
    );

    let frontend = cfg.frontend_url.clone();
    let bind = (cfg.host.clone(), cfg.port);
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(prometheus.clone()))
            .configure(routes::config)
            .route("/metrics", web::get().to(metrics_endpoint))
    })
    .bind(bind.clone())?;

    info!("Listening on http://{}:{}", bind.0, bind.1);
    server.run().await
}
