mod config;
mod error;
mod inference;
mod routes;
mod storage;

use actix_web::{middleware, web, App, HttpServer};
use config::ServiceConfig;
use inference::classifier::load_classifier;
use inference::service::{Analyzer, ClassCatalog};
use routes::{configure_routes, cors_policy};
use std::env;
use std::time::Duration;
use storage::upload_store::UploadStore;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::other(format!("{}: {}", context, err))
}

/// Periodically deletes uploads older than `retention`.
fn spawn_retention_sweep(store: UploadStore, max_age: chrono::Duration, every: Duration) {
    actix_web::rt::spawn(async move {
        let mut ticker = actix_web::rt::time::interval(every);
        loop {
            ticker.tick().await;
            match store.purge_older_than(max_age).await {
                Ok(0) => {}
                Ok(removed) => log::info!(
                    "Removed {} expired uploads from {}",
                    removed,
                    store.dir().display()
                ),
                Err(e) => log::error!("Upload retention sweep failed: {}", e),
            }
        }
    });
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = ServiceConfig::load().map_err(|e| startup_error("Configuration error", e))?;

    let store = UploadStore::new(
        &config.upload_dir,
        &config.allowed_extensions,
        config.verify_content,
    );
    store
        .ensure_dir()
        .map_err(|e| startup_error("Failed to create upload directory", e))?;
    log::info!("Storing uploads in {}", store.dir().display());

    let classifier = load_classifier(&config.model, &config.image)
        .map_err(|e| startup_error("Model loading failed", e))?;
    log::info!("Loaded classifier from {}", config.model.path.display());

    let analyzer = Analyzer::new(
        classifier,
        ClassCatalog::lesions(),
        config.image.clone(),
        config.model.output,
    );

    let retention = config
        .retention()
        .map_err(|e| startup_error("Configuration error", e))?;
    if let Some(max_age) = retention {
        log::info!(
            "Uploads older than {}s are purged every {}s",
            max_age.num_seconds(),
            config.sweep_interval_secs
        );
        spawn_retention_sweep(
            store.clone(),
            max_age,
            Duration::from_secs(config.sweep_interval_secs.max(1)),
        );
    }

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    let store = web::Data::new(store);
    let analyzer = web::Data::new(analyzer);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors_policy())
            .app_data(store.clone())
            .app_data(analyzer.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
