use actix_cors::Cors;
use actix_web::{web, App, HttpServer, HttpResponse, middleware, error, http::StatusCode};
use food_match::config::{RepositoryBackend, Settings};
use food_match::core::MatchingWorkflow;
use food_match::routes::{self, AppState};
use food_match::services::{
    AppwriteClient, AppwriteCollections, CacheManager, ChangeEvent, HttpGeocoder,
    ListingRepository, MemoryRepository, PostgresClient, TokenVerifier,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, error, warn};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST))
            .json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle query payload errors
pub fn handle_query_payload_error(err: error::QueryPayloadError, _req: &actix_web::HttpRequest) -> actix_web::Error {
    JsonError {
        error: "invalid_query".to_string(),
        message: format!("Invalid query: {}", err),
        status_code: 400,
    }
    .into()
}

fn init_tracing(settings: &Settings) {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| settings.logging.level.clone());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| settings.logging.format.clone());
    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if log_format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, err);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, err))
}

async fn build_repository(settings: &Settings) -> std::io::Result<Arc<dyn ListingRepository>> {
    match settings.repository.backend {
        RepositoryBackend::Memory => {
            warn!("Using the in-memory repository; data is lost on restart");
            Ok(Arc::new(MemoryRepository::new()))
        }
        RepositoryBackend::Appwrite => {
            let collections = AppwriteCollections {
                food_entries: settings.collection.food_entries.clone(),
                food_matches: settings.collection.food_matches.clone(),
                food_shortages: settings.collection.food_shortages.clone(),
            };

            let client = AppwriteClient::new(
                settings.appwrite.endpoint.clone(),
                settings.appwrite.api_key.clone(),
                settings.appwrite.project_id.clone(),
                settings.appwrite.database_id.clone(),
                collections,
                settings.repository_timeout(),
            )
            .map_err(|e| startup_error("Failed to build Appwrite client", e))?;

            info!("Appwrite client initialized");
            Ok(Arc::new(client))
        }
        RepositoryBackend::Postgres => {
            let db = &settings.database;
            let client = PostgresClient::new(
                &db.url,
                db.max_connections,
                db.min_connections,
                Duration::from_secs(db.acquire_timeout_secs),
            )
            .await
            .map_err(|e| startup_error("Failed to connect to PostgreSQL", e))?;

            info!("PostgreSQL client initialized (max: {} connections)", db.max_connections);
            Ok(Arc::new(client))
        }
    }
}

async fn build_cache(settings: &Settings) -> Arc<CacheManager> {
    let cache = &settings.cache;
    let Some(redis_url) = &cache.redis_url else {
        info!("Cache manager initialized without Redis (L1: {} entries)", cache.l1_cache_size);
        return Arc::new(CacheManager::in_memory(cache.l1_cache_size, cache.ttl_secs));
    };

    match CacheManager::new(redis_url, cache.l1_cache_size, cache.ttl_secs).await {
        Ok(c) => {
            info!("Cache manager initialized (L1: {} entries, TTL: {}s)", cache.l1_cache_size, cache.ttl_secs);
            Arc::new(c)
        }
        Err(e) => {
            warn!("Failed to connect to Redis ({}), caching in-process only", e);
            Arc::new(CacheManager::in_memory(cache.l1_cache_size, cache.ttl_secs))
        }
    }
}

fn build_verifier(settings: &Settings) -> TokenVerifier {
    let identity = &settings.identity;
    if identity.jwt_secret.is_empty() {
        warn!("No identity secret configured; only tokens issued by this process will verify");
        let secret = uuid::Uuid::new_v4().to_string();
        return TokenVerifier::new(&secret, identity.issuer.clone());
    }
    TokenVerifier::new(&identity.jwt_secret, identity.issuer.clone())
}

/// Log store changes for operators following a live dashboard
fn spawn_change_logger(workflow: &MatchingWorkflow) {
    let Some(mut events) = workflow.subscribe() else {
        return;
    };

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChangeEvent::ListingCreated(listing)) => tracing::debug!("Listing created: {}", listing.id),
                Ok(ChangeEvent::ListingUpdated(listing)) => {
                    tracing::debug!("Listing {} is now {}", listing.id, listing.status.as_str())
                }
                Ok(ChangeEvent::ListingDeleted(id)) => tracing::debug!("Listing deleted: {}", id),
                Ok(ChangeEvent::RequestCreated(request)) => tracing::debug!("Request created: {}", request.id),
                Ok(ChangeEvent::RequestUpdated(request)) => {
                    tracing::debug!("Request {} is now {}", request.id, request.status.as_str())
                }
                Ok(ChangeEvent::ShortageReported(shortage)) => {
                    tracing::debug!("Shortage of {} meals reported: {}", shortage.meals_needed, shortage.id)
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Change logger skipped {} events", skipped)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    // FOODMATCH_CONFIG points at a single file instead of config/default + config/local
    let loaded = match std::env::var("FOODMATCH_CONFIG") {
        Ok(path) => Settings::load_from(path),
        Err(_) => Settings::load(),
    };
    let settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    init_tracing(&settings);
    info!("Starting Food Match service...");

    let repository = build_repository(&settings).await?;
    let workflow = MatchingWorkflow::new(repository, settings.matcher(), settings.workflow_settings());
    info!(
        "Matching workflow initialized (backend: {}, order: {:?}, window: {})",
        workflow.backend_name(),
        settings.matching.search_order,
        settings.matching.search_window
    );
    spawn_change_logger(&workflow);

    let cache = build_cache(&settings).await;
    let geocoder = HttpGeocoder::new(
        settings.geocoding.endpoint.clone(),
        settings.geocoding.api_key.clone(),
        Duration::from_secs(settings.geocoding.timeout_secs),
    )
    .with_cache(cache);
    if settings.geocoding.api_key.is_empty() {
        warn!("Geocoding API key not set; requests must carry coordinates");
    }

    let app_state = AppState {
        workflow,
        geocoder: Arc::new(geocoder),
        verifier: Arc::new(build_verifier(&settings)),
    };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
