use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use validator::Validate;

use crate::core::ListingDraft;
use crate::models::{
    CreateListingRequest, DashboardResponse, ReconcileResponse, SearchRequest, SearchResponse,
};
use crate::routes::{authenticate, error_response, resolve_position, workflow_error, AppState};

/// Configure listing routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/listings", web::post().to(create_listing))
        .route("/listings/search", web::post().to(search_listings))
        .route("/listings/{id}", web::delete().to(delete_listing))
        .route("/listings/{id}/reconcile", web::post().to(reconcile_listing))
        .route("/dashboard", web::get().to(provider_dashboard));
}

/// Search for nearby unclaimed listings
///
/// POST /api/v1/listings/search
///
/// Request body:
/// ```json
/// {
///   "latitude": 40.05,
///   "longitude": -75.05,
///   "radiusKm": 10
/// }
/// ```
async fn search_listings(
    state: web::Data<AppState>,
    req: web::Json<SearchRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    let origin = match resolve_position(&state, req.latitude, req.longitude, req.address.as_deref()).await {
        Ok(position) => position,
        Err(response) => return response,
    };

    match state.workflow.search(origin, req.radius_km).await {
        Ok(result) => HttpResponse::Ok().json(SearchResponse {
            candidates: result.candidates,
            radius_km: result.radius_km,
            total_scanned: result.total_scanned,
        }),
        Err(e) => {
            tracing::error!("Search failed: {}", e);
            workflow_error(e)
        }
    }
}

/// Post a new listing for the caller
async fn create_listing(
    state: web::Data<AppState>,
    req: web::Json<CreateListingRequest>,
    http_req: HttpRequest,
) -> impl Responder {
    let principal = match authenticate(&state, &http_req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    if let Err(errors) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    let req = req.into_inner();
    let location = match resolve_position(&state, req.latitude, req.longitude, Some(req.address.as_str())).await {
        Ok(position) => position,
        Err(response) => return response,
    };

    let draft = ListingDraft {
        meals_available: req.meals_available,
        location,
        address: req.address,
        description: req.description,
    };

    match state.workflow.create_listing(&principal, draft).await {
        Ok(listing) => HttpResponse::Created().json(listing),
        Err(e) => workflow_error(e),
    }
}

/// Delete one of the caller's unclaimed listings
async fn delete_listing(
    state: web::Data<AppState>,
    path: web::Path<String>,
    http_req: HttpRequest,
) -> impl Responder {
    let principal = match authenticate(&state, &http_req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    match state.workflow.delete_listing(&principal, &path).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => workflow_error(e),
    }
}

/// Retry declining the leftover pending requests of a claimed listing
async fn reconcile_listing(
    state: web::Data<AppState>,
    path: web::Path<String>,
    http_req: HttpRequest,
) -> impl Responder {
    let principal = match authenticate(&state, &http_req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let listing_id = path.into_inner();
    match state.workflow.reconcile_listing(&principal, &listing_id).await {
        Ok(declined_request_ids) => HttpResponse::Ok().json(ReconcileResponse {
            listing_id,
            declined_request_ids,
        }),
        Err(e) => workflow_error(e),
    }
}

/// The caller's listings with every request made against them
async fn provider_dashboard(state: web::Data<AppState>, http_req: HttpRequest) -> impl Responder {
    let principal = match authenticate(&state, &http_req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    match state.workflow.provider_dashboard(&principal).await {
        Ok((listings, requests)) => HttpResponse::Ok().json(DashboardResponse { listings, requests }),
        Err(e) => workflow_error(e),
    }
}
