use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use validator::Validate;

use crate::models::{AcceptRequestBody, AcceptResponse, RequestListingRequest};
use crate::routes::{authenticate, error_response, resolve_position, workflow_error, AppState};

/// Configure request lifecycle routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/requests", web::post().to(request_listing))
        .route("/requests/{id}/accept", web::post().to(accept_request))
        .route("/requests/{id}/decline", web::post().to(decline_request));
}

/// Ask for a listing on behalf of the caller
///
/// POST /api/v1/requests
///
/// Request body:
/// ```json
/// {
///   "listingId": "string",
///   "address": "string",
///   "latitude": 40.01,
///   "longitude": -75.01
/// }
/// ```
async fn request_listing(
    state: web::Data<AppState>,
    req: web::Json<RequestListingRequest>,
    http_req: HttpRequest,
) -> impl Responder {
    let principal = match authenticate(&state, &http_req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    if let Err(errors) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    let position = match resolve_position(&state, req.latitude, req.longitude, Some(req.address.as_str())).await {
        Ok(position) => position,
        Err(response) => return response,
    };

    match state
        .workflow
        .request_listing(&principal, &req.listing_id, position, &req.address)
        .await
    {
        Ok(request) => HttpResponse::Created().json(request),
        Err(e) => workflow_error(e),
    }
}

/// Accept a pending request, claiming its listing
async fn accept_request(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AcceptRequestBody>,
    http_req: HttpRequest,
) -> impl Responder {
    let principal = match authenticate(&state, &http_req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    if let Err(errors) = body.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    match state
        .workflow
        .accept_request(&principal, &path, &body.listing_id)
        .await
    {
        Ok(result) => HttpResponse::Ok().json(AcceptResponse {
            declined_request_ids: result.declined.iter().map(|r| r.id.clone()).collect(),
            request: result.request,
            listing: result.listing,
        }),
        Err(e) => workflow_error(e),
    }
}

/// Decline a request; declining twice is a no-op
async fn decline_request(
    state: web::Data<AppState>,
    path: web::Path<String>,
    http_req: HttpRequest,
) -> impl Responder {
    let principal = match authenticate(&state, &http_req) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    match state.workflow.decline_request(&principal, &path).await {
        Ok(request) => HttpResponse::Ok().json(request),
        Err(e) => workflow_error(e),
    }
}
