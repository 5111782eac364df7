use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use validator::Validate;

use crate::core::ShortageDraft;
use crate::models::{Position, ReportShortageRequest, ShortageListResponse, ShortageQuery};
use crate::routes::{authenticate, error_response, resolve_position, workflow_error, AppState};

/// Configure shortage routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/shortages", web::post().to(report_shortage))
        .route("/shortages", web::get().to(list_shortages));
}

/// Report that meals are needed somewhere
///
/// POST /api/v1/shortages
///
/// Request body:
/// ```json
/// {
///   "mealsNeeded": 40,
///   "address": "Shelter on 5th",
///   "description": "Dinner for forty",
///   "latitude": 39.95,
///   "longitude": -75.16
/// }
/// ```
async fn report_shortage(
    state: web::Data<AppState>,
    req: web::Json<ReportShortageRequest>,
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

    let draft = ShortageDraft {
        meals_needed: req.meals_needed,
        location,
        address: req.address,
        description: req.description,
    };

    match state.workflow.report_shortage(&principal, draft).await {
        Ok(shortage) => HttpResponse::Created().json(shortage),
        Err(e) => workflow_error(e),
    }
}

/// Newest shortage reports
///
/// GET /api/v1/shortages?latitude=39.95&longitude=-75.16&radiusKm=10&limit=20
async fn list_shortages(
    state: web::Data<AppState>,
    query: web::Query<ShortageQuery>,
) -> impl Responder {
    if let Err(errors) = query.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    let near = match (query.latitude, query.longitude) {
        (Some(latitude), Some(longitude)) => Some((Position::new(latitude, longitude), query.radius_km)),
        (None, None) => None,
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Validation failed",
                "latitude and longitude must be given together",
            )
        }
    };

    match state.workflow.list_shortages(near, query.limit).await {
        Ok(shortages) => HttpResponse::Ok().json(ShortageListResponse { shortages }),
        Err(e) => workflow_error(e),
    }
}
