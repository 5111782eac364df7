// Route exports
pub mod listings;
pub mod requests;
pub mod shortages;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use std::sync::Arc;

use crate::core::{MatchingWorkflow, WorkflowError};
use crate::models::{ErrorResponse, HealthResponse, Position};
use crate::services::{Geocoder, GeocodingError, Principal, TokenVerifier};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub workflow: MatchingWorkflow,
    pub geocoder: Arc<dyn Geocoder>,
    pub verifier: Arc<TokenVerifier>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .configure(listings::configure)
            .configure(requests::configure)
            .configure(shortages::configure),
    );
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let healthy = state.workflow.health_check().await;
    let status = if healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        backend: state.workflow.backend_name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

pub(crate) fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
        message: message.into(),
        status_code: status.as_u16(),
    })
}

/// Render a workflow failure with its HTTP status
pub(crate) fn workflow_error(err: WorkflowError) -> HttpResponse {
    match err {
        WorkflowError::Validation(message) => {
            error_response(StatusCode::BAD_REQUEST, "Validation failed", message)
        }
        WorkflowError::Unauthorized => {
            error_response(StatusCode::UNAUTHORIZED, "Unauthorized", "Authentication required")
        }
        WorkflowError::Forbidden(message) => error_response(StatusCode::FORBIDDEN, "Forbidden", message),
        WorkflowError::NotFound(message) => error_response(StatusCode::NOT_FOUND, "Not found", message),
        WorkflowError::Conflict(message) => error_response(StatusCode::CONFLICT, "Conflict", message),
        WorkflowError::RepositoryUnavailable(e) => {
            tracing::error!("Repository unavailable: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Repository unavailable", e.to_string())
        }
        WorkflowError::PartialFailure {
            message,
            listing_id,
            request_id,
            unresolved_request_ids,
        } => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Partial failure",
            "message": message,
            "status_code": 500,
            "listingId": listing_id,
            "requestId": request_id,
            "unresolvedRequestIds": unresolved_request_ids,
        })),
    }
}

/// Extract the caller from the `Authorization` header
pub(crate) fn authenticate(state: &AppState, req: &HttpRequest) -> Result<Principal, HttpResponse> {
    let header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    state.verifier.verify_header(header).map_err(|e| {
        tracing::debug!("Rejected caller: {}", e);
        error_response(StatusCode::UNAUTHORIZED, "Unauthorized", e.to_string())
    })
}

/// Use the supplied coordinates, or geocode the address when they are absent
pub(crate) async fn resolve_position(
    state: &AppState,
    latitude: Option<f64>,
    longitude: Option<f64>,
    address: Option<&str>,
) -> Result<Position, HttpResponse> {
    if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
        return Ok(Position::new(latitude, longitude));
    }

    let address = address.map(str::trim).filter(|a| !a.is_empty()).ok_or_else(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            "Validation failed",
            "either latitude and longitude or an address is required",
        )
    })?;

    state.geocoder.geocode(address).await.map_err(|e| match e {
        GeocodingError::NotFound(_) | GeocodingError::NotConfigured => {
            error_response(StatusCode::BAD_REQUEST, "Validation failed", e.to_string())
        }
        GeocodingError::RequestError(_) | GeocodingError::ApiError(_) => {
            tracing::error!("Geocoding failed for '{}': {}", address, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Geocoding unavailable", e.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RepositoryError;

    #[test]
    fn test_workflow_error_statuses() {
        let cases = [
            (WorkflowError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (WorkflowError::Unauthorized, StatusCode::UNAUTHORIZED),
            (WorkflowError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (WorkflowError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (WorkflowError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                WorkflowError::RepositoryUnavailable(RepositoryError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                WorkflowError::PartialFailure {
                    message: "x".into(),
                    listing_id: "l".into(),
                    request_id: None,
                    unresolved_request_ids: vec![],
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(workflow_error(err).status(), status);
        }
    }
}
